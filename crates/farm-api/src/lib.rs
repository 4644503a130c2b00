//! Service layer: executes every gameplay operation as one atomic store
//! transaction, runs the timer jobs, and hosts the admin HTTP API.

pub mod jobs;
pub mod notifications;
pub mod persistence;
mod server;

use std::env;
use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use contracts::{
    BroadcastAudience, CropKind, GiftKind, NotificationCategory, NotificationPriority,
    PlayerCommand, PrizeBundle, VipTier, BOOSTER_CAP, BOOSTER_PRICE_COINS, MAX_PATCHES,
    PART_PRICE_COINS,
};
use farm_core::catalog::CropCatalog;
use farm_core::contest::{self, Contest, SettlementDecision};
use farm_core::error::GameError;
use farm_core::schedule::{JobRegistry, JobStatus};
use farm_core::vip::{self, VipSubscription};
use farm_core::{clock, patch};
use rand::Rng;
use serde::Serialize;

pub use persistence::{FarmStore, NewUserProfile, StoreError, UserRow};
pub use server::{serve, ServerError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Process configuration, read once at startup and passed explicitly.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub sqlite_path: String,
    pub admin_addr: SocketAddr,
    /// Bearer token for the admin API; `None` leaves the API unprotected
    /// (local development only).
    pub admin_token: Option<String>,
    pub backup_dir: String,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sqlite_path: env_or("FARM_SQLITE_PATH", defaults.sqlite_path),
            admin_addr: env::var("FARM_ADMIN_ADDR")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(defaults.admin_addr),
            admin_token: env::var("FARM_ADMIN_TOKEN")
                .ok()
                .filter(|token| !token.trim().is_empty()),
            backup_dir: env_or("FARM_BACKUP_DIR", defaults.backup_dir),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "farm.sqlite".to_string(),
            admin_addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
            admin_token: None,
            backup_dir: "backups".to_string(),
        }
    }
}

fn env_or(key: &str, fallback: String) -> String {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or(fallback)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ServiceError {
    Game(GameError),
    Store(StoreError),
}

impl ServiceError {
    /// Text safe to show to the player. Internal failures stay generic;
    /// the real cause goes to the log.
    pub fn user_message(&self) -> String {
        match self {
            Self::Game(err) => err.to_string(),
            Self::Store(_) => "Something went wrong. Please try again later.".to_string(),
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Game(err) => write!(f, "game error: {err}"),
            Self::Store(err) => write!(f, "store error: {err}"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<GameError> for ServiceError {
    fn from(value: GameError) -> Self {
        Self::Game(value)
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

// ---------------------------------------------------------------------------
// Read views for the transport layer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PatchView {
    pub patch_number: u8,
    pub unlocked: bool,
    pub crop: Option<CropKind>,
    pub ready: bool,
    pub progress_percent: f64,
    pub seconds_remaining: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FarmStatus {
    pub coins: i64,
    pub water: i64,
    pub heavy_water: i64,
    pub boosters: i64,
    pub parts: i64,
    pub patches_unlocked: u8,
    pub vip_tier: Option<u8>,
    pub patches: Vec<PatchView>,
    pub can_expand: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VipOverview {
    pub tier: Option<u8>,
    pub days_remaining: i64,
    pub can_claim_daily: bool,
}

// ---------------------------------------------------------------------------
// GameService
// ---------------------------------------------------------------------------

/// Facade over the store and the game engine. One instance per process,
/// shared behind a mutex by the HTTP server, the job runner, and the
/// notification drain.
#[derive(Debug)]
pub struct GameService {
    store: FarmStore,
    catalog: CropCatalog,
    registry: JobRegistry,
    config: ServiceConfig,
}

impl GameService {
    pub fn open(config: ServiceConfig, now: DateTime<Utc>) -> Result<Self, StoreError> {
        let store = FarmStore::open(&config.sqlite_path)?;
        Ok(Self {
            store,
            catalog: CropCatalog::default(),
            registry: JobRegistry::standard(now),
            config,
        })
    }

    pub fn open_in_memory(now: DateTime<Utc>) -> Result<Self, StoreError> {
        Ok(Self {
            store: FarmStore::open_in_memory()?,
            catalog: CropCatalog::default(),
            registry: JobRegistry::standard(now),
            config: ServiceConfig::default(),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn store_mut(&mut self) -> &mut FarmStore {
        &mut self.store
    }

    pub fn registry_mut(&mut self) -> &mut JobRegistry {
        &mut self.registry
    }

    pub fn job_status(&self) -> Vec<JobStatus> {
        self.registry.status()
    }

    // -- users --------------------------------------------------------------

    /// First-contact bootstrap: create the account if it does not exist
    /// and process an optional referral code. Existing users just get an
    /// activity touch.
    pub fn initialize_user(
        &mut self,
        user_id: i64,
        profile: &NewUserProfile,
        referral_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<UserRow, ServiceError> {
        if let Some(user) = persistence::get_user(self.store.connection(), user_id)? {
            persistence::touch_activity(self.store.connection(), user_id, now)?;
            return Ok(user);
        }

        let own_code = generate_referral_code(&mut rand::thread_rng());
        let referrer = match referral_code {
            Some(code) => persistence::find_user_by_referral_code(self.store.connection(), code)?,
            None => None,
        };

        self.store.transaction(|tx| {
            persistence::create_user(tx, user_id, profile, &own_code, now)?;
            if let Some(referrer) = &referrer {
                if referrer.user_id != user_id {
                    persistence::record_referral(tx, referrer.user_id, user_id, now)?;
                    let mut ledger = persistence::load_ledger(tx, referrer.user_id)?
                        .ok_or_else(missing_ledger)?;
                    ledger.credit_water(contracts::REFERRAL_BONUS_WATER);
                    persistence::save_ledger(tx, referrer.user_id, &ledger)?;
                }
            }
            persistence::get_user(tx, user_id)?
                .ok_or_else(|| ServiceError::Game(GameError::not_found("User not found")))
        })
    }

    /// Presence and ban check shared by every gameplay entry point.
    pub fn validate_user(&mut self, user_id: i64, now: DateTime<Utc>) -> Result<UserRow, ServiceError> {
        let user = persistence::get_user(self.store.connection(), user_id)?.ok_or_else(|| {
            ServiceError::Game(GameError::not_found(
                "User not found. Please start the game first.",
            ))
        })?;
        if user.is_banned {
            let reason = user
                .ban_reason
                .clone()
                .unwrap_or_else(|| "Violation of terms".to_string());
            return Err(ServiceError::Game(GameError::conflict(format!(
                "Account banned: {reason}"
            ))));
        }
        persistence::touch_activity(self.store.connection(), user_id, now)?;
        Ok(user)
    }

    // -- farm ---------------------------------------------------------------

    pub fn farm_status(&mut self, user_id: i64, now: DateTime<Utc>) -> Result<FarmStatus, ServiceError> {
        self.validate_user(user_id, now)?;
        let conn = self.store.connection();
        let ledger = persistence::load_ledger(conn, user_id)?.ok_or_else(missing_ledger)?;
        let patches = persistence::load_patches(conn, user_id)?;
        let subscriptions = persistence::user_subscriptions(conn, user_id)?;
        let vip_tier = vip::highest_active(&subscriptions, now).map(|sub| sub.tier.as_u8());

        let patch_views = patches
            .iter()
            .map(|plot| PatchView {
                patch_number: plot.patch_number,
                unlocked: plot.unlocked,
                crop: plot.crop,
                ready: plot.ready || plot.is_due(now),
                progress_percent: patch::growth_progress(plot, now),
                seconds_remaining: plot
                    .harvest_due
                    .map(|due| (due - now).num_seconds().max(0))
                    .unwrap_or(0),
            })
            .collect();

        Ok(FarmStatus {
            coins: ledger.coins,
            water: ledger.water,
            heavy_water: ledger.heavy_water,
            boosters: ledger.boosters,
            parts: ledger.parts,
            patches_unlocked: ledger.patches_unlocked,
            vip_tier,
            patches: patch_views,
            can_expand: ledger.patches_unlocked < MAX_PATCHES
                && ledger.parts >= contracts::PARTS_PER_PATCH,
        })
    }

    pub fn plant(
        &mut self,
        user_id: i64,
        patch_number: u8,
        crop: CropKind,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ServiceError> {
        self.validate_user(user_id, now)?;
        validate_patch_number(patch_number)?;
        let spec = self.catalog.spec(crop).clone();
        self.store.transaction(|tx| {
            let mut ledger = persistence::load_ledger(tx, user_id)?.ok_or_else(missing_ledger)?;
            let mut stats = persistence::load_stats(tx, user_id)?.unwrap_or_default();
            let mut plot = persistence::load_patch(tx, user_id, patch_number)?
                .ok_or_else(|| ServiceError::Game(GameError::not_found("Patch not found")))?;

            let due = patch::plant(&mut plot, &mut ledger, &mut stats, &spec, now)
                .map_err(ServiceError::Game)?;

            persistence::save_patch(tx, &plot)?;
            persistence::save_ledger(tx, user_id, &ledger)?;
            persistence::save_stats(tx, user_id, &stats)?;
            Ok(due)
        })
    }

    pub fn apply_booster(
        &mut self,
        user_id: i64,
        patch_number: u8,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ServiceError> {
        self.validate_user(user_id, now)?;
        validate_patch_number(patch_number)?;
        let catalog = self.catalog.clone();
        self.store.transaction(|tx| {
            let mut ledger = persistence::load_ledger(tx, user_id)?.ok_or_else(missing_ledger)?;
            let mut stats = persistence::load_stats(tx, user_id)?.unwrap_or_default();
            let mut plot = persistence::load_patch(tx, user_id, patch_number)?
                .ok_or_else(|| ServiceError::Game(GameError::not_found("Patch not found")))?;
            let spec = plot
                .crop
                .map(|kind| catalog.spec(kind))
                .ok_or_else(|| ServiceError::Game(GameError::conflict("No crop to boost")))?;

            let due = patch::apply_booster(&mut plot, &mut ledger, &mut stats, spec, now)
                .map_err(ServiceError::Game)?;

            persistence::save_patch(tx, &plot)?;
            persistence::save_ledger(tx, user_id, &ledger)?;
            persistence::save_stats(tx, user_id, &stats)?;
            Ok(due)
        })
    }

    pub fn harvest(
        &mut self,
        user_id: i64,
        patch_number: u8,
        now: DateTime<Utc>,
    ) -> Result<i64, ServiceError> {
        self.validate_user(user_id, now)?;
        validate_patch_number(patch_number)?;
        let catalog = self.catalog.clone();
        self.store.transaction(|tx| {
            let mut ledger = persistence::load_ledger(tx, user_id)?.ok_or_else(missing_ledger)?;
            let mut stats = persistence::load_stats(tx, user_id)?.unwrap_or_default();
            let mut plot = persistence::load_patch(tx, user_id, patch_number)?
                .ok_or_else(|| ServiceError::Game(GameError::not_found("Patch not found")))?;
            let spec = plot
                .crop
                .map(|kind| catalog.spec(kind))
                .ok_or_else(|| {
                    ServiceError::Game(GameError::conflict("Nothing planted on this patch"))
                })?;

            let earnings = patch::harvest(&mut plot, &mut ledger, &mut stats, spec)
                .map_err(ServiceError::Game)?;

            persistence::save_patch(tx, &plot)?;
            persistence::save_ledger(tx, user_id, &ledger)?;
            persistence::save_stats(tx, user_id, &stats)?;
            Ok(earnings)
        })
    }

    /// Harvest every ready patch; returns (patches harvested, coins earned).
    pub fn harvest_all(&mut self, user_id: i64, now: DateTime<Utc>) -> Result<(usize, i64), ServiceError> {
        self.validate_user(user_id, now)?;
        let ready: Vec<u8> = persistence::load_patches(self.store.connection(), user_id)?
            .into_iter()
            .filter(|plot| plot.ready)
            .map(|plot| plot.patch_number)
            .collect();

        let mut harvested = 0;
        let mut total = 0;
        for patch_number in ready {
            match self.harvest(user_id, patch_number, now) {
                Ok(earnings) => {
                    harvested += 1;
                    total += earnings;
                }
                Err(ServiceError::Game(_)) => {} // raced or stale; skip this patch
                Err(err) => return Err(err),
            }
        }
        Ok((harvested, total))
    }

    pub fn claim_daily_water(&mut self, user_id: i64, now: DateTime<Utc>) -> Result<i64, ServiceError> {
        self.validate_user(user_id, now)?;
        self.store.transaction(|tx| {
            let mut ledger = persistence::load_ledger(tx, user_id)?.ok_or_else(missing_ledger)?;
            let stored = ledger.claim_daily_water(now).map_err(ServiceError::Game)?;
            persistence::save_ledger(tx, user_id, &ledger)?;
            Ok(stored)
        })
    }

    pub fn watch_ad(&mut self, user_id: i64, now: DateTime<Utc>) -> Result<i64, ServiceError> {
        self.validate_user(user_id, now)?;
        self.store.transaction(|tx| {
            let mut ledger = persistence::load_ledger(tx, user_id)?.ok_or_else(missing_ledger)?;
            let stored = ledger.watch_ad(now).map_err(ServiceError::Game)?;
            persistence::save_ledger(tx, user_id, &ledger)?;
            Ok(stored)
        })
    }

    pub fn convert_heavy_water(
        &mut self,
        user_id: i64,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        self.validate_user(user_id, now)?;
        self.store.transaction(|tx| {
            let mut ledger = persistence::load_ledger(tx, user_id)?.ok_or_else(missing_ledger)?;
            ledger.convert_heavy_water(amount).map_err(ServiceError::Game)?;
            persistence::save_ledger(tx, user_id, &ledger)?;
            Ok(())
        })
    }

    /// Spend ten parts to unlock the next patch slot.
    pub fn expand_farm(&mut self, user_id: i64, now: DateTime<Utc>) -> Result<u8, ServiceError> {
        self.validate_user(user_id, now)?;
        self.store.transaction(|tx| {
            let mut ledger = persistence::load_ledger(tx, user_id)?.ok_or_else(missing_ledger)?;
            let new_number = ledger.unlock_patch().map_err(ServiceError::Game)?;
            persistence::insert_patch(tx, user_id, new_number, true)?;
            persistence::save_ledger(tx, user_id, &ledger)?;
            Ok(new_number)
        })
    }

    // -- shop ---------------------------------------------------------------

    pub fn buy_seeds(
        &mut self,
        user_id: i64,
        crop: CropKind,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, ServiceError> {
        self.validate_user(user_id, now)?;
        if quantity <= 0 {
            return Err(ServiceError::Game(GameError::validation(
                "Quantity must be positive",
            )));
        }
        let Some(price) = self.catalog.spec(crop).seed_price_coins else {
            return Err(ServiceError::Game(GameError::validation(format!(
                "{crop} seeds are not sold for coins"
            ))));
        };
        let total = price * quantity;
        self.store.transaction(|tx| {
            let mut ledger = persistence::load_ledger(tx, user_id)?.ok_or_else(missing_ledger)?;
            ledger.debit_coins(total).map_err(ServiceError::Game)?;
            ledger.add_seeds(crop, quantity);
            persistence::save_ledger(tx, user_id, &ledger)?;
            Ok(total)
        })
    }

    pub fn buy_parts(
        &mut self,
        user_id: i64,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, ServiceError> {
        self.validate_user(user_id, now)?;
        if quantity <= 0 {
            return Err(ServiceError::Game(GameError::validation(
                "Quantity must be positive",
            )));
        }
        let total = PART_PRICE_COINS * quantity;
        self.store.transaction(|tx| {
            let mut ledger = persistence::load_ledger(tx, user_id)?.ok_or_else(missing_ledger)?;
            ledger.debit_coins(total).map_err(ServiceError::Game)?;
            ledger.add_parts(quantity);
            persistence::save_ledger(tx, user_id, &ledger)?;
            Ok(total)
        })
    }

    pub fn buy_boosters(
        &mut self,
        user_id: i64,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, ServiceError> {
        self.validate_user(user_id, now)?;
        if quantity <= 0 {
            return Err(ServiceError::Game(GameError::validation(
                "Quantity must be positive",
            )));
        }
        let total = BOOSTER_PRICE_COINS * quantity;
        self.store.transaction(|tx| {
            let mut ledger = persistence::load_ledger(tx, user_id)?.ok_or_else(missing_ledger)?;
            if ledger.boosters + quantity > BOOSTER_CAP {
                return Err(ServiceError::Game(GameError::conflict(format!(
                    "Booster inventory is full (max {BOOSTER_CAP})"
                ))));
            }
            ledger.debit_coins(total).map_err(ServiceError::Game)?;
            ledger.credit_boosters(quantity);
            persistence::save_ledger(tx, user_id, &ledger)?;
            Ok(total)
        })
    }

    // -- vip ----------------------------------------------------------------

    pub fn purchase_vip(
        &mut self,
        user_id: i64,
        tier: VipTier,
        duration_days: u32,
        now: DateTime<Utc>,
    ) -> Result<i64, ServiceError> {
        let subscription = VipSubscription::purchase(user_id, tier, duration_days, now);
        Ok(persistence::insert_subscription(
            self.store.connection(),
            &subscription,
        )?)
    }

    pub fn vip_overview(&mut self, user_id: i64, now: DateTime<Utc>) -> Result<VipOverview, ServiceError> {
        self.validate_user(user_id, now)?;
        let conn = self.store.connection();
        let subscriptions = persistence::user_subscriptions(conn, user_id)?;
        let Some(active) = vip::highest_active(&subscriptions, now) else {
            return Ok(VipOverview {
                tier: None,
                days_remaining: 0,
                can_claim_daily: false,
            });
        };
        let claimed = persistence::reward_claim_exists(conn, user_id, clock::utc_day(now))?;
        Ok(VipOverview {
            tier: Some(active.tier.as_u8()),
            days_remaining: (active.ends_at - now).num_days(),
            can_claim_daily: !claimed,
        })
    }

    /// Player-initiated daily VIP reward claim. The claim row keyed by
    /// (user, UTC day) is the idempotency guard; a second same-day call
    /// fails deterministically.
    pub fn claim_vip_reward(&mut self, user_id: i64, now: DateTime<Utc>) -> Result<vip::RewardBundle, ServiceError> {
        self.validate_user(user_id, now)?;
        self.store.transaction(|tx| {
            let subscriptions = persistence::user_subscriptions(tx, user_id)?;
            let Some(active) = vip::highest_active(&subscriptions, now) else {
                return Err(ServiceError::Game(GameError::conflict(
                    "No active VIP subscription",
                )));
            };
            let day = clock::utc_day(now);
            if persistence::reward_claim_exists(tx, user_id, day)? {
                return Err(ServiceError::Game(GameError::conflict(
                    "VIP daily reward already claimed today",
                )));
            }

            let bundle = vip::daily_reward_bundle(active.tier, active.started_at, now);
            let tier = active.tier;
            let mut ledger = persistence::load_ledger(tx, user_id)?.ok_or_else(missing_ledger)?;
            bundle.apply(&mut ledger);
            persistence::save_ledger(tx, user_id, &ledger)?;

            let rewards_json = serde_json::to_string(&bundle).map_err(StoreError::from)?;
            persistence::insert_reward_claim(tx, user_id, day, tier, &rewards_json, now)?;
            Ok(bundle)
        })
    }

    // -- contests -----------------------------------------------------------

    pub fn active_contests(&mut self, now: DateTime<Utc>) -> Result<Vec<Contest>, ServiceError> {
        Ok(persistence::active_contests(self.store.connection(), now)?)
    }

    pub fn join_contest(&mut self, user_id: i64, contest_id: i64, now: DateTime<Utc>) -> Result<bool, ServiceError> {
        self.validate_user(user_id, now)?;
        self.store.transaction(|tx| {
            let contest = persistence::load_contest(tx, contest_id)?
                .ok_or_else(|| ServiceError::Game(GameError::not_found("Contest not found")))?;
            contest::validate_join(&contest, now).map_err(ServiceError::Game)?;
            Ok(persistence::join_contest(tx, contest_id, user_id, now)?)
        })
    }

    pub fn record_contest_ad(
        &mut self,
        user_id: i64,
        contest_id: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, ServiceError> {
        self.validate_user(user_id, now)?;
        self.store.transaction(|tx| {
            let contest = persistence::load_contest(tx, contest_id)?
                .ok_or_else(|| ServiceError::Game(GameError::not_found("Contest not found")))?;
            contest::validate_join(&contest, now).map_err(ServiceError::Game)?;
            if !persistence::record_contest_ad(tx, contest_id, user_id)? {
                return Err(ServiceError::Game(GameError::conflict(
                    "Join the contest before watching ads for it",
                )));
            }
            let participation = persistence::get_participation(tx, contest_id, user_id)?
                .ok_or_else(|| ServiceError::Game(GameError::not_found("Contest not found")))?;
            Ok(participation.ads_watched)
        })
    }

    pub fn create_contest(&mut self, contest: &Contest, now: DateTime<Utc>) -> Result<i64, ServiceError> {
        Ok(persistence::insert_contest(self.store.connection(), contest, now)?)
    }

    /// Settle one contest: winner computation, terminal transition, and
    /// every prize credit commit in the same transaction, so an
    /// interrupted settlement replays cleanly from the active state.
    pub fn settle_contest<R: Rng + ?Sized>(
        &mut self,
        contest_id: i64,
        now: DateTime<Utc>,
        force: bool,
        rng: &mut R,
    ) -> Result<SettlementDecision, ServiceError> {
        self.store.transaction(|tx| {
            let Some(contest) = persistence::load_contest(tx, contest_id)? else {
                return Err(ServiceError::Game(GameError::not_found("Contest not found")));
            };
            let participants = persistence::contest_participants(tx, contest_id)?;
            let decision = contest::settle(&contest, &participants, now, force, rng);

            let SettlementDecision::Settled(outcome) = &decision else {
                return Ok(decision);
            };

            if !persistence::record_settlement(tx, contest_id, &outcome.winners)? {
                // Another settle committed first; nothing more to do.
                return Ok(SettlementDecision::AlreadyEnded);
            }

            for award in &outcome.awards {
                let mut ledger =
                    persistence::load_ledger(tx, award.user_id)?.ok_or_else(missing_ledger)?;
                ledger.apply_prize(&award.prize);
                persistence::save_ledger(tx, award.user_id, &ledger)?;

                if let Some(grant) = award.prize.vip {
                    let subscription = VipSubscription::purchase(
                        award.user_id,
                        grant.tier,
                        grant.duration_days,
                        now,
                    );
                    persistence::insert_subscription(tx, &subscription)?;
                }

                if award.placement != contracts::Placement::Participation {
                    let mut stats =
                        persistence::load_stats(tx, award.user_id)?.unwrap_or_default();
                    stats.record_contest_win();
                    persistence::save_stats(tx, award.user_id, &stats)?;
                }

                persistence::enqueue_notification(
                    tx,
                    award.user_id,
                    &format!(
                        "You won the {} contest ({}): {}",
                        contest.kind,
                        award.placement.as_str(),
                        describe_prize(&award.prize),
                    ),
                    NotificationCategory::Contest,
                    NotificationPriority::High,
                    now,
                )?;
            }

            Ok(decision)
        })
    }

    // -- admin --------------------------------------------------------------

    pub fn ban_user(&mut self, user_id: i64, reason: &str, now: DateTime<Utc>) -> Result<(), ServiceError> {
        self.store.transaction(|tx| {
            if !persistence::set_ban(tx, user_id, true, Some(reason))? {
                return Err(ServiceError::Game(GameError::not_found("User not found")));
            }
            persistence::enqueue_notification(
                tx,
                user_id,
                &format!("Your account has been banned. Reason: {reason}"),
                NotificationCategory::Admin,
                NotificationPriority::Urgent,
                now,
            )?;
            Ok(())
        })
    }

    pub fn unban_user(&mut self, user_id: i64, now: DateTime<Utc>) -> Result<(), ServiceError> {
        self.store.transaction(|tx| {
            if !persistence::set_ban(tx, user_id, false, None)? {
                return Err(ServiceError::Game(GameError::not_found("User not found")));
            }
            persistence::enqueue_notification(
                tx,
                user_id,
                "Your account has been unbanned. Welcome back!",
                NotificationCategory::Admin,
                NotificationPriority::High,
                now,
            )?;
            Ok(())
        })
    }

    /// Admin gift: capped like every other ledger credit.
    pub fn gift(
        &mut self,
        user_id: i64,
        kind: GiftKind,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        if amount <= 0 {
            return Err(ServiceError::Game(GameError::validation(
                "Gift amount must be positive",
            )));
        }
        self.store.transaction(|tx| {
            let mut ledger = persistence::load_ledger(tx, user_id)?.ok_or_else(|| {
                ServiceError::Game(GameError::not_found("User not found"))
            })?;
            match kind {
                GiftKind::Coins => ledger.credit_coins(amount),
                GiftKind::Water => {
                    ledger.credit_water(amount);
                }
                GiftKind::Boosters => {
                    ledger.credit_boosters(amount);
                }
                GiftKind::HeavyWater => {
                    ledger.heavy_water =
                        (ledger.heavy_water + amount).min(contracts::HEAVY_WATER_CAP);
                }
            }
            persistence::save_ledger(tx, user_id, &ledger)?;
            persistence::enqueue_notification(
                tx,
                user_id,
                &format!("You received a gift from admin: {amount} {}", kind.as_str()),
                NotificationCategory::Admin,
                NotificationPriority::Normal,
                now,
            )?;
            Ok(())
        })
    }

    pub fn broadcast(
        &mut self,
        audience: BroadcastAudience,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, ServiceError> {
        self.store.transaction(|tx| {
            let ids = persistence::audience_user_ids(tx, audience, now)?;
            for user_id in &ids {
                persistence::enqueue_notification(
                    tx,
                    *user_id,
                    body,
                    NotificationCategory::Admin,
                    NotificationPriority::Normal,
                    now,
                )?;
            }
            Ok(ids.len())
        })
    }

    /// Record a pending VIP purchase awaiting manual payment approval.
    pub fn request_vip_purchase(
        &mut self,
        user_id: i64,
        tier: VipTier,
        now: DateTime<Utc>,
    ) -> Result<i64, ServiceError> {
        self.validate_user(user_id, now)?;
        let price = farm_core::catalog::VipBenefits::for_tier(tier).price_usd;
        Ok(persistence::insert_transaction(
            self.store.connection(),
            user_id,
            "vip_purchase",
            price,
            "USD",
            &format!("VIP {tier} subscription (30 days)"),
            now,
        )?)
    }

    /// Approve a pending payment. A VIP purchase activates the given (or
    /// default) tier; a deposit credits the ledger. Either way the
    /// transaction leaves pending exactly once.
    pub fn approve_payment(
        &mut self,
        transaction_id: i64,
        vip: Option<(VipTier, u32)>,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        self.store.transaction(|tx| {
            let Some(row) = persistence::get_transaction(tx, transaction_id)? else {
                return Err(ServiceError::Game(GameError::not_found("Payment not found")));
            };
            if !persistence::set_transaction_status(tx, transaction_id, "completed", now)? {
                return Err(ServiceError::Game(GameError::conflict(
                    "Payment is not pending",
                )));
            }
            match row.kind.as_str() {
                "vip_purchase" => {
                    let (tier, duration_days) = vip.unwrap_or((VipTier::Tier1, 30));
                    let subscription =
                        VipSubscription::purchase(row.user_id, tier, duration_days, now);
                    persistence::insert_subscription(tx, &subscription)?;
                    persistence::enqueue_notification(
                        tx,
                        row.user_id,
                        &format!("Your VIP {tier} subscription has been activated!"),
                        NotificationCategory::Payment,
                        NotificationPriority::High,
                        now,
                    )?;
                }
                _ => {
                    let mut ledger =
                        persistence::load_ledger(tx, row.user_id)?.ok_or_else(missing_ledger)?;
                    ledger.credit_coins(row.amount);
                    persistence::save_ledger(tx, row.user_id, &ledger)?;
                    persistence::enqueue_notification(
                        tx,
                        row.user_id,
                        &format!("Your deposit of {} {} has been credited.", row.amount, row.currency),
                        NotificationCategory::Payment,
                        NotificationPriority::High,
                        now,
                    )?;
                }
            }
            Ok(())
        })
    }

    /// Escrow a coin withdrawal: the coins leave the ledger now and come
    /// back only if an admin rejects the request.
    pub fn request_withdrawal(
        &mut self,
        user_id: i64,
        amount: i64,
        currency: &str,
        wallet_address: &str,
        now: DateTime<Utc>,
    ) -> Result<i64, ServiceError> {
        self.validate_user(user_id, now)?;
        if amount <= 0 {
            return Err(ServiceError::Game(GameError::validation(
                "Withdrawal amount must be positive",
            )));
        }
        self.store.transaction(|tx| {
            let mut ledger = persistence::load_ledger(tx, user_id)?.ok_or_else(missing_ledger)?;
            ledger.debit_coins(amount).map_err(ServiceError::Game)?;
            persistence::save_ledger(tx, user_id, &ledger)?;
            Ok(persistence::insert_withdrawal(
                tx,
                user_id,
                amount,
                currency,
                wallet_address,
                now,
            )?)
        })
    }

    /// Approve or reject a pending withdrawal; rejection refunds the
    /// escrowed coins in the same transaction.
    pub fn process_withdrawal(
        &mut self,
        withdrawal_id: i64,
        approve: bool,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        self.store.transaction(|tx| {
            let Some(withdrawal) = persistence::get_withdrawal(tx, withdrawal_id)? else {
                return Err(ServiceError::Game(GameError::not_found(
                    "Withdrawal not found",
                )));
            };
            let status = if approve { "approved" } else { "rejected" };
            if !persistence::process_withdrawal(tx, withdrawal_id, status, "admin", notes, now)? {
                return Err(ServiceError::Game(GameError::conflict(
                    "Withdrawal is not pending",
                )));
            }
            let body = if approve {
                format!(
                    "Your withdrawal of {} {} has been approved and processed.",
                    withdrawal.amount, withdrawal.currency
                )
            } else {
                let mut ledger = persistence::load_ledger(tx, withdrawal.user_id)?
                    .ok_or_else(missing_ledger)?;
                ledger.credit_coins(withdrawal.amount);
                persistence::save_ledger(tx, withdrawal.user_id, &ledger)?;
                format!(
                    "Your withdrawal request has been rejected and refunded. Reason: {}",
                    notes.unwrap_or("not specified")
                )
            };
            persistence::enqueue_notification(
                tx,
                withdrawal.user_id,
                &body,
                NotificationCategory::Payment,
                NotificationPriority::High,
                now,
            )?;
            Ok(())
        })
    }

    pub fn reject_payment(
        &mut self,
        transaction_id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        self.store.transaction(|tx| {
            let Some(row) = persistence::get_transaction(tx, transaction_id)? else {
                return Err(ServiceError::Game(GameError::not_found("Payment not found")));
            };
            if !persistence::set_transaction_status(tx, transaction_id, "failed", now)? {
                return Err(ServiceError::Game(GameError::conflict(
                    "Payment is not pending",
                )));
            }
            persistence::enqueue_notification(
                tx,
                row.user_id,
                &format!("Your payment has been rejected. Reason: {reason}"),
                NotificationCategory::Payment,
                NotificationPriority::High,
                now,
            )?;
            Ok(())
        })
    }

    // -- command dispatch ---------------------------------------------------

    /// Execute one decoded player command and render the user-facing
    /// reply. Internal failures are logged here with context and turned
    /// into a generic message.
    pub fn dispatch(
        &mut self,
        user_id: i64,
        command: &PlayerCommand,
        now: DateTime<Utc>,
    ) -> String {
        match self.dispatch_inner(user_id, command, now) {
            Ok(reply) => reply,
            Err(err) => {
                if let ServiceError::Store(store_err) = &err {
                    tracing::error!(
                        user_id,
                        command = ?command,
                        error = %store_err,
                        "command failed on store error"
                    );
                }
                err.user_message()
            }
        }
    }

    fn dispatch_inner(
        &mut self,
        user_id: i64,
        command: &PlayerCommand,
        now: DateTime<Utc>,
    ) -> Result<String, ServiceError> {
        match *command {
            PlayerCommand::Plant { crop, patch_number } => {
                let due = self.plant(user_id, patch_number, crop, now)?;
                Ok(format!(
                    "{crop} planted on patch {patch_number}! Ready at {}",
                    due.format("%Y-%m-%d %H:%M UTC")
                ))
            }
            PlayerCommand::Harvest { patch_number } => {
                let earnings = self.harvest(user_id, patch_number, now)?;
                Ok(format!("Crop harvested! Earned {earnings} coins"))
            }
            PlayerCommand::HarvestAll => {
                let (count, total) = self.harvest_all(user_id, now)?;
                if count == 0 {
                    Ok("No crops ready for harvest".to_string())
                } else {
                    Ok(format!("Harvested {count} crops! Earned {total} coins"))
                }
            }
            PlayerCommand::Boost { patch_number } => {
                let due = self.apply_booster(user_id, patch_number, now)?;
                Ok(format!(
                    "Booster used! New harvest time {}",
                    due.format("%Y-%m-%d %H:%M UTC")
                ))
            }
            PlayerCommand::ClaimDailyWater => {
                let stored = self.claim_daily_water(user_id, now)?;
                Ok(format!("Daily reward claimed! Earned {stored} water drops"))
            }
            PlayerCommand::WatchAd => {
                let stored = self.watch_ad(user_id, now)?;
                Ok(format!("Ad watched! Earned {stored} water drop"))
            }
            PlayerCommand::ConvertHeavyWater { amount } => {
                self.convert_heavy_water(user_id, amount, now)?;
                Ok(format!(
                    "Converted {} water drops to {amount} heavy water",
                    amount * contracts::HEAVY_WATER_CONVERSION_COST
                ))
            }
            PlayerCommand::ExpandFarm => {
                let new_number = self.expand_farm(user_id, now)?;
                Ok(format!("Farm expanded! New patch #{new_number} unlocked"))
            }
            PlayerCommand::BuySeeds { crop, quantity } => {
                let cost = self.buy_seeds(user_id, crop, quantity, now)?;
                Ok(format!("Purchased {quantity}x {crop} seeds for {cost} coins"))
            }
            PlayerCommand::BuyParts { quantity } => {
                let cost = self.buy_parts(user_id, quantity, now)?;
                Ok(format!("Purchased {quantity}x patch parts for {cost} coins"))
            }
            PlayerCommand::BuyBoosters { quantity } => {
                let cost = self.buy_boosters(user_id, quantity, now)?;
                Ok(format!("Purchased {quantity}x boosters for {cost} coins"))
            }
            PlayerCommand::JoinContest { contest_id } => {
                if self.join_contest(user_id, contest_id, now)? {
                    Ok("Successfully joined the contest!".to_string())
                } else {
                    Ok("You are already in this contest".to_string())
                }
            }
            PlayerCommand::RecordContestAd { contest_id } => {
                let watched = self.record_contest_ad(user_id, contest_id, now)?;
                Ok(format!("Contest ad recorded ({watched} watched)"))
            }
            PlayerCommand::ClaimVipReward => {
                let bundle = self.claim_vip_reward(user_id, now)?;
                Ok(format!("VIP daily rewards claimed! {}", describe_bundle(&bundle)))
            }
            PlayerCommand::RequestVipPurchase { tier } => {
                self.request_vip_purchase(user_id, tier, now)?;
                Ok(format!(
                    "VIP {tier} purchase recorded. It activates once the payment is approved."
                ))
            }
        }
    }
}

fn missing_ledger() -> ServiceError {
    // A user row without its ledger row means a failed bootstrap; surface
    // it as corruption rather than a user-facing error.
    ServiceError::Store(StoreError::Corrupt("ledger row missing for user".to_string()))
}

fn validate_patch_number(patch_number: u8) -> Result<(), ServiceError> {
    if patch_number == 0 || patch_number > MAX_PATCHES {
        return Err(ServiceError::Game(GameError::validation(format!(
            "Unknown patch number {patch_number}"
        ))));
    }
    Ok(())
}

fn generate_referral_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("{:08X}", rng.gen::<u32>())
}

fn describe_prize(prize: &PrizeBundle) -> String {
    let mut pieces = Vec::new();
    if prize.coins > 0 {
        pieces.push(format!("{} coins", prize.coins));
    }
    if prize.water > 0 {
        pieces.push(format!("{} water", prize.water));
    }
    if prize.boosters > 0 {
        pieces.push(format!("{} boosters", prize.boosters));
    }
    if let Some(grant) = prize.vip {
        pieces.push(format!("VIP {} for {} days", grant.tier, grant.duration_days));
    }
    if pieces.is_empty() {
        "a participation badge".to_string()
    } else {
        pieces.join(", ")
    }
}

fn describe_bundle(bundle: &vip::RewardBundle) -> String {
    let mut pieces = Vec::new();
    for (count, label) in [
        (bundle.potato_seeds, "potato seeds"),
        (bundle.tomato_seeds, "tomato seeds"),
        (bundle.onion_seeds, "onion seeds"),
        (bundle.carrot_seeds, "carrot seeds"),
        (bundle.water, "water"),
        (bundle.parts, "patch parts"),
    ] {
        if count > 0 {
            pieces.push(format!("{count} {label}"));
        }
    }
    pieces.join(", ")
}

#[cfg(test)]
mod tests;
