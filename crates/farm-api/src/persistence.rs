//! SQLite store: schema migrations plus row mapping between tables and
//! the core types.
//!
//! Gameplay mutations never touch the store directly; the service layer
//! wraps each one in [`FarmStore::transaction`] so the read-modify-write
//! either commits whole or rolls back whole.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use contracts::{
    BroadcastAudience, ContestStatus, ContestWinner, CropKind, NotificationCategory,
    NotificationPriority, PrizePool, VipTier,
};
use farm_core::contest::{Contest, ContestParticipant};
use farm_core::ledger::{ResourceLedger, UserStats};
use farm_core::patch::Patch;
use farm_core::vip::VipSubscription;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Serde(serde_json::Error),
    /// A persisted value failed to decode back into its domain type.
    Corrupt(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite error: {err}"),
            Self::Serde(err) => write!(f, "serde error: {err}"),
            Self::Corrupt(detail) => write!(f, "corrupt row: {detail}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

// ---------------------------------------------------------------------------
// Time and enum codecs (text at the SQL edge, typed everywhere else)
// ---------------------------------------------------------------------------

fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn decode_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|err| StoreError::Corrupt(format!("timestamp {raw:?}: {err}")))
}

fn decode_time_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.as_deref().map(decode_time).transpose()
}

fn decode_crop(raw: &str) -> Result<CropKind, StoreError> {
    CropKind::parse(raw).ok_or_else(|| StoreError::Corrupt(format!("crop kind {raw:?}")))
}

fn decode_tier(raw: i64) -> Result<VipTier, StoreError> {
    u8::try_from(raw)
        .ok()
        .and_then(VipTier::from_u8)
        .ok_or_else(|| StoreError::Corrupt(format!("vip tier {raw}")))
}

fn decode_status(raw: &str) -> Result<ContestStatus, StoreError> {
    ContestStatus::parse(raw).ok_or_else(|| StoreError::Corrupt(format!("contest status {raw:?}")))
}

// ---------------------------------------------------------------------------
// Row types without a core struct
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, serde::Serialize, PartialEq, Eq)]
pub struct UserRow {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub language_code: String,
    pub is_banned: bool,
    pub ban_reason: Option<String>,
    pub referral_code: String,
    pub referred_by: Option<i64>,
    pub total_referrals: i64,
    pub registered_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewUserProfile {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub language_code: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, PartialEq, Eq)]
pub struct NotificationRow {
    pub id: i64,
    pub user_id: i64,
    pub body: String,
    pub category: NotificationCategory,
    pub priority: NotificationPriority,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, serde::Serialize, PartialEq, Eq)]
pub struct TransactionRow {
    pub id: i64,
    pub user_id: i64,
    pub kind: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize, PartialEq, Eq)]
pub struct WithdrawalRow {
    pub id: i64,
    pub user_id: i64,
    pub amount: i64,
    pub currency: String,
    pub wallet_address: String,
    pub status: String,
    pub requested_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FarmStore {
    conn: Connection,
}

impl FarmStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let mut store = Self { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    /// Run `f` inside one transaction; commit on `Ok`, roll back on `Err`.
    pub fn transaction<T, E>(
        &mut self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let tx = self.conn.transaction().map_err(StoreError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn configure(&mut self) -> Result<(), StoreError> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn migrate(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                username TEXT,
                first_name TEXT,
                last_name TEXT,
                language_code TEXT NOT NULL DEFAULT 'en',
                is_banned INTEGER NOT NULL DEFAULT 0,
                ban_reason TEXT,
                referral_code TEXT NOT NULL UNIQUE,
                referred_by INTEGER,
                total_referrals INTEGER NOT NULL DEFAULT 0,
                registered_at TEXT NOT NULL,
                last_activity TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ledgers (
                user_id INTEGER PRIMARY KEY REFERENCES users(user_id),
                coins INTEGER NOT NULL DEFAULT 0,
                water INTEGER NOT NULL DEFAULT 0,
                heavy_water INTEGER NOT NULL DEFAULT 0,
                boosters INTEGER NOT NULL DEFAULT 0,
                potato_seeds INTEGER NOT NULL DEFAULT 0,
                tomato_seeds INTEGER NOT NULL DEFAULT 0,
                onion_seeds INTEGER NOT NULL DEFAULT 0,
                carrot_seeds INTEGER NOT NULL DEFAULT 0,
                parts INTEGER NOT NULL DEFAULT 0,
                patches_unlocked INTEGER NOT NULL DEFAULT 3,
                ads_watched_today INTEGER NOT NULL DEFAULT 0,
                ads_watched_total INTEGER NOT NULL DEFAULT 0,
                last_ad_watch TEXT,
                last_daily_claim TEXT
            );

            CREATE TABLE IF NOT EXISTS patches (
                user_id INTEGER NOT NULL REFERENCES users(user_id),
                patch_number INTEGER NOT NULL,
                unlocked INTEGER NOT NULL DEFAULT 1,
                crop TEXT,
                planted_at TEXT,
                harvest_due TEXT,
                ready INTEGER NOT NULL DEFAULT 0,
                boosters_applied INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, patch_number)
            );

            CREATE TABLE IF NOT EXISTS stats (
                user_id INTEGER PRIMARY KEY REFERENCES users(user_id),
                crops_planted INTEGER NOT NULL DEFAULT 0,
                crops_harvested INTEGER NOT NULL DEFAULT 0,
                total_earnings INTEGER NOT NULL DEFAULT 0,
                total_water_used INTEGER NOT NULL DEFAULT 0,
                boosters_used INTEGER NOT NULL DEFAULT 0,
                contests_won INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS vip_subscriptions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(user_id),
                tier INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                ends_at TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS vip_reward_claims (
                user_id INTEGER NOT NULL REFERENCES users(user_id),
                reward_day TEXT NOT NULL,
                tier INTEGER NOT NULL,
                rewards_json TEXT NOT NULL,
                claimed_at TEXT NOT NULL,
                PRIMARY KEY (user_id, reward_day)
            );

            CREATE TABLE IF NOT EXISTS contests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                starts_at TEXT NOT NULL,
                ends_at TEXT NOT NULL,
                entry_cost INTEGER NOT NULL,
                ads_required INTEGER NOT NULL,
                max_participants INTEGER NOT NULL,
                prize_pool_json TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                winners_json TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS contest_participants (
                contest_id INTEGER NOT NULL REFERENCES contests(id),
                user_id INTEGER NOT NULL REFERENCES users(user_id),
                ads_watched INTEGER NOT NULL DEFAULT 0,
                joined_at TEXT NOT NULL,
                PRIMARY KEY (contest_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                body TEXT NOT NULL,
                category TEXT NOT NULL,
                priority TEXT NOT NULL DEFAULT 'normal',
                created_at TEXT NOT NULL,
                sent_at TEXT
            );

            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(user_id),
                kind TEXT NOT NULL,
                amount INTEGER NOT NULL,
                currency TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS withdrawals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(user_id),
                amount INTEGER NOT NULL,
                currency TEXT NOT NULL,
                wallet_address TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                requested_at TEXT NOT NULL,
                processed_at TEXT,
                processed_by TEXT,
                notes TEXT
            );

            CREATE TABLE IF NOT EXISTS referrals (
                referrer_id INTEGER NOT NULL REFERENCES users(user_id),
                referred_id INTEGER NOT NULL REFERENCES users(user_id),
                created_at TEXT NOT NULL,
                PRIMARY KEY (referrer_id, referred_id)
            );

            CREATE INDEX IF NOT EXISTS idx_patches_due
                ON patches(ready, harvest_due);
            CREATE INDEX IF NOT EXISTS idx_vip_active
                ON vip_subscriptions(active, ends_at);
            CREATE INDEX IF NOT EXISTS idx_contests_status
                ON contests(status, ends_at);
            CREATE INDEX IF NOT EXISTS idx_notifications_unsent
                ON notifications(sent_at, created_at);
            ",
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(UserRow, String, String)> {
    Ok((
        UserRow {
            user_id: row.get(0)?,
            username: row.get(1)?,
            first_name: row.get(2)?,
            last_name: row.get(3)?,
            language_code: row.get(4)?,
            is_banned: row.get::<_, i64>(5)? != 0,
            ban_reason: row.get(6)?,
            referral_code: row.get(7)?,
            referred_by: row.get(8)?,
            total_referrals: row.get(9)?,
            registered_at: Utc::now(), // patched below from the raw strings
            last_activity: Utc::now(),
        },
        row.get::<_, String>(10)?,
        row.get::<_, String>(11)?,
    ))
}

const USER_COLUMNS: &str = "user_id, username, first_name, last_name, language_code, \
     is_banned, ban_reason, referral_code, referred_by, total_referrals, \
     registered_at, last_activity";

fn finish_user(raw: (UserRow, String, String)) -> Result<UserRow, StoreError> {
    let (mut user, registered_at, last_activity) = raw;
    user.registered_at = decode_time(&registered_at)?;
    user.last_activity = decode_time(&last_activity)?;
    Ok(user)
}

pub fn get_user(conn: &Connection, user_id: i64) -> Result<Option<UserRow>, StoreError> {
    let raw = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
            params![user_id],
            user_from_row,
        )
        .optional()?;
    raw.map(finish_user).transpose()
}

pub fn find_user_by_referral_code(
    conn: &Connection,
    code: &str,
) -> Result<Option<UserRow>, StoreError> {
    let raw = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE referral_code = ?1"),
            params![code],
            user_from_row,
        )
        .optional()?;
    raw.map(finish_user).transpose()
}

/// Insert the full row set a fresh account needs: user, ledger with the
/// starting balances, the starting patches, and a stats row.
pub fn create_user(
    conn: &Connection,
    user_id: i64,
    profile: &NewUserProfile,
    referral_code: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO users (
            user_id, username, first_name, last_name, language_code,
            referral_code, registered_at, last_activity
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            user_id,
            profile.username,
            profile.first_name,
            profile.last_name,
            profile.language_code.as_deref().unwrap_or("en"),
            referral_code,
            encode_time(now),
        ],
    )?;

    let ledger = ResourceLedger::starting();
    conn.execute(
        "INSERT INTO ledgers (user_id, water, potato_seeds, patches_unlocked)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            user_id,
            ledger.water,
            ledger.seed_count(CropKind::Potato),
            i64::from(ledger.patches_unlocked),
        ],
    )?;

    for patch_number in 1..=ledger.patches_unlocked {
        insert_patch(conn, user_id, patch_number, true)?;
    }

    conn.execute("INSERT INTO stats (user_id) VALUES (?1)", params![user_id])?;
    Ok(())
}

pub fn touch_activity(
    conn: &Connection,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE users SET last_activity = ?2 WHERE user_id = ?1",
        params![user_id, encode_time(now)],
    )?;
    Ok(())
}

pub fn set_ban(
    conn: &Connection,
    user_id: i64,
    banned: bool,
    reason: Option<&str>,
) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE users SET is_banned = ?2, ban_reason = ?3 WHERE user_id = ?1",
        params![user_id, banned as i64, reason],
    )?;
    Ok(changed > 0)
}

pub fn record_referral(
    conn: &Connection,
    referrer_id: i64,
    referred_id: i64,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE users SET referred_by = ?1 WHERE user_id = ?2",
        params![referrer_id, referred_id],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO referrals (referrer_id, referred_id, created_at)
         VALUES (?1, ?2, ?3)",
        params![referrer_id, referred_id, encode_time(now)],
    )?;
    conn.execute(
        "UPDATE users SET total_referrals = total_referrals + 1 WHERE user_id = ?1",
        params![referrer_id],
    )?;
    Ok(())
}

pub fn list_users(
    conn: &Connection,
    search: Option<&str>,
    limit: usize,
    offset: usize,
) -> Result<Vec<UserRow>, StoreError> {
    let like = search.map(|needle| format!("%{needle}%"));
    let mut rows = Vec::new();
    let mut push_row = |raw: (UserRow, String, String)| -> Result<(), StoreError> {
        rows.push(finish_user(raw)?);
        Ok(())
    };

    match &like {
        Some(pattern) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE username LIKE ?1 OR first_name LIKE ?1 OR CAST(user_id AS TEXT) = ?2
                 ORDER BY registered_at DESC LIMIT ?3 OFFSET ?4"
            ))?;
            let mapped = stmt.query_map(
                params![pattern, search, limit as i64, offset as i64],
                user_from_row,
            )?;
            for raw in mapped {
                push_row(raw?)?;
            }
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users
                 ORDER BY registered_at DESC LIMIT ?1 OFFSET ?2"
            ))?;
            let mapped = stmt.query_map(params![limit as i64, offset as i64], user_from_row)?;
            for raw in mapped {
                push_row(raw?)?;
            }
        }
    }
    Ok(rows)
}

pub fn count_users(conn: &Connection) -> Result<i64, StoreError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
}

/// User ids for a broadcast audience segment.
pub fn audience_user_ids(
    conn: &Connection,
    audience: BroadcastAudience,
    now: DateTime<Utc>,
) -> Result<Vec<i64>, StoreError> {
    let mut ids = Vec::new();
    match audience {
        BroadcastAudience::All => {
            let mut stmt = conn.prepare("SELECT user_id FROM users WHERE is_banned = 0")?;
            for row in stmt.query_map([], |row| row.get::<_, i64>(0))? {
                ids.push(row?);
            }
        }
        BroadcastAudience::Vip => {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT user_id FROM vip_subscriptions
                 WHERE active = 1 AND ends_at > ?1",
            )?;
            for row in stmt.query_map(params![encode_time(now)], |row| row.get::<_, i64>(0))? {
                ids.push(row?);
            }
        }
        BroadcastAudience::Active => {
            let cutoff = now - chrono::Duration::days(7);
            let mut stmt =
                conn.prepare("SELECT user_id FROM users WHERE last_activity >= ?1")?;
            for row in stmt.query_map(params![encode_time(cutoff)], |row| row.get::<_, i64>(0))? {
                ids.push(row?);
            }
        }
    }
    Ok(ids)
}

// ---------------------------------------------------------------------------
// Ledgers and stats
// ---------------------------------------------------------------------------

pub fn load_ledger(conn: &Connection, user_id: i64) -> Result<Option<ResourceLedger>, StoreError> {
    let raw = conn
        .query_row(
            "SELECT coins, water, heavy_water, boosters,
                    potato_seeds, tomato_seeds, onion_seeds, carrot_seeds,
                    parts, patches_unlocked, ads_watched_today, ads_watched_total,
                    last_ad_watch, last_daily_claim
             FROM ledgers WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    [
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, i64>(7)?,
                    ],
                    row.get::<_, i64>(8)?,
                    row.get::<_, i64>(9)?,
                    row.get::<_, i64>(10)?,
                    row.get::<_, i64>(11)?,
                    row.get::<_, Option<String>>(12)?,
                    row.get::<_, Option<String>>(13)?,
                ))
            },
        )
        .optional()?;

    let Some((
        coins,
        water,
        heavy_water,
        boosters,
        seed_counts,
        parts,
        patches_unlocked,
        ads_today,
        ads_total,
        last_ad,
        last_claim,
    )) = raw
    else {
        return Ok(None);
    };

    let mut seeds = std::collections::BTreeMap::new();
    for (kind, count) in CropKind::ALL.into_iter().zip(seed_counts) {
        seeds.insert(kind, count);
    }

    Ok(Some(ResourceLedger {
        coins,
        water,
        heavy_water,
        boosters,
        seeds,
        parts,
        patches_unlocked: u8::try_from(patches_unlocked)
            .map_err(|_| StoreError::Corrupt(format!("patches_unlocked {patches_unlocked}")))?,
        ads_watched_today: ads_today,
        ads_watched_total: ads_total,
        last_ad_watch: decode_time_opt(last_ad)?,
        last_daily_claim: decode_time_opt(last_claim)?,
    }))
}

pub fn save_ledger(
    conn: &Connection,
    user_id: i64,
    ledger: &ResourceLedger,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE ledgers SET
            coins = ?2, water = ?3, heavy_water = ?4, boosters = ?5,
            potato_seeds = ?6, tomato_seeds = ?7, onion_seeds = ?8, carrot_seeds = ?9,
            parts = ?10, patches_unlocked = ?11,
            ads_watched_today = ?12, ads_watched_total = ?13,
            last_ad_watch = ?14, last_daily_claim = ?15
         WHERE user_id = ?1",
        params![
            user_id,
            ledger.coins,
            ledger.water,
            ledger.heavy_water,
            ledger.boosters,
            ledger.seed_count(CropKind::Potato),
            ledger.seed_count(CropKind::Tomato),
            ledger.seed_count(CropKind::Onion),
            ledger.seed_count(CropKind::Carrot),
            ledger.parts,
            i64::from(ledger.patches_unlocked),
            ledger.ads_watched_today,
            ledger.ads_watched_total,
            ledger.last_ad_watch.map(encode_time),
            ledger.last_daily_claim.map(encode_time),
        ],
    )?;
    Ok(())
}

pub fn reset_daily_ad_counters(conn: &Connection) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "UPDATE ledgers SET ads_watched_today = 0 WHERE ads_watched_today != 0",
        [],
    )?)
}

pub fn load_stats(conn: &Connection, user_id: i64) -> Result<Option<UserStats>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT crops_planted, crops_harvested, total_earnings,
                    total_water_used, boosters_used, contests_won
             FROM stats WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(UserStats {
                    crops_planted: row.get(0)?,
                    crops_harvested: row.get(1)?,
                    total_earnings: row.get(2)?,
                    total_water_used: row.get(3)?,
                    boosters_used: row.get(4)?,
                    contests_won: row.get(5)?,
                })
            },
        )
        .optional()?)
}

pub fn save_stats(conn: &Connection, user_id: i64, stats: &UserStats) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE stats SET
            crops_planted = ?2, crops_harvested = ?3, total_earnings = ?4,
            total_water_used = ?5, boosters_used = ?6, contests_won = ?7
         WHERE user_id = ?1",
        params![
            user_id,
            stats.crops_planted,
            stats.crops_harvested,
            stats.total_earnings,
            stats.total_water_used,
            stats.boosters_used,
            stats.contests_won,
        ],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Patches
// ---------------------------------------------------------------------------

fn patch_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Patch, Option<String>, Option<String>)> {
    Ok((
        Patch {
            user_id: row.get(0)?,
            patch_number: row.get::<_, i64>(1)? as u8,
            unlocked: row.get::<_, i64>(2)? != 0,
            crop: None, // patched below
            planted_at: None,
            harvest_due: None,
            ready: row.get::<_, i64>(6)? != 0,
            boosters_applied: row.get(7)?,
        },
        row.get::<_, Option<String>>(3)?,
        row.get::<_, Option<String>>(4)?,
    ))
}

const PATCH_COLUMNS: &str =
    "user_id, patch_number, unlocked, crop, planted_at, harvest_due, ready, boosters_applied";

fn finish_patch(
    raw: (Patch, Option<String>, Option<String>),
    harvest_due: Option<String>,
) -> Result<Patch, StoreError> {
    let (mut patch, crop, planted_at) = raw;
    patch.crop = crop.as_deref().map(decode_crop).transpose()?;
    patch.planted_at = decode_time_opt(planted_at)?;
    patch.harvest_due = decode_time_opt(harvest_due)?;
    Ok(patch)
}

fn query_patches(
    conn: &Connection,
    sql: &str,
    bind: impl rusqlite::Params,
) -> Result<Vec<Patch>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let mapped = stmt.query_map(bind, |row| {
        let raw = patch_from_row(row)?;
        let harvest_due = row.get::<_, Option<String>>(5)?;
        Ok((raw, harvest_due))
    })?;
    let mut patches = Vec::new();
    for row in mapped {
        let (raw, harvest_due) = row?;
        patches.push(finish_patch(raw, harvest_due)?);
    }
    Ok(patches)
}

pub fn load_patches(conn: &Connection, user_id: i64) -> Result<Vec<Patch>, StoreError> {
    query_patches(
        conn,
        &format!("SELECT {PATCH_COLUMNS} FROM patches WHERE user_id = ?1 ORDER BY patch_number"),
        params![user_id],
    )
}

pub fn load_patch(
    conn: &Connection,
    user_id: i64,
    patch_number: u8,
) -> Result<Option<Patch>, StoreError> {
    Ok(query_patches(
        conn,
        &format!("SELECT {PATCH_COLUMNS} FROM patches WHERE user_id = ?1 AND patch_number = ?2"),
        params![user_id, i64::from(patch_number)],
    )?
    .into_iter()
    .next())
}

/// Growing patches not yet flagged ready; the time filter runs in core so
/// the sweep logic is the single tested source of truth.
pub fn growing_patches(conn: &Connection) -> Result<Vec<Patch>, StoreError> {
    query_patches(
        conn,
        &format!("SELECT {PATCH_COLUMNS} FROM patches WHERE crop IS NOT NULL AND ready = 0"),
        [],
    )
}

pub fn insert_patch(
    conn: &Connection,
    user_id: i64,
    patch_number: u8,
    unlocked: bool,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO patches (user_id, patch_number, unlocked) VALUES (?1, ?2, ?3)",
        params![user_id, i64::from(patch_number), unlocked as i64],
    )?;
    Ok(())
}

pub fn save_patch(conn: &Connection, patch: &Patch) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE patches SET
            unlocked = ?3, crop = ?4, planted_at = ?5, harvest_due = ?6,
            ready = ?7, boosters_applied = ?8
         WHERE user_id = ?1 AND patch_number = ?2",
        params![
            patch.user_id,
            i64::from(patch.patch_number),
            patch.unlocked as i64,
            patch.crop.map(CropKind::as_str),
            patch.planted_at.map(encode_time),
            patch.harvest_due.map(encode_time),
            patch.ready as i64,
            patch.boosters_applied,
        ],
    )?;
    Ok(())
}

pub fn mark_patches_ready(conn: &Connection, keys: &[(i64, u8)]) -> Result<usize, StoreError> {
    let mut marked = 0;
    for (user_id, patch_number) in keys {
        marked += conn.execute(
            "UPDATE patches SET ready = 1
             WHERE user_id = ?1 AND patch_number = ?2 AND ready = 0",
            params![user_id, i64::from(*patch_number)],
        )?;
    }
    Ok(marked)
}

// ---------------------------------------------------------------------------
// VIP subscriptions and reward claims
// ---------------------------------------------------------------------------

fn subscription_from_row(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<(i64, i64, i64, String, String, bool)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get::<_, i64>(5)? != 0,
    ))
}

fn finish_subscription(
    raw: (i64, i64, i64, String, String, bool),
) -> Result<VipSubscription, StoreError> {
    let (id, user_id, tier, started_at, ends_at, active) = raw;
    Ok(VipSubscription {
        id,
        user_id,
        tier: decode_tier(tier)?,
        started_at: decode_time(&started_at)?,
        ends_at: decode_time(&ends_at)?,
        active,
    })
}

pub fn insert_subscription(
    conn: &Connection,
    subscription: &VipSubscription,
) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO vip_subscriptions (user_id, tier, started_at, ends_at, active)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            subscription.user_id,
            i64::from(subscription.tier.as_u8()),
            encode_time(subscription.started_at),
            encode_time(subscription.ends_at),
            subscription.active as i64,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn user_subscriptions(
    conn: &Connection,
    user_id: i64,
) -> Result<Vec<VipSubscription>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, tier, started_at, ends_at, active
         FROM vip_subscriptions WHERE user_id = ?1 ORDER BY id",
    )?;
    let mapped = stmt.query_map(params![user_id], subscription_from_row)?;
    let mut subscriptions = Vec::new();
    for raw in mapped {
        subscriptions.push(finish_subscription(raw?)?);
    }
    Ok(subscriptions)
}

pub fn active_subscriptions(conn: &Connection) -> Result<Vec<VipSubscription>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, tier, started_at, ends_at, active
         FROM vip_subscriptions WHERE active = 1 ORDER BY id",
    )?;
    let mapped = stmt.query_map([], subscription_from_row)?;
    let mut subscriptions = Vec::new();
    for raw in mapped {
        subscriptions.push(finish_subscription(raw?)?);
    }
    Ok(subscriptions)
}

pub fn deactivate_subscriptions(conn: &Connection, ids: &[i64]) -> Result<usize, StoreError> {
    let mut changed = 0;
    for id in ids {
        changed += conn.execute(
            "UPDATE vip_subscriptions SET active = 0 WHERE id = ?1 AND active = 1",
            params![id],
        )?;
    }
    Ok(changed)
}

pub fn count_active_subscriptions(
    conn: &Connection,
    now: DateTime<Utc>,
) -> Result<i64, StoreError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM vip_subscriptions WHERE active = 1 AND ends_at > ?1",
        params![encode_time(now)],
        |row| row.get(0),
    )?)
}

pub fn reward_claim_exists(
    conn: &Connection,
    user_id: i64,
    day: NaiveDate,
) -> Result<bool, StoreError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM vip_reward_claims WHERE user_id = ?1 AND reward_day = ?2",
            params![user_id, day.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// The idempotency guard: the primary key on (user_id, reward_day) makes
/// a second same-day insert fail, so the claim can never double-apply.
pub fn insert_reward_claim(
    conn: &Connection,
    user_id: i64,
    day: NaiveDate,
    tier: VipTier,
    rewards_json: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO vip_reward_claims (user_id, reward_day, tier, rewards_json, claimed_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            user_id,
            day.to_string(),
            i64::from(tier.as_u8()),
            rewards_json,
            encode_time(now),
        ],
    )?;
    Ok(())
}

pub fn prune_reward_claims(conn: &Connection, before: NaiveDate) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "DELETE FROM vip_reward_claims WHERE reward_day < ?1",
        params![before.to_string()],
    )?)
}

// ---------------------------------------------------------------------------
// Contests
// ---------------------------------------------------------------------------

fn contest_from_row(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<(i64, String, String, String, i64, i64, i64, String, String, Option<String>)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

const CONTEST_COLUMNS: &str = "id, kind, starts_at, ends_at, entry_cost, ads_required, \
     max_participants, prize_pool_json, status, winners_json";

fn finish_contest(
    raw: (i64, String, String, String, i64, i64, i64, String, String, Option<String>),
) -> Result<Contest, StoreError> {
    let (id, kind, starts_at, ends_at, entry_cost, ads_required, max_participants, pool, status, winners) =
        raw;
    Ok(Contest {
        id,
        kind: contracts::ContestKind::parse(&kind)
            .ok_or_else(|| StoreError::Corrupt(format!("contest kind {kind:?}")))?,
        starts_at: decode_time(&starts_at)?,
        ends_at: decode_time(&ends_at)?,
        entry_cost,
        ads_required,
        max_participants,
        prize_pool: serde_json::from_str::<PrizePool>(&pool)?,
        status: decode_status(&status)?,
        winners: winners
            .as_deref()
            .map(serde_json::from_str::<Vec<ContestWinner>>)
            .transpose()?
            .unwrap_or_default(),
    })
}

pub fn insert_contest(
    conn: &Connection,
    contest: &Contest,
    now: DateTime<Utc>,
) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO contests (
            kind, starts_at, ends_at, entry_cost, ads_required,
            max_participants, prize_pool_json, status, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            contest.kind.as_str(),
            encode_time(contest.starts_at),
            encode_time(contest.ends_at),
            contest.entry_cost,
            contest.ads_required,
            contest.max_participants,
            serde_json::to_string(&contest.prize_pool)?,
            contest.status.as_str(),
            encode_time(now),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn load_contest(conn: &Connection, id: i64) -> Result<Option<Contest>, StoreError> {
    let raw = conn
        .query_row(
            &format!("SELECT {CONTEST_COLUMNS} FROM contests WHERE id = ?1"),
            params![id],
            contest_from_row,
        )
        .optional()?;
    raw.map(finish_contest).transpose()
}

fn query_contests(
    conn: &Connection,
    sql: &str,
    bind: impl rusqlite::Params,
) -> Result<Vec<Contest>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let mapped = stmt.query_map(bind, contest_from_row)?;
    let mut contests = Vec::new();
    for raw in mapped {
        contests.push(finish_contest(raw?)?);
    }
    Ok(contests)
}

pub fn active_contests(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<Contest>, StoreError> {
    query_contests(
        conn,
        &format!(
            "SELECT {CONTEST_COLUMNS} FROM contests
             WHERE status = 'active' AND ends_at > ?1 ORDER BY ends_at"
        ),
        params![encode_time(now)],
    )
}

/// Active contests whose window has closed: the settlement sweep's input.
pub fn ending_contests(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<Contest>, StoreError> {
    query_contests(
        conn,
        &format!(
            "SELECT {CONTEST_COLUMNS} FROM contests
             WHERE status = 'active' AND ends_at <= ?1 ORDER BY ends_at"
        ),
        params![encode_time(now)],
    )
}

pub fn count_contests(conn: &Connection, status: ContestStatus) -> Result<i64, StoreError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM contests WHERE status = ?1",
        params![status.as_str()],
        |row| row.get(0),
    )?)
}

/// Flip a contest to ended with its winner list. Guarded on status so the
/// terminal transition happens at most once.
pub fn record_settlement(
    conn: &Connection,
    contest_id: i64,
    winners: &[ContestWinner],
) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE contests SET status = 'ended', winners_json = ?2
         WHERE id = ?1 AND status = 'active'",
        params![contest_id, serde_json::to_string(winners)?],
    )?;
    Ok(changed > 0)
}

pub fn prune_ended_contests(conn: &Connection, before: DateTime<Utc>) -> Result<usize, StoreError> {
    conn.execute(
        "DELETE FROM contest_participants WHERE contest_id IN
             (SELECT id FROM contests WHERE status = 'ended' AND ends_at < ?1)",
        params![encode_time(before)],
    )?;
    Ok(conn.execute(
        "DELETE FROM contests WHERE status = 'ended' AND ends_at < ?1",
        params![encode_time(before)],
    )?)
}

pub fn join_contest(
    conn: &Connection,
    contest_id: i64,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO contest_participants (contest_id, user_id, joined_at)
         VALUES (?1, ?2, ?3)",
        params![contest_id, user_id, encode_time(now)],
    )?;
    Ok(inserted > 0)
}

pub fn get_participation(
    conn: &Connection,
    contest_id: i64,
    user_id: i64,
) -> Result<Option<ContestParticipant>, StoreError> {
    let raw = conn
        .query_row(
            "SELECT contest_id, user_id, ads_watched, joined_at
             FROM contest_participants WHERE contest_id = ?1 AND user_id = ?2",
            params![contest_id, user_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;
    raw.map(|(contest_id, user_id, ads_watched, joined_at)| {
        Ok(ContestParticipant {
            contest_id,
            user_id,
            ads_watched,
            joined_at: decode_time(&joined_at)?,
        })
    })
    .transpose()
}

pub fn contest_participants(
    conn: &Connection,
    contest_id: i64,
) -> Result<Vec<ContestParticipant>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT contest_id, user_id, ads_watched, joined_at
         FROM contest_participants WHERE contest_id = ?1 ORDER BY joined_at",
    )?;
    let mapped = stmt.query_map(params![contest_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;
    let mut participants = Vec::new();
    for raw in mapped {
        let (contest_id, user_id, ads_watched, joined_at) = raw?;
        participants.push(ContestParticipant {
            contest_id,
            user_id,
            ads_watched,
            joined_at: decode_time(&joined_at)?,
        });
    }
    Ok(participants)
}

pub fn record_contest_ad(
    conn: &Connection,
    contest_id: i64,
    user_id: i64,
) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE contest_participants SET ads_watched = ads_watched + 1
         WHERE contest_id = ?1 AND user_id = ?2",
        params![contest_id, user_id],
    )?;
    Ok(changed > 0)
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

pub fn enqueue_notification(
    conn: &Connection,
    user_id: i64,
    body: &str,
    category: NotificationCategory,
    priority: NotificationPriority,
    now: DateTime<Utc>,
) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO notifications (user_id, body, category, priority, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            user_id,
            body,
            category.as_str(),
            priority.as_str(),
            encode_time(now),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Unsent notifications, urgent first, oldest first within a priority.
pub fn pending_notifications(
    conn: &Connection,
    limit: usize,
) -> Result<Vec<NotificationRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, body, category, priority, created_at, sent_at
         FROM notifications WHERE sent_at IS NULL
         ORDER BY CASE priority
             WHEN 'urgent' THEN 2 WHEN 'high' THEN 1 ELSE 0 END DESC,
             created_at ASC
         LIMIT ?1",
    )?;
    let mapped = stmt.query_map(params![limit as i64], notification_from_row)?;
    let mut notifications = Vec::new();
    for raw in mapped {
        notifications.push(finish_notification(raw?)?);
    }
    Ok(notifications)
}

fn notification_from_row(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<(i64, i64, String, String, String, String, Option<String>)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn finish_notification(
    raw: (i64, i64, String, String, String, String, Option<String>),
) -> Result<NotificationRow, StoreError> {
    let (id, user_id, body, category, priority, created_at, sent_at) = raw;
    Ok(NotificationRow {
        id,
        user_id,
        body,
        category: NotificationCategory::parse(&category)
            .ok_or_else(|| StoreError::Corrupt(format!("notification category {category:?}")))?,
        priority: NotificationPriority::parse(&priority)
            .ok_or_else(|| StoreError::Corrupt(format!("notification priority {priority:?}")))?,
        created_at: decode_time(&created_at)?,
        sent_at: decode_time_opt(sent_at)?,
    })
}

/// Mark a notification delivered. Guarded on `sent_at IS NULL` so a row is
/// consumed at most once even if two drains race.
pub fn mark_notification_sent(
    conn: &Connection,
    id: i64,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE notifications SET sent_at = ?2 WHERE id = ?1 AND sent_at IS NULL",
        params![id, encode_time(now)],
    )?;
    Ok(changed > 0)
}

pub fn recent_notifications(
    conn: &Connection,
    limit: usize,
) -> Result<Vec<NotificationRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, body, category, priority, created_at, sent_at
         FROM notifications ORDER BY created_at DESC LIMIT ?1",
    )?;
    let mapped = stmt.query_map(params![limit as i64], notification_from_row)?;
    let mut notifications = Vec::new();
    for raw in mapped {
        notifications.push(finish_notification(raw?)?);
    }
    Ok(notifications)
}

// ---------------------------------------------------------------------------
// Transactions and withdrawals
// ---------------------------------------------------------------------------

pub fn insert_transaction(
    conn: &Connection,
    user_id: i64,
    kind: &str,
    amount: i64,
    currency: &str,
    description: &str,
    now: DateTime<Utc>,
) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO transactions (user_id, kind, amount, currency, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![user_id, kind, amount, currency, description, encode_time(now)],
    )?;
    Ok(conn.last_insert_rowid())
}

fn transaction_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(TransactionRow, String)> {
    Ok((
        TransactionRow {
            id: row.get(0)?,
            user_id: row.get(1)?,
            kind: row.get(2)?,
            amount: row.get(3)?,
            currency: row.get(4)?,
            status: row.get(5)?,
            description: row.get(6)?,
            created_at: Utc::now(), // patched below
        },
        row.get::<_, String>(7)?,
    ))
}

fn finish_transaction(raw: (TransactionRow, String)) -> Result<TransactionRow, StoreError> {
    let (mut row, created_at) = raw;
    row.created_at = decode_time(&created_at)?;
    Ok(row)
}

pub fn get_transaction(conn: &Connection, id: i64) -> Result<Option<TransactionRow>, StoreError> {
    let raw = conn
        .query_row(
            "SELECT id, user_id, kind, amount, currency, status, description, created_at
             FROM transactions WHERE id = ?1",
            params![id],
            transaction_from_row,
        )
        .optional()?;
    raw.map(finish_transaction).transpose()
}

pub fn pending_transactions(
    conn: &Connection,
    kind: &str,
) -> Result<Vec<TransactionRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, kind, amount, currency, status, description, created_at
         FROM transactions WHERE kind = ?1 AND status = 'pending' ORDER BY created_at",
    )?;
    let mapped = stmt.query_map(params![kind], transaction_from_row)?;
    let mut rows = Vec::new();
    for raw in mapped {
        rows.push(finish_transaction(raw?)?);
    }
    Ok(rows)
}

pub fn set_transaction_status(
    conn: &Connection,
    id: i64,
    status: &str,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let completed_at = (status == "completed").then(|| encode_time(now));
    let changed = conn.execute(
        "UPDATE transactions SET status = ?2, completed_at = COALESCE(?3, completed_at)
         WHERE id = ?1 AND status = 'pending'",
        params![id, status, completed_at],
    )?;
    Ok(changed > 0)
}

pub fn insert_withdrawal(
    conn: &Connection,
    user_id: i64,
    amount: i64,
    currency: &str,
    wallet_address: &str,
    now: DateTime<Utc>,
) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO withdrawals (user_id, amount, currency, wallet_address, requested_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user_id, amount, currency, wallet_address, encode_time(now)],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_withdrawal(conn: &Connection, id: i64) -> Result<Option<WithdrawalRow>, StoreError> {
    let raw = conn
        .query_row(
            "SELECT id, user_id, amount, currency, wallet_address, status, requested_at
             FROM withdrawals WHERE id = ?1",
            params![id],
            withdrawal_from_row,
        )
        .optional()?;
    raw.map(finish_withdrawal).transpose()
}

fn withdrawal_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(WithdrawalRow, String)> {
    Ok((
        WithdrawalRow {
            id: row.get(0)?,
            user_id: row.get(1)?,
            amount: row.get(2)?,
            currency: row.get(3)?,
            wallet_address: row.get(4)?,
            status: row.get(5)?,
            requested_at: Utc::now(), // patched below
        },
        row.get::<_, String>(6)?,
    ))
}

fn finish_withdrawal(raw: (WithdrawalRow, String)) -> Result<WithdrawalRow, StoreError> {
    let (mut row, requested_at) = raw;
    row.requested_at = decode_time(&requested_at)?;
    Ok(row)
}

pub fn pending_withdrawals(conn: &Connection) -> Result<Vec<WithdrawalRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, amount, currency, wallet_address, status, requested_at
         FROM withdrawals WHERE status = 'pending' ORDER BY requested_at",
    )?;
    let mapped = stmt.query_map([], withdrawal_from_row)?;
    let mut rows = Vec::new();
    for raw in mapped {
        rows.push(finish_withdrawal(raw?)?);
    }
    Ok(rows)
}

pub fn process_withdrawal(
    conn: &Connection,
    id: i64,
    status: &str,
    processed_by: &str,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE withdrawals SET
            status = ?2, processed_at = ?3, processed_by = ?4, notes = ?5
         WHERE id = ?1 AND status = 'pending'",
        params![id, status, encode_time(now), processed_by, notes],
    )?;
    Ok(changed > 0)
}

// ---------------------------------------------------------------------------
// Aggregates for the admin dashboard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, serde::Serialize, PartialEq, Eq)]
pub struct OverviewCounts {
    pub total_users: i64,
    pub new_today: i64,
    pub active_today: i64,
    pub crops_planted: i64,
    pub crops_harvested: i64,
    pub active_crops: i64,
    pub active_vips: i64,
    pub active_contests: i64,
    pub pending_withdrawals: i64,
    pub unsent_notifications: i64,
}

pub fn overview_counts(conn: &Connection, now: DateTime<Utc>) -> Result<OverviewCounts, StoreError> {
    let day = farm_core::clock::day_start(now);
    let single = |sql: &str, bind: &[&dyn rusqlite::ToSql]| -> Result<i64, StoreError> {
        Ok(conn.query_row(sql, bind, |row| row.get::<_, Option<i64>>(0))?.unwrap_or(0))
    };
    let day_text = encode_time(day);
    let now_text = encode_time(now);

    Ok(OverviewCounts {
        total_users: single("SELECT COUNT(*) FROM users", &[])?,
        new_today: single(
            "SELECT COUNT(*) FROM users WHERE registered_at >= ?1",
            &[&day_text],
        )?,
        active_today: single(
            "SELECT COUNT(*) FROM users WHERE last_activity >= ?1",
            &[&day_text],
        )?,
        crops_planted: single("SELECT SUM(crops_planted) FROM stats", &[])?,
        crops_harvested: single("SELECT SUM(crops_harvested) FROM stats", &[])?,
        active_crops: single("SELECT COUNT(*) FROM patches WHERE crop IS NOT NULL", &[])?,
        active_vips: single(
            "SELECT COUNT(*) FROM vip_subscriptions WHERE active = 1 AND ends_at > ?1",
            &[&now_text],
        )?,
        active_contests: single(
            "SELECT COUNT(*) FROM contests WHERE status = 'active'",
            &[],
        )?,
        pending_withdrawals: single(
            "SELECT COUNT(*) FROM withdrawals WHERE status = 'pending'",
            &[],
        )?,
        unsent_notifications: single(
            "SELECT COUNT(*) FROM notifications WHERE sent_at IS NULL",
            &[],
        )?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use contracts::ContestKind;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn store_with_user(user_id: i64) -> FarmStore {
        let store = FarmStore::open_in_memory().expect("open store");
        create_user(
            store.connection(),
            user_id,
            &NewUserProfile::default(),
            &format!("CODE{user_id:04}"),
            t0(),
        )
        .expect("create user");
        store
    }

    #[test]
    fn fresh_user_has_starting_rows() {
        let store = store_with_user(7);
        let conn = store.connection();

        let ledger = load_ledger(conn, 7).unwrap().expect("ledger row");
        assert_eq!(ledger, ResourceLedger::starting());

        let patches = load_patches(conn, 7).unwrap();
        assert_eq!(patches.len(), 3);
        assert!(patches.iter().all(|patch| patch.unlocked && patch.is_empty()));

        assert_eq!(load_stats(conn, 7).unwrap(), Some(UserStats::default()));
    }

    #[test]
    fn ledger_round_trips_through_sql() {
        let mut store = store_with_user(7);
        let mut ledger = load_ledger(store.connection(), 7).unwrap().unwrap();
        ledger.coins = 123;
        ledger.heavy_water = 2;
        ledger.add_seeds(CropKind::Carrot, 4);
        ledger.last_ad_watch = Some(t0());

        store
            .transaction::<_, StoreError>(|tx| save_ledger(tx, 7, &ledger))
            .unwrap();
        assert_eq!(load_ledger(store.connection(), 7).unwrap().unwrap(), ledger);
    }

    #[test]
    fn patch_round_trips_with_crop_fields() {
        let mut store = store_with_user(7);
        let mut patch = load_patch(store.connection(), 7, 1).unwrap().unwrap();
        patch.crop = Some(CropKind::Tomato);
        patch.planted_at = Some(t0());
        patch.harvest_due = Some(t0() + chrono::Duration::hours(48));
        patch.boosters_applied = 3;

        store
            .transaction::<_, StoreError>(|tx| save_patch(tx, &patch))
            .unwrap();
        let loaded = load_patch(store.connection(), 7, 1).unwrap().unwrap();
        assert_eq!(loaded, patch);
        assert!(loaded.invariant_holds());
    }

    #[test]
    fn mark_ready_skips_already_ready_rows() {
        let mut store = store_with_user(7);
        let mut patch = load_patch(store.connection(), 7, 1).unwrap().unwrap();
        patch.crop = Some(CropKind::Potato);
        patch.planted_at = Some(t0());
        patch.harvest_due = Some(t0());
        store
            .transaction::<_, StoreError>(|tx| save_patch(tx, &patch))
            .unwrap();

        assert_eq!(mark_patches_ready(store.connection(), &[(7, 1)]).unwrap(), 1);
        assert_eq!(mark_patches_ready(store.connection(), &[(7, 1)]).unwrap(), 0);
    }

    #[test]
    fn second_reward_claim_same_day_is_rejected_by_the_key() {
        let store = store_with_user(7);
        let conn = store.connection();
        let day = t0().date_naive();
        insert_reward_claim(conn, 7, day, VipTier::Tier2, "{}", t0()).unwrap();
        assert!(reward_claim_exists(conn, 7, day).unwrap());
        assert!(insert_reward_claim(conn, 7, day, VipTier::Tier2, "{}", t0()).is_err());
    }

    #[test]
    fn contest_round_trip_and_single_settlement() {
        let store = store_with_user(7);
        let conn = store.connection();
        let contest = Contest::scheduled(ContestKind::Weekly, t0());
        let id = insert_contest(conn, &contest, t0()).unwrap();

        let loaded = load_contest(conn, id).unwrap().unwrap();
        assert_eq!(loaded.kind, ContestKind::Weekly);
        assert_eq!(loaded.prize_pool, contest.prize_pool);
        assert_eq!(loaded.status, ContestStatus::Active);

        assert!(record_settlement(conn, id, &[]).unwrap());
        // Terminal transition only happens once.
        assert!(!record_settlement(conn, id, &[]).unwrap());
        let ended = load_contest(conn, id).unwrap().unwrap();
        assert_eq!(ended.status, ContestStatus::Ended);
    }

    #[test]
    fn joining_twice_creates_one_participant_row() {
        let store = store_with_user(7);
        let conn = store.connection();
        let id = insert_contest(conn, &Contest::scheduled(ContestKind::Daily, t0()), t0()).unwrap();

        assert!(join_contest(conn, id, 7, t0()).unwrap());
        assert!(!join_contest(conn, id, 7, t0()).unwrap());
        assert_eq!(contest_participants(conn, id).unwrap().len(), 1);

        assert!(record_contest_ad(conn, id, 7).unwrap());
        let participation = get_participation(conn, id, 7).unwrap().unwrap();
        assert_eq!(participation.ads_watched, 1);
    }

    #[test]
    fn notification_drain_order_and_single_consumption() {
        let store = store_with_user(7);
        let conn = store.connection();
        enqueue_notification(
            conn,
            7,
            "low",
            NotificationCategory::System,
            NotificationPriority::Normal,
            t0(),
        )
        .unwrap();
        let urgent_id = enqueue_notification(
            conn,
            7,
            "urgent",
            NotificationCategory::Payment,
            NotificationPriority::Urgent,
            t0() + chrono::Duration::seconds(5),
        )
        .unwrap();

        let pending = pending_notifications(conn, 10).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, urgent_id, "urgent drains first");

        assert!(mark_notification_sent(conn, urgent_id, t0()).unwrap());
        assert!(!mark_notification_sent(conn, urgent_id, t0()).unwrap());
        assert_eq!(pending_notifications(conn, 10).unwrap().len(), 1);
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let mut store = store_with_user(7);
        let result = store.transaction::<(), StoreError>(|tx| {
            let mut ledger = load_ledger(tx, 7)?.expect("ledger");
            ledger.coins = 999;
            save_ledger(tx, 7, &ledger)?;
            Err(StoreError::Corrupt("forced rollback".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(load_ledger(store.connection(), 7).unwrap().unwrap().coins, 0);
    }

    #[test]
    fn overview_counts_cover_fresh_state() {
        let store = store_with_user(7);
        let counts = overview_counts(store.connection(), t0()).unwrap();
        assert_eq!(counts.total_users, 1);
        assert_eq!(counts.new_today, 1);
        assert_eq!(counts.active_crops, 0);
        assert_eq!(counts.pending_withdrawals, 0);
    }
}
