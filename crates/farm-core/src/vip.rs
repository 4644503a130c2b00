//! VIP subscription windows and the daily reward cadence.
//!
//! The once-per-day guard lives in the store (a claim row per user and
//! UTC day); this module owns the validity window, the expiry sweep, and
//! the benefit bundle computation including the every-N-days seed grants.

use chrono::{DateTime, Duration, Utc};
use contracts::{CropKind, VipTier};

use serde::Serialize;

use crate::catalog::VipBenefits;
use crate::clock;
use crate::ledger::ResourceLedger;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VipSubscription {
    pub id: i64,
    pub user_id: i64,
    pub tier: VipTier,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub active: bool,
}

impl VipSubscription {
    /// A fresh subscription window starting now.
    pub fn purchase(user_id: i64, tier: VipTier, duration_days: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            user_id,
            tier,
            started_at: now,
            ends_at: now + Duration::days(i64::from(duration_days)),
            active: true,
        }
    }

    /// Active and inside the validity window. The end instant itself is
    /// already expired.
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.active && self.ends_at > now
    }
}

/// Deactivate every subscription whose window has closed. Returns the ids
/// that flipped; rows already inactive are untouched, so repeating the
/// sweep is a no-op.
pub fn expire_sweep(subscriptions: &mut [VipSubscription], now: DateTime<Utc>) -> Vec<i64> {
    let mut expired = Vec::new();
    for subscription in subscriptions.iter_mut() {
        if subscription.active && subscription.ends_at <= now {
            subscription.active = false;
            expired.push(subscription.id);
        }
    }
    expired
}

/// The highest-tier current subscription wins when several overlap.
pub fn highest_active(
    subscriptions: &[VipSubscription],
    now: DateTime<Utc>,
) -> Option<&VipSubscription> {
    subscriptions
        .iter()
        .filter(|subscription| subscription.is_current(now))
        .max_by_key(|subscription| subscription.tier)
}

/// One day's reward for a tier, seeds keyed by crop.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RewardBundle {
    pub potato_seeds: i64,
    pub tomato_seeds: i64,
    pub onion_seeds: i64,
    pub carrot_seeds: i64,
    pub water: i64,
    pub parts: i64,
}

impl RewardBundle {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the bundle through the ledger's capped credits. Returns the
    /// water actually stored (the rest overflowed the cap).
    pub fn apply(&self, ledger: &mut ResourceLedger) -> i64 {
        if self.potato_seeds > 0 {
            ledger.add_seeds(CropKind::Potato, self.potato_seeds);
        }
        if self.tomato_seeds > 0 {
            ledger.add_seeds(CropKind::Tomato, self.tomato_seeds);
        }
        if self.onion_seeds > 0 {
            ledger.add_seeds(CropKind::Onion, self.onion_seeds);
        }
        if self.carrot_seeds > 0 {
            ledger.add_seeds(CropKind::Carrot, self.carrot_seeds);
        }
        if self.parts > 0 {
            ledger.add_parts(self.parts);
        }
        if self.water > 0 {
            ledger.credit_water(self.water)
        } else {
            0
        }
    }
}

/// Compute the bundle a subscription earns today. The special seed grants
/// fire only when whole days since subscription start hit their cadence.
pub fn daily_reward_bundle(
    tier: VipTier,
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> RewardBundle {
    let benefits = VipBenefits::for_tier(tier);
    let days_since_start = clock::days_since(started_at, now).max(0);

    let cadence_hit = |every: Option<i64>| {
        every.map_or(false, |days| days > 0 && days_since_start % days == 0)
    };

    RewardBundle {
        potato_seeds: benefits.daily_potato_seeds,
        tomato_seeds: i64::from(cadence_hit(benefits.tomato_every_days)),
        onion_seeds: benefits.daily_onion_seeds
            + i64::from(cadence_hit(benefits.onion_every_days)),
        carrot_seeds: i64::from(cadence_hit(benefits.carrot_every_days)),
        water: benefits.daily_water,
        parts: benefits.daily_parts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 30, 0).unwrap()
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let mut subscription = VipSubscription::purchase(1, VipTier::Tier2, 30, t0());
        let end = subscription.ends_at;
        subscription.id = 7;

        let mut rows = vec![subscription];
        // One second before the end: still current, sweep leaves it alone.
        assert!(rows[0].is_current(end - Duration::seconds(1)));
        assert!(expire_sweep(&mut rows, end - Duration::seconds(1)).is_empty());

        // Exactly at the end: expired.
        assert_eq!(expire_sweep(&mut rows, end), vec![7]);
        assert!(!rows[0].active);

        // Repeat run is a no-op.
        assert!(expire_sweep(&mut rows, end).is_empty());
    }

    #[test]
    fn highest_tier_wins_among_current_subscriptions() {
        let now = t0();
        let mut low = VipSubscription::purchase(1, VipTier::Tier1, 30, now);
        low.id = 1;
        let mut high = VipSubscription::purchase(1, VipTier::Tier3, 30, now);
        high.id = 2;
        let mut lapsed = VipSubscription::purchase(1, VipTier::Tier4, 30, now);
        lapsed.id = 3;
        lapsed.active = false;

        let rows = vec![low, high, lapsed];
        let later = now + Duration::days(1);
        assert_eq!(highest_active(&rows, later).map(|s| s.id), Some(2));
    }

    #[test]
    fn tier2_tomato_lands_every_second_day() {
        let start = t0();
        for (days, expected) in [(0, 1), (1, 0), (2, 1), (3, 0), (4, 1)] {
            let bundle =
                daily_reward_bundle(VipTier::Tier2, start, start + Duration::days(days));
            assert_eq!(bundle.tomato_seeds, expected, "day {days}");
            assert_eq!(bundle.potato_seeds, 2);
            assert_eq!(bundle.water, 10);
            assert_eq!(bundle.parts, 5);
        }
    }

    #[test]
    fn tier4_stacks_daily_onions_with_carrot_cadence() {
        let start = t0();
        let day3 = daily_reward_bundle(VipTier::Tier4, start, start + Duration::days(3));
        assert_eq!(day3.onion_seeds, 2);
        assert_eq!(day3.carrot_seeds, 1);

        let day4 = daily_reward_bundle(VipTier::Tier4, start, start + Duration::days(4));
        assert_eq!(day4.carrot_seeds, 0);
    }

    #[test]
    fn bundle_water_respects_ledger_cap() {
        let mut ledger = ResourceLedger::starting();
        ledger.water = 95;
        let bundle = daily_reward_bundle(VipTier::Tier2, t0(), t0() + Duration::days(1));
        let stored = bundle.apply(&mut ledger);
        assert_eq!(stored, 5);
        assert_eq!(ledger.water, 100);
        assert_eq!(ledger.seed_count(CropKind::Potato), 1 + 2);
        assert_eq!(ledger.parts, 5);
    }
}
