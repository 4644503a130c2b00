//! Per-user resource counters with bounds-checked mutation.
//!
//! Every operation validates before it mutates, so a returned error means
//! the ledger is byte-for-byte what it was before the call. Water and
//! booster credits saturate at their caps; debits below zero are refused.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use contracts::{
    CropKind, PrizeBundle, AD_COOLDOWN_SECS, BOOSTER_CAP, DAILY_AD_CAP, DAILY_WATER_REWARD,
    HEAVY_WATER_CAP, HEAVY_WATER_CONVERSION_COST, MAX_PATCHES, PARTS_PER_PATCH, WATER_CAP,
};

use serde::Serialize;

use crate::clock;
use crate::error::GameError;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResourceLedger {
    pub coins: i64,
    pub water: i64,
    pub heavy_water: i64,
    pub boosters: i64,
    pub seeds: BTreeMap<CropKind, i64>,
    pub parts: i64,
    pub patches_unlocked: u8,
    pub ads_watched_today: i64,
    pub ads_watched_total: i64,
    pub last_ad_watch: Option<DateTime<Utc>>,
    pub last_daily_claim: Option<DateTime<Utc>>,
}

impl ResourceLedger {
    /// Starting balances for a fresh account: one potato seed, ten water
    /// drops, three unlocked patches.
    pub fn starting() -> Self {
        let mut seeds: BTreeMap<CropKind, i64> =
            CropKind::ALL.into_iter().map(|kind| (kind, 0)).collect();
        seeds.insert(CropKind::Potato, 1);
        Self {
            coins: 0,
            water: 10,
            heavy_water: 0,
            boosters: 0,
            seeds,
            parts: 0,
            patches_unlocked: contracts::STARTING_PATCHES,
            ads_watched_today: 0,
            ads_watched_total: 0,
            last_ad_watch: None,
            last_daily_claim: None,
        }
    }

    pub fn seed_count(&self, kind: CropKind) -> i64 {
        self.seeds.get(&kind).copied().unwrap_or(0)
    }

    // -- coins --------------------------------------------------------------

    pub fn credit_coins(&mut self, amount: i64) {
        self.coins = self.coins.saturating_add(amount.max(0));
    }

    pub fn debit_coins(&mut self, amount: i64) -> Result<(), GameError> {
        if self.coins < amount {
            return Err(GameError::insufficient(format!(
                "Not enough coins. Need {amount}, have {}",
                self.coins
            )));
        }
        self.coins -= amount;
        Ok(())
    }

    // -- water --------------------------------------------------------------

    /// Credit regular water, saturating at the storage cap. Returns the
    /// amount actually stored.
    pub fn credit_water(&mut self, amount: i64) -> i64 {
        let stored = (self.water + amount.max(0)).min(WATER_CAP) - self.water;
        self.water += stored;
        stored
    }

    pub fn debit_water(&mut self, amount: i64) -> Result<(), GameError> {
        if self.water < amount {
            return Err(GameError::insufficient(format!(
                "Need {amount} water drops, have {}",
                self.water
            )));
        }
        self.water -= amount;
        Ok(())
    }

    pub fn debit_heavy_water(&mut self, amount: i64) -> Result<(), GameError> {
        if self.heavy_water < amount {
            return Err(GameError::insufficient(format!(
                "Need {amount} heavy water, have {}",
                self.heavy_water
            )));
        }
        self.heavy_water -= amount;
        Ok(())
    }

    /// Distill regular water into heavy water. Unlike prize credits this
    /// refuses instead of capping: the player should not burn 100 drops
    /// for nothing.
    pub fn convert_heavy_water(&mut self, amount: i64) -> Result<(), GameError> {
        if amount <= 0 {
            return Err(GameError::validation("Conversion amount must be positive"));
        }
        let cost = amount * HEAVY_WATER_CONVERSION_COST;
        if self.water < cost {
            return Err(GameError::insufficient(format!(
                "Need {cost} water drops to create {amount} heavy water"
            )));
        }
        if self.heavy_water + amount > HEAVY_WATER_CAP {
            return Err(GameError::conflict(format!(
                "Heavy water storage is full (max {HEAVY_WATER_CAP})"
            )));
        }
        self.water -= cost;
        self.heavy_water += amount;
        Ok(())
    }

    // -- boosters -----------------------------------------------------------

    /// Credit boosters, saturating at the inventory cap. Returns the
    /// amount actually stored.
    pub fn credit_boosters(&mut self, amount: i64) -> i64 {
        let stored = (self.boosters + amount.max(0)).min(BOOSTER_CAP) - self.boosters;
        self.boosters += stored;
        stored
    }

    pub fn debit_booster(&mut self) -> Result<(), GameError> {
        if self.boosters < 1 {
            return Err(GameError::insufficient("No boosters available"));
        }
        self.boosters -= 1;
        Ok(())
    }

    // -- seeds and parts ----------------------------------------------------

    pub fn add_seeds(&mut self, kind: CropKind, amount: i64) {
        *self.seeds.entry(kind).or_insert(0) += amount.max(0);
    }

    pub fn debit_seed(&mut self, kind: CropKind) -> Result<(), GameError> {
        let count = self.seed_count(kind);
        if count < 1 {
            return Err(GameError::insufficient(format!(
                "No {kind} seeds available"
            )));
        }
        self.seeds.insert(kind, count - 1);
        Ok(())
    }

    pub fn add_parts(&mut self, amount: i64) {
        self.parts = self.parts.saturating_add(amount.max(0));
    }

    /// Consume parts to unlock the next patch slot. Returns the new patch
    /// number.
    pub fn unlock_patch(&mut self) -> Result<u8, GameError> {
        if self.patches_unlocked >= MAX_PATCHES {
            return Err(GameError::conflict("Maximum patches reached"));
        }
        if self.parts < PARTS_PER_PATCH {
            return Err(GameError::insufficient(format!(
                "Need {PARTS_PER_PATCH} patch parts. You have {}",
                self.parts
            )));
        }
        self.parts -= PARTS_PER_PATCH;
        self.patches_unlocked += 1;
        Ok(self.patches_unlocked)
    }

    // -- daily claims and ads -----------------------------------------------

    /// Daily water check-in. One claim per UTC calendar day; also resets
    /// the rewarded-ad counter, matching the day rollover.
    pub fn claim_daily_water(&mut self, now: DateTime<Utc>) -> Result<i64, GameError> {
        if let Some(last) = self.last_daily_claim {
            if clock::same_utc_day(last, now) {
                return Err(GameError::conflict("Daily reward already claimed today"));
            }
        }
        let stored = self.credit_water(DAILY_WATER_REWARD);
        self.last_daily_claim = Some(now);
        self.ads_watched_today = 0;
        Ok(stored)
    }

    /// Rewarded ad watch: one water drop, cooldown- and cap-limited.
    pub fn watch_ad(&mut self, now: DateTime<Utc>) -> Result<i64, GameError> {
        if let Some(last) = self.last_ad_watch {
            if now - last < Duration::seconds(AD_COOLDOWN_SECS) {
                return Err(GameError::conflict("Ad cooldown active"));
            }
        }
        if self.ads_watched_today >= DAILY_AD_CAP {
            return Err(GameError::conflict("Daily ad limit reached"));
        }
        let stored = self.credit_water(1);
        self.last_ad_watch = Some(now);
        self.ads_watched_today += 1;
        self.ads_watched_total += 1;
        Ok(stored)
    }

    /// Apply the ledger-denominated part of a prize bundle: coins plus
    /// capped water and boosters. VIP grants are handled by the
    /// subscription tracker.
    pub fn apply_prize(&mut self, prize: &PrizeBundle) {
        if prize.coins > 0 {
            self.credit_coins(prize.coins);
        }
        if prize.water > 0 {
            self.credit_water(prize.water);
        }
        if prize.boosters > 0 {
            self.credit_boosters(prize.boosters);
        }
    }
}

/// Lifetime gameplay counters, bumped alongside the actions they count.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct UserStats {
    pub crops_planted: i64,
    pub crops_harvested: i64,
    pub total_earnings: i64,
    pub total_water_used: i64,
    pub boosters_used: i64,
    pub contests_won: i64,
}

impl UserStats {
    pub fn record_plant(&mut self, water_used: i64) {
        self.crops_planted += 1;
        self.total_water_used += water_used;
    }

    pub fn record_harvest(&mut self, earnings: i64) {
        self.crops_harvested += 1;
        self.total_earnings += earnings;
    }

    pub fn record_booster(&mut self) {
        self.boosters_used += 1;
    }

    pub fn record_contest_win(&mut self) {
        self.contests_won += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, h, m, 0).unwrap()
    }

    #[test]
    fn water_credit_saturates_at_cap() {
        let mut ledger = ResourceLedger::starting();
        ledger.water = 95;
        assert_eq!(ledger.credit_water(10), 5);
        assert_eq!(ledger.water, WATER_CAP);
    }

    #[test]
    fn failed_debit_leaves_ledger_unchanged() {
        let mut ledger = ResourceLedger::starting();
        ledger.coins = 30;
        let before = ledger.clone();
        assert!(ledger.debit_coins(50).is_err());
        assert!(ledger.debit_water(999).is_err());
        assert!(ledger.debit_seed(CropKind::Carrot).is_err());
        assert_eq!(ledger, before);
    }

    #[test]
    fn heavy_water_conversion_checks_cost_and_cap() {
        let mut ledger = ResourceLedger::starting();
        ledger.water = 100;
        ledger.convert_heavy_water(1).expect("conversion succeeds");
        assert_eq!(ledger.water, 0);
        assert_eq!(ledger.heavy_water, 1);

        ledger.water = 100;
        ledger.heavy_water = HEAVY_WATER_CAP;
        let before = ledger.clone();
        assert!(matches!(
            ledger.convert_heavy_water(1),
            Err(GameError::StateConflict(_))
        ));
        assert_eq!(ledger, before);
    }

    #[test]
    fn daily_claim_is_once_per_utc_day() {
        let mut ledger = ResourceLedger::starting();
        ledger.water = 0;
        assert_eq!(ledger.claim_daily_water(at(8, 0)).unwrap(), 10);
        assert!(matches!(
            ledger.claim_daily_water(at(23, 59)),
            Err(GameError::StateConflict(_))
        ));

        let next_day = Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 1).unwrap();
        assert_eq!(ledger.claim_daily_water(next_day).unwrap(), 10);
    }

    #[test]
    fn ad_watch_enforces_cooldown_and_daily_cap() {
        let mut ledger = ResourceLedger::starting();
        ledger.water = 0;
        assert_eq!(ledger.watch_ad(at(10, 0)).unwrap(), 1);
        assert!(matches!(
            ledger.watch_ad(at(10, 0)),
            Err(GameError::StateConflict(_))
        ));
        assert_eq!(ledger.watch_ad(at(10, 2)).unwrap(), 1);

        ledger.ads_watched_today = DAILY_AD_CAP;
        assert!(matches!(
            ledger.watch_ad(at(12, 0)),
            Err(GameError::StateConflict(_))
        ));
    }

    #[test]
    fn unlock_patch_consumes_parts_up_to_max() {
        let mut ledger = ResourceLedger::starting();
        ledger.parts = 60;
        for expected in 4..=MAX_PATCHES {
            assert_eq!(ledger.unlock_patch().unwrap(), expected);
        }
        assert_eq!(ledger.parts, 60 - 5 * PARTS_PER_PATCH);
        assert!(matches!(
            ledger.unlock_patch(),
            Err(GameError::StateConflict(_))
        ));
    }

    #[test]
    fn prize_application_respects_caps() {
        let mut ledger = ResourceLedger::starting();
        ledger.water = 95;
        ledger.boosters = 9;
        ledger.apply_prize(&PrizeBundle {
            coins: 1000,
            water: 50,
            boosters: 5,
            vip: None,
        });
        assert_eq!(ledger.coins, 1000);
        assert_eq!(ledger.water, WATER_CAP);
        assert_eq!(ledger.boosters, BOOSTER_CAP);
    }
}
