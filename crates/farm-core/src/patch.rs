//! Patch lifecycle: empty -> growing -> ready -> harvested (empty again).
//!
//! Transitions validate every precondition before touching either the
//! patch or the ledger, so a rejected operation changes nothing.

use chrono::{DateTime, Duration, Utc};
use contracts::{CropKind, BOOSTER_REDUCTION_HOURS};

use serde::Serialize;

use crate::catalog::{CropSpec, WaterCost};
use crate::error::GameError;
use crate::ledger::{ResourceLedger, UserStats};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Patch {
    pub user_id: i64,
    pub patch_number: u8,
    pub unlocked: bool,
    pub crop: Option<CropKind>,
    pub planted_at: Option<DateTime<Utc>>,
    pub harvest_due: Option<DateTime<Utc>>,
    pub ready: bool,
    pub boosters_applied: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchStage {
    Empty,
    Growing,
    Ready,
}

impl Patch {
    pub fn empty(user_id: i64, patch_number: u8, unlocked: bool) -> Self {
        Self {
            user_id,
            patch_number,
            unlocked,
            crop: None,
            planted_at: None,
            harvest_due: None,
            ready: false,
            boosters_applied: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.crop.is_none()
    }

    pub fn stage(&self) -> PatchStage {
        if self.crop.is_none() {
            PatchStage::Empty
        } else if self.ready {
            PatchStage::Ready
        } else {
            PatchStage::Growing
        }
    }

    /// A growing patch whose harvest time has arrived but is not yet
    /// flagged. The sweep marks exactly these.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.ready
            && self.crop.is_some()
            && self.harvest_due.map(|due| due <= now).unwrap_or(false)
    }

    /// Crop fields are all-present or all-absent.
    pub fn invariant_holds(&self) -> bool {
        let occupied = self.crop.is_some();
        occupied == self.planted_at.is_some() && occupied == self.harvest_due.is_some()
    }

    fn clear(&mut self) {
        self.crop = None;
        self.planted_at = None;
        self.harvest_due = None;
        self.ready = false;
        self.boosters_applied = 0;
    }
}

/// Plant `spec.kind` on the patch, deducting one seed and the crop's water
/// cost. Returns the harvest-due time.
pub fn plant(
    patch: &mut Patch,
    ledger: &mut ResourceLedger,
    stats: &mut UserStats,
    spec: &CropSpec,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, GameError> {
    if !patch.unlocked {
        return Err(GameError::conflict("Patch is locked"));
    }
    if !patch.is_empty() {
        return Err(GameError::conflict("Patch already has a crop"));
    }
    if ledger.seed_count(spec.kind) < 1 {
        return Err(GameError::insufficient(format!(
            "No {} seeds available",
            spec.kind
        )));
    }
    let regular_water_used = match spec.water {
        WaterCost::Regular { drops } => {
            if ledger.water < drops {
                return Err(GameError::insufficient(format!(
                    "Need {drops} water drops to plant {}",
                    spec.kind
                )));
            }
            drops
        }
        WaterCost::Heavy { drops } => {
            if ledger.heavy_water < drops {
                return Err(GameError::insufficient(format!(
                    "Need heavy water for {}",
                    spec.kind
                )));
            }
            0
        }
    };

    // All preconditions hold; the debits below cannot fail.
    ledger.debit_seed(spec.kind)?;
    match spec.water {
        WaterCost::Regular { drops } => ledger.debit_water(drops)?,
        WaterCost::Heavy { drops } => ledger.debit_heavy_water(drops)?,
    }

    let harvest_due = now + Duration::hours(spec.growth_hours);
    patch.crop = Some(spec.kind);
    patch.planted_at = Some(now);
    patch.harvest_due = Some(harvest_due);
    patch.ready = false;
    patch.boosters_applied = 0;
    stats.record_plant(regular_water_used);
    Ok(harvest_due)
}

/// Spend one booster to pull the harvest time two hours closer. Capped per
/// planting by the crop's maximum total reduction.
pub fn apply_booster(
    patch: &mut Patch,
    ledger: &mut ResourceLedger,
    stats: &mut UserStats,
    spec: &CropSpec,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, GameError> {
    let Some(due) = patch.harvest_due else {
        return Err(GameError::conflict("No crop to boost"));
    };
    if patch.ready {
        return Err(GameError::conflict("Crop is already ready"));
    }
    if patch.boosters_applied >= spec.booster_cap() {
        return Err(GameError::conflict(
            "Maximum boosters already used for this crop",
        ));
    }
    ledger.debit_booster()?;

    let new_due = due - Duration::hours(BOOSTER_REDUCTION_HOURS);
    patch.harvest_due = Some(new_due);
    patch.ready = new_due <= now;
    patch.boosters_applied += 1;
    stats.record_booster();
    Ok(new_due)
}

/// Pure readiness sweep: keys of every growing patch whose harvest time
/// has passed and is not yet flagged ready. Running it again after the
/// caller persists the flags yields an empty set.
pub fn sweep_ready(patches: &[Patch], now: DateTime<Utc>) -> Vec<(i64, u8)> {
    patches
        .iter()
        .filter(|patch| patch.is_due(now))
        .map(|patch| (patch.user_id, patch.patch_number))
        .collect()
}

/// Harvest a ready patch: credits the sale price, clears the patch back
/// to empty. Returns the earnings.
pub fn harvest(
    patch: &mut Patch,
    ledger: &mut ResourceLedger,
    stats: &mut UserStats,
    spec: &CropSpec,
) -> Result<i64, GameError> {
    if patch.is_empty() {
        return Err(GameError::conflict("Nothing planted on this patch"));
    }
    if !patch.ready {
        return Err(GameError::conflict("Crop is not ready for harvest"));
    }
    patch.clear();
    ledger.credit_coins(spec.sale_price);
    stats.record_harvest(spec.sale_price);
    Ok(spec.sale_price)
}

/// Growth completion percentage, clamped to 0..=100.
pub fn growth_progress(patch: &Patch, now: DateTime<Utc>) -> f64 {
    let (Some(planted), Some(due)) = (patch.planted_at, patch.harvest_due) else {
        return 0.0;
    };
    let total = (due - planted).num_seconds();
    if total <= 0 {
        return 100.0;
    }
    let elapsed = (now - planted).num_seconds();
    ((elapsed as f64 / total as f64) * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CropCatalog;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn setup() -> (Patch, ResourceLedger, UserStats, CropCatalog) {
        (
            Patch::empty(1, 1, true),
            ResourceLedger::starting(),
            UserStats::default(),
            CropCatalog::default(),
        )
    }

    #[test]
    fn plant_deducts_cost_and_schedules_harvest() {
        let (mut patch, mut ledger, mut stats, catalog) = setup();
        let due = plant(
            &mut patch,
            &mut ledger,
            &mut stats,
            catalog.spec(CropKind::Potato),
            t0(),
        )
        .expect("plant succeeds");

        assert_eq!(due, t0() + Duration::hours(24));
        assert_eq!(ledger.water, 0);
        assert_eq!(ledger.seed_count(CropKind::Potato), 0);
        assert_eq!(patch.stage(), PatchStage::Growing);
        assert_eq!(stats.crops_planted, 1);
        assert_eq!(stats.total_water_used, 10);
        assert!(patch.invariant_holds());
    }

    #[test]
    fn failed_plant_changes_nothing() {
        let (mut patch, mut ledger, mut stats, catalog) = setup();
        ledger.water = 5; // below the potato cost
        let ledger_before = ledger.clone();
        let patch_before = patch.clone();

        let result = plant(
            &mut patch,
            &mut ledger,
            &mut stats,
            catalog.spec(CropKind::Potato),
            t0(),
        );
        assert!(matches!(result, Err(GameError::InsufficientResource(_))));
        assert_eq!(ledger, ledger_before);
        assert_eq!(patch, patch_before);
        assert_eq!(stats, UserStats::default());
    }

    #[test]
    fn carrot_requires_heavy_water() {
        let (mut patch, mut ledger, mut stats, catalog) = setup();
        ledger.add_seeds(CropKind::Carrot, 1);
        ledger.water = 100;
        let result = plant(
            &mut patch,
            &mut ledger,
            &mut stats,
            catalog.spec(CropKind::Carrot),
            t0(),
        );
        assert!(matches!(result, Err(GameError::InsufficientResource(_))));

        ledger.heavy_water = 1;
        plant(
            &mut patch,
            &mut ledger,
            &mut stats,
            catalog.spec(CropKind::Carrot),
            t0(),
        )
        .expect("plant succeeds with heavy water");
        assert_eq!(ledger.heavy_water, 0);
        assert_eq!(ledger.water, 100);
        // Heavy-water plantings do not count regular water usage.
        assert_eq!(stats.total_water_used, 0);
    }

    #[test]
    fn booster_cap_is_enforced_per_planting() {
        let (mut patch, mut ledger, mut stats, catalog) = setup();
        let spec = catalog.spec(CropKind::Potato);
        plant(&mut patch, &mut ledger, &mut stats, spec, t0()).unwrap();

        ledger.boosters = 10;
        for _ in 0..spec.booster_cap() {
            apply_booster(&mut patch, &mut ledger, &mut stats, spec, t0()).unwrap();
        }
        assert_eq!(patch.boosters_applied, 6);
        assert!(matches!(
            apply_booster(&mut patch, &mut ledger, &mut stats, spec, t0()),
            Err(GameError::StateConflict(_))
        ));
        assert_eq!(ledger.boosters, 4);
    }

    #[test]
    fn booster_past_due_flips_ready() {
        let (mut patch, mut ledger, mut stats, catalog) = setup();
        let spec = catalog.spec(CropKind::Potato);
        plant(&mut patch, &mut ledger, &mut stats, spec, t0()).unwrap();
        ledger.boosters = 1;

        // 23 hours later one booster moves the due time into the past.
        let later = t0() + Duration::hours(23);
        apply_booster(&mut patch, &mut ledger, &mut stats, spec, later).unwrap();
        assert!(patch.ready);
        assert_eq!(patch.stage(), PatchStage::Ready);
    }

    #[test]
    fn sweep_ready_is_idempotent() {
        let (mut patch, mut ledger, mut stats, catalog) = setup();
        let spec = catalog.spec(CropKind::Potato);
        plant(&mut patch, &mut ledger, &mut stats, spec, t0()).unwrap();

        let after = t0() + Duration::hours(24);
        let mut patches = vec![patch];
        assert_eq!(sweep_ready(&patches, after), vec![(1, 1)]);

        // The caller persists the flag; the second sweep finds nothing.
        patches[0].ready = true;
        assert!(sweep_ready(&patches, after).is_empty());
    }

    #[test]
    fn sweep_ignores_patches_not_yet_due() {
        let (mut patch, mut ledger, mut stats, catalog) = setup();
        let spec = catalog.spec(CropKind::Potato);
        plant(&mut patch, &mut ledger, &mut stats, spec, t0()).unwrap();
        let patches = vec![patch, Patch::empty(1, 2, true)];
        assert!(sweep_ready(&patches, t0() + Duration::hours(23)).is_empty());
    }

    #[test]
    fn harvest_requires_ready_and_credits_once() {
        let (mut patch, mut ledger, mut stats, catalog) = setup();
        let spec = catalog.spec(CropKind::Potato);
        plant(&mut patch, &mut ledger, &mut stats, spec, t0()).unwrap();

        let before = (patch.clone(), ledger.clone());
        assert!(matches!(
            harvest(&mut patch, &mut ledger, &mut stats, spec),
            Err(GameError::StateConflict(_))
        ));
        assert_eq!((patch.clone(), ledger.clone()), before);

        patch.ready = true;
        let earnings = harvest(&mut patch, &mut ledger, &mut stats, spec).unwrap();
        assert_eq!(earnings, 100);
        assert_eq!(ledger.coins, 100);
        assert!(patch.is_empty());
        assert!(patch.invariant_holds());
        assert_eq!(stats.crops_harvested, 1);
        assert_eq!(stats.total_earnings, 100);
    }

    #[test]
    fn growth_progress_clamps_both_ends() {
        let (mut patch, mut ledger, mut stats, catalog) = setup();
        let spec = catalog.spec(CropKind::Potato);
        plant(&mut patch, &mut ledger, &mut stats, spec, t0()).unwrap();

        assert_eq!(growth_progress(&patch, t0()), 0.0);
        let halfway = growth_progress(&patch, t0() + Duration::hours(12));
        assert!((halfway - 50.0).abs() < 1e-9);
        assert_eq!(growth_progress(&patch, t0() + Duration::hours(48)), 100.0);
        assert_eq!(growth_progress(&Patch::empty(1, 2, true), t0()), 0.0);
    }
}
