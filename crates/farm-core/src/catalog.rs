//! Static crop parameters and VIP benefit tables.
//!
//! The catalog is constructed once at startup and passed down explicitly;
//! nothing reads it through a global.

use std::collections::BTreeMap;

use contracts::{CropKind, VipTier, BOOSTER_REDUCTION_HOURS};
use serde::{Deserialize, Serialize};

/// Water a planting consumes: the premium tier drinks heavy water instead
/// of regular drops.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaterCost {
    Regular { drops: i64 },
    Heavy { drops: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CropSpec {
    pub kind: CropKind,
    pub growth_hours: i64,
    pub water: WaterCost,
    pub sale_price: i64,
    /// Largest total harvest-time reduction boosters may apply, in hours.
    pub max_boost_hours: i64,
    /// Coin price for one seed in the shop; `None` means the seed is not
    /// coin-purchasable and only enters through rewards and gifts.
    pub seed_price_coins: Option<i64>,
}

impl CropSpec {
    /// How many boosters a single planting of this crop can absorb.
    pub fn booster_cap(&self) -> i64 {
        self.max_boost_hours / BOOSTER_REDUCTION_HOURS
    }
}

#[derive(Debug, Clone)]
pub struct CropCatalog {
    crops: BTreeMap<CropKind, CropSpec>,
}

impl CropCatalog {
    pub fn new(specs: Vec<CropSpec>) -> Self {
        let crops = specs.into_iter().map(|spec| (spec.kind, spec)).collect();
        Self { crops }
    }

    pub fn spec(&self, kind: CropKind) -> &CropSpec {
        self.crops
            .get(&kind)
            .expect("catalog is constructed with every crop kind")
    }

    pub fn iter(&self) -> impl Iterator<Item = &CropSpec> {
        self.crops.values()
    }
}

impl Default for CropCatalog {
    fn default() -> Self {
        Self::new(vec![
            CropSpec {
                kind: CropKind::Potato,
                growth_hours: 24,
                water: WaterCost::Regular { drops: 10 },
                sale_price: 100,
                max_boost_hours: 12,
                seed_price_coins: Some(50),
            },
            CropSpec {
                kind: CropKind::Tomato,
                growth_hours: 48,
                water: WaterCost::Regular { drops: 20 },
                sale_price: 150,
                max_boost_hours: 24,
                seed_price_coins: Some(80),
            },
            CropSpec {
                kind: CropKind::Onion,
                growth_hours: 96,
                water: WaterCost::Regular { drops: 50 },
                sale_price: 250,
                max_boost_hours: 48,
                seed_price_coins: Some(150),
            },
            CropSpec {
                kind: CropKind::Carrot,
                growth_hours: 144,
                water: WaterCost::Heavy { drops: 1 },
                sale_price: 1300,
                max_boost_hours: 72,
                seed_price_coins: None,
            },
        ])
    }
}

/// Per-tier daily reward bundle and standing perks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct VipBenefits {
    pub extra_patches: u8,
    pub daily_potato_seeds: i64,
    pub daily_water: i64,
    pub daily_parts: i64,
    pub daily_onion_seeds: i64,
    /// A tomato seed lands every N days since subscription start.
    pub tomato_every_days: Option<i64>,
    /// An onion seed lands every N days since subscription start.
    pub onion_every_days: Option<i64>,
    /// A carrot seed lands every N days since subscription start.
    pub carrot_every_days: Option<i64>,
    pub price_usd: i64,
}

impl VipBenefits {
    pub fn for_tier(tier: VipTier) -> Self {
        match tier {
            VipTier::Tier1 => Self {
                extra_patches: 1,
                daily_potato_seeds: 2,
                daily_water: 0,
                daily_parts: 0,
                daily_onion_seeds: 0,
                tomato_every_days: None,
                onion_every_days: None,
                carrot_every_days: None,
                price_usd: 7,
            },
            VipTier::Tier2 => Self {
                extra_patches: 1,
                daily_potato_seeds: 2,
                daily_water: 10,
                daily_parts: 5,
                daily_onion_seeds: 0,
                tomato_every_days: Some(2),
                onion_every_days: None,
                carrot_every_days: None,
                price_usd: 15,
            },
            VipTier::Tier3 => Self {
                extra_patches: 2,
                daily_potato_seeds: 2,
                daily_water: 20,
                daily_parts: 0,
                daily_onion_seeds: 0,
                tomato_every_days: None,
                onion_every_days: Some(2),
                carrot_every_days: None,
                price_usd: 30,
            },
            VipTier::Tier4 => Self {
                extra_patches: 3,
                daily_potato_seeds: 2,
                daily_water: 0,
                daily_parts: 0,
                daily_onion_seeds: 2,
                tomato_every_days: None,
                onion_every_days: None,
                carrot_every_days: Some(3),
                price_usd: 99,
            },
        }
    }
}
