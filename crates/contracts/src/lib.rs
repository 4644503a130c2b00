//! Cross-boundary contracts shared by the game engine, service layer,
//! admin API, and CLI.
//!
//! Everything here is plain data: the transport decodes user input into a
//! [`PlayerCommand`] exactly once at the boundary, and every layer past
//! that point matches on the tagged union instead of re-parsing strings.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION_V1: &str = "1.0";

// ---------------------------------------------------------------------------
// Game constants
// ---------------------------------------------------------------------------

/// Regular water storage cap per user.
pub const WATER_CAP: i64 = 100;
/// Heavy water storage cap per user.
pub const HEAVY_WATER_CAP: i64 = 5;
/// Booster inventory cap per user.
pub const BOOSTER_CAP: i64 = 10;
/// Patch slots a farm can ever grow to.
pub const MAX_PATCHES: u8 = 8;
/// Patch slots unlocked at registration.
pub const STARTING_PATCHES: u8 = 3;
/// Patch parts consumed by one farm expansion.
pub const PARTS_PER_PATCH: i64 = 10;
/// Hours one booster shaves off a growing crop.
pub const BOOSTER_REDUCTION_HOURS: i64 = 2;
/// Regular water consumed to distill one heavy water.
pub const HEAVY_WATER_CONVERSION_COST: i64 = 100;
/// Water granted by the daily check-in.
pub const DAILY_WATER_REWARD: i64 = 10;
/// Water credited to a referrer per processed referral.
pub const REFERRAL_BONUS_WATER: i64 = 5;
/// Minimum seconds between two rewarded ad watches.
pub const AD_COOLDOWN_SECS: i64 = 60;
/// Rewarded ad watches allowed per UTC day.
pub const DAILY_AD_CAP: i64 = 50;
/// Shop price of one patch part, in coins.
pub const PART_PRICE_COINS: i64 = 100;
/// Shop price of one growth booster, in coins.
pub const BOOSTER_PRICE_COINS: i64 = 50;

// ---------------------------------------------------------------------------
// Crops
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CropKind {
    Potato,
    Tomato,
    Onion,
    Carrot,
}

impl CropKind {
    pub const ALL: [CropKind; 4] = [
        CropKind::Potato,
        CropKind::Tomato,
        CropKind::Onion,
        CropKind::Carrot,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Potato => "potato",
            Self::Tomato => "tomato",
            Self::Onion => "onion",
            Self::Carrot => "carrot",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "potato" => Some(Self::Potato),
            "tomato" => Some(Self::Tomato),
            "onion" => Some(Self::Onion),
            "carrot" => Some(Self::Carrot),
            _ => None,
        }
    }
}

impl fmt::Display for CropKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// VIP tiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum VipTier {
    Tier1,
    Tier2,
    Tier3,
    Tier4,
}

impl VipTier {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Tier1 => 1,
            Self::Tier2 => 2,
            Self::Tier3 => 3,
            Self::Tier4 => 4,
        }
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Tier1),
            2 => Some(Self::Tier2),
            3 => Some(Self::Tier3),
            4 => Some(Self::Tier4),
            _ => None,
        }
    }
}

impl fmt::Display for VipTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier {}", self.as_u8())
    }
}

// ---------------------------------------------------------------------------
// Contests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContestKind {
    Daily,
    Weekly,
    Monthly,
}

impl ContestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }
}

impl fmt::Display for ContestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContestStatus {
    Active,
    Ended,
}

impl ContestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "ended" => Some(Self::Ended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    First,
    Second,
    Third,
    Participation,
}

impl Placement {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Second => "second",
            Self::Third => "third",
            Self::Participation => "participation",
        }
    }
}

/// A grant of VIP time carried inside a contest prize.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct VipGrant {
    pub tier: VipTier,
    pub duration_days: u32,
}

/// One prize line: any combination of coins, water, boosters, and VIP time.
/// Water and boosters are additive and subject to the ledger caps on award.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrizeBundle {
    #[serde(default)]
    pub coins: i64,
    #[serde(default)]
    pub water: i64,
    #[serde(default)]
    pub boosters: i64,
    #[serde(default)]
    pub vip: Option<VipGrant>,
}

impl PrizeBundle {
    pub fn coins(coins: i64) -> Self {
        Self {
            coins,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.coins == 0 && self.water == 0 && self.boosters == 0 && self.vip.is_none()
    }
}

/// Structured prize pool; serialized to JSON only at the persistence edge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrizePool {
    pub first: PrizeBundle,
    pub second: PrizeBundle,
    pub third: PrizeBundle,
    #[serde(default)]
    pub participation: Option<PrizeBundle>,
}

impl PrizePool {
    pub fn for_placement(&self, placement: Placement) -> Option<PrizeBundle> {
        match placement {
            Placement::First => Some(self.first),
            Placement::Second => Some(self.second),
            Placement::Third => Some(self.third),
            Placement::Participation => self.participation,
        }
    }

    /// Stock pool for a scheduler-created contest of the given kind.
    pub fn default_for(kind: ContestKind) -> Self {
        match kind {
            ContestKind::Daily => Self {
                first: PrizeBundle {
                    coins: 1000,
                    water: 50,
                    ..PrizeBundle::default()
                },
                second: PrizeBundle {
                    coins: 500,
                    water: 25,
                    ..PrizeBundle::default()
                },
                third: PrizeBundle {
                    coins: 250,
                    water: 10,
                    ..PrizeBundle::default()
                },
                participation: None,
            },
            ContestKind::Weekly => Self {
                first: PrizeBundle {
                    coins: 5000,
                    water: 100,
                    boosters: 5,
                    vip: None,
                },
                second: PrizeBundle {
                    coins: 3000,
                    water: 75,
                    boosters: 3,
                    vip: None,
                },
                third: PrizeBundle {
                    coins: 2000,
                    water: 50,
                    boosters: 2,
                    vip: None,
                },
                participation: Some(PrizeBundle {
                    coins: 100,
                    water: 10,
                    ..PrizeBundle::default()
                }),
            },
            ContestKind::Monthly => {
                let vip_month = PrizeBundle {
                    vip: Some(VipGrant {
                        tier: VipTier::Tier1,
                        duration_days: 30,
                    }),
                    ..PrizeBundle::default()
                };
                Self {
                    first: vip_month,
                    second: vip_month,
                    third: vip_month,
                    participation: Some(PrizeBundle {
                        coins: 500,
                        water: 50,
                        ..PrizeBundle::default()
                    }),
                }
            }
        }
    }
}

/// Winner entry persisted on the contest row at settlement, exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContestWinner {
    pub user_id: i64,
    pub placement: Placement,
    pub prize: PrizeBundle,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    Admin,
    System,
    Payment,
    Contest,
    Vip,
}

impl NotificationCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::System => "system",
            Self::Payment => "payment",
            Self::Contest => "contest",
            Self::Vip => "vip",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "admin" => Some(Self::Admin),
            "system" => Some(Self::System),
            "payment" => Some(Self::Payment),
            "contest" => Some(Self::Contest),
            "vip" => Some(Self::Vip),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Normal,
    High,
    Urgent,
}

impl NotificationPriority {
    /// Drain order weight; higher drains first.
    pub fn rank(self) -> i64 {
        match self {
            Self::Normal => 0,
            Self::High => 1,
            Self::Urgent => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Admin surface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GiftKind {
    Coins,
    Water,
    Boosters,
    HeavyWater,
}

impl GiftKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Coins => "coins",
            Self::Water => "water",
            Self::Boosters => "boosters",
            Self::HeavyWater => "heavy water",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastAudience {
    All,
    Vip,
    Active,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    NotFound,
    InvalidRequest,
    StateConflict,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub schema_version: String,
    pub error_code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            error_code,
            message: message.into(),
            details,
        }
    }
}

// ---------------------------------------------------------------------------
// Player commands
// ---------------------------------------------------------------------------

/// Every gameplay action a player can trigger, decoded once at the
/// transport boundary. Each variant maps 1:1 to one service operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerCommand {
    Plant { crop: CropKind, patch_number: u8 },
    Harvest { patch_number: u8 },
    HarvestAll,
    Boost { patch_number: u8 },
    ClaimDailyWater,
    WatchAd,
    ConvertHeavyWater { amount: i64 },
    ExpandFarm,
    BuySeeds { crop: CropKind, quantity: i64 },
    BuyParts { quantity: i64 },
    BuyBoosters { quantity: i64 },
    JoinContest { contest_id: i64 },
    RecordContestAd { contest_id: i64 },
    ClaimVipReward,
    /// Opens a pending payment; an admin approval activates the tier.
    RequestVipPurchase { tier: VipTier },
}

/// Decode a transport callback payload (`<action>_<param>...`) into a
/// [`PlayerCommand`]. Returns `None` for anything unrecognized so the
/// dispatch layer can answer with a generic failure instead of guessing.
pub fn decode_callback(data: &str) -> Option<PlayerCommand> {
    match data {
        "claim_daily" => return Some(PlayerCommand::ClaimDailyWater),
        "watch_ad" => return Some(PlayerCommand::WatchAd),
        "convert_heavy_water" => {
            return Some(PlayerCommand::ConvertHeavyWater { amount: 1 });
        }
        "expand_farm" => return Some(PlayerCommand::ExpandFarm),
        "harvest_all" => return Some(PlayerCommand::HarvestAll),
        "vip_claim_daily" => return Some(PlayerCommand::ClaimVipReward),
        _ => {}
    }

    let mut parts = data.split('_');
    match parts.next()? {
        "plant" => {
            let crop = CropKind::parse(parts.next()?)?;
            let patch_number = parts.next()?.parse::<u8>().ok()?;
            Some(PlayerCommand::Plant { crop, patch_number })
        }
        "harvest" => {
            let patch_number = parts.next()?.parse::<u8>().ok()?;
            Some(PlayerCommand::Harvest { patch_number })
        }
        "boost" => {
            let patch_number = parts.next()?.parse::<u8>().ok()?;
            Some(PlayerCommand::Boost { patch_number })
        }
        "buy" => match parts.next()? {
            "seeds" => {
                let crop = CropKind::parse(parts.next()?)?;
                let quantity = parts.next().map_or(Some(1), |raw| raw.parse().ok())?;
                Some(PlayerCommand::BuySeeds { crop, quantity })
            }
            "parts" => {
                // Legacy payloads carry a unit segment: buy_parts_part_<qty>.
                let segment = parts.next()?;
                let quantity = if segment == "part" {
                    parts.next().map_or(Some(1), |raw| raw.parse().ok())?
                } else {
                    segment.parse().ok()?
                };
                Some(PlayerCommand::BuyParts { quantity })
            }
            "boosters" => {
                let segment = parts.next()?;
                let quantity = if segment == "booster" {
                    parts.next().map_or(Some(1), |raw| raw.parse().ok())?
                } else {
                    segment.parse().ok()?
                };
                Some(PlayerCommand::BuyBoosters { quantity })
            }
            _ => None,
        },
        "vip" => match (parts.next()?, parts.next()?) {
            ("buy", raw_tier) => {
                let tier = VipTier::from_u8(raw_tier.parse::<u8>().ok()?)?;
                Some(PlayerCommand::RequestVipPurchase { tier })
            }
            _ => None,
        },
        "contest" => match parts.next()? {
            "ad" => {
                let contest_id = parts.next()?.parse::<i64>().ok()?;
                Some(PlayerCommand::RecordContestAd { contest_id })
            }
            raw => {
                let contest_id = raw.parse::<i64>().ok()?;
                Some(PlayerCommand::JoinContest { contest_id })
            }
        },
        _ => None,
    }
}
