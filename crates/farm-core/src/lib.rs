//! Pure game engine: resource ledger rules, patch lifecycle, VIP cadence,
//! contest settlement, and job schedule computation.
//!
//! Nothing in this crate touches I/O or reads the clock; every time-driven
//! transition takes `now: DateTime<Utc>` from the caller so the service
//! layer and the tests drive the same code paths.

pub mod catalog;
pub mod clock;
pub mod contest;
pub mod error;
pub mod ledger;
pub mod patch;
pub mod schedule;
pub mod vip;

pub use catalog::{CropCatalog, CropSpec, VipBenefits};
pub use contest::{Contest, ContestParticipant, SettlementOutcome};
pub use error::GameError;
pub use ledger::{ResourceLedger, UserStats};
pub use patch::{Patch, PatchStage};
pub use schedule::{JobRegistry, JobSchedule};
pub use vip::VipSubscription;
