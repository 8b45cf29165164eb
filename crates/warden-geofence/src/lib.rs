//! Spatial access control for a shared 3D world.
//!
//! - [`index::RegionIndex`]: grid-bucketed region store answering "which
//!   regions contain this point" with exact inclusive containment.
//! - [`evaluator::evaluate_access`]: resolves overlapping region policies
//!   into one allow/deny decision, most sensitive region kind first.
//! - [`violation::ViolationTracker`]: time-decayed history of denials per
//!   actor and region.
//! - [`detect::RegionDetector`]: proposes private areas from clustered
//!   building activity.

pub mod category;
pub mod detect;
pub mod error;
pub mod evaluator;
pub mod index;
pub mod region;
pub mod violation;

pub use category::ActionCategory;
pub use detect::{DetectionConfig, RegionDetector};
pub use error::{GeofenceError, GeofenceErrorKind, GeofenceResult};
pub use evaluator::{
    evaluate_access, AccessDecision, AccessDenial, AccessRequest, DenialKind, PrivacyObligations,
    Restriction,
};
pub use index::{CellKey, IndexConfig, RegionIndex};
pub use region::{
    BoundingBox, PermissionLevel, PermissionMatrix, PrivacySettings, Region, RegionKind,
    RegisteredRegion, RetentionClass, Vec3,
};
pub use violation::{ViolationConfig, ViolationReport, ViolationSummary, ViolationTracker};
