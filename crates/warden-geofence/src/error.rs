use std::fmt;
use thiserror::Error;

/// Single error enum for region registration, indexing and lookup.
///
/// Access denials are never errors: they are returned as
/// [`AccessDecision`](crate::evaluator::AccessDecision) values.
#[derive(Debug, Error)]
pub enum GeofenceError {
    #[error("invalid region: {0}")]
    InvalidRegion(String),

    #[error("invalid bounds: {0}")]
    InvalidBounds(String),

    #[error("region spans {cells} grid cells, limit is {max}")]
    RegionTooLarge { cells: u64, max: u64 },

    #[error("region not found: {0}")]
    RegionNotFound(String),

    #[error("invalid location: {0}")]
    InvalidLocation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Discriminator for GeofenceError variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeofenceErrorKind {
    InvalidRegion,
    InvalidBounds,
    RegionTooLarge,
    RegionNotFound,
    InvalidLocation,
    Internal,
}

impl GeofenceError {
    pub fn kind(&self) -> GeofenceErrorKind {
        match self {
            GeofenceError::InvalidRegion(_) => GeofenceErrorKind::InvalidRegion,
            GeofenceError::InvalidBounds(_) => GeofenceErrorKind::InvalidBounds,
            GeofenceError::RegionTooLarge { .. } => GeofenceErrorKind::RegionTooLarge,
            GeofenceError::RegionNotFound(_) => GeofenceErrorKind::RegionNotFound,
            GeofenceError::InvalidLocation(_) => GeofenceErrorKind::InvalidLocation,
            GeofenceError::Internal(_) => GeofenceErrorKind::Internal,
        }
    }

    /// Whether this error is a caller-side validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self.kind(),
            GeofenceErrorKind::InvalidRegion
                | GeofenceErrorKind::InvalidBounds
                | GeofenceErrorKind::RegionTooLarge
                | GeofenceErrorKind::InvalidLocation
        )
    }
}

impl fmt::Display for GeofenceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeofenceErrorKind::InvalidRegion => write!(f, "InvalidRegion"),
            GeofenceErrorKind::InvalidBounds => write!(f, "InvalidBounds"),
            GeofenceErrorKind::RegionTooLarge => write!(f, "RegionTooLarge"),
            GeofenceErrorKind::RegionNotFound => write!(f, "RegionNotFound"),
            GeofenceErrorKind::InvalidLocation => write!(f, "InvalidLocation"),
            GeofenceErrorKind::Internal => write!(f, "Internal"),
        }
    }
}

impl From<warden_core::CoreError> for GeofenceError {
    fn from(e: warden_core::CoreError) -> Self {
        match e {
            warden_core::CoreError::Validation(msg) => GeofenceError::InvalidLocation(msg),
            other => GeofenceError::Internal(other.to_string()),
        }
    }
}

pub type GeofenceResult<T> = Result<T, GeofenceError>;
