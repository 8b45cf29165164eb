use thiserror::Error;

/// Top-level error for the warden orchestrator and binary, aggregating the
/// errors of the component crates.
///
/// Denials (spatial or throttling) are never errors. Collaborator failures
/// and internal errors reach callers of [`Warden::process`](crate::Warden::process)
/// only as a denied outcome with reason `processing_error`.
#[derive(Debug, Error)]
pub enum WardenError {
    #[error("core error: {0}")]
    Core(#[from] warden_core::CoreError),

    #[error("geofence error: {0}")]
    Geofence(#[from] warden_geofence::GeofenceError),

    #[error("throttle error: {0}")]
    Throttle(#[from] warden_throttle::ThrottleError),

    #[error("{collaborator} did not respond within {timeout_ms}ms")]
    CollaboratorTimeout {
        collaborator: &'static str,
        timeout_ms: u64,
    },

    #[error("collaborator error: {0}")]
    Collaborator(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl WardenError {
    /// Whether the caller supplied something malformed, as opposed to a
    /// runtime fault.
    pub fn is_validation(&self) -> bool {
        match self {
            WardenError::Geofence(e) => e.is_validation(),
            WardenError::Throttle(e) => e.is_validation(),
            WardenError::Core(warden_core::CoreError::Validation(_)) => true,
            WardenError::Config(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(e: serde_json::Error) -> Self {
        WardenError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for WardenError {
    fn from(e: toml::de::Error) -> Self {
        WardenError::Config(format!("TOML parse error: {}", e))
    }
}

pub type WardenResult<T> = Result<T, WardenError>;
