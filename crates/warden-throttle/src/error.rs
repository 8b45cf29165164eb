use thiserror::Error;

/// Errors from policy configuration and ledger bookkeeping.
///
/// A throttled action is not an error; it is a
/// [`UsageDecision`](crate::tracker::UsageDecision) with `allowed == false`.
#[derive(Debug, Error)]
pub enum ThrottleError {
    #[error("invalid rate limit policy: {0}")]
    InvalidPolicy(String),

    #[error("invalid load signal: {0}")]
    InvalidLoadSignal(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ThrottleError {
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ThrottleError::InvalidPolicy(_) | ThrottleError::InvalidLoadSignal(_)
        )
    }
}

pub type ThrottleResult<T> = Result<T, ThrottleError>;
