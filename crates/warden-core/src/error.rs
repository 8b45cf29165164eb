use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("event sink error: {0}")]
    EventSink(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_display() {
        let err = CoreError::Validation("bad coordinate".into());
        assert_eq!(err.to_string(), "validation error: bad coordinate");
        let err = CoreError::EventSink("closed".into());
        assert_eq!(err.to_string(), "event sink error: closed");
    }
}
