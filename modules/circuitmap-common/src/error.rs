use thiserror::Error;

/// Result type alias for circuitmap operations.
pub type Result<T> = std::result::Result<T, CircuitMapError>;

#[derive(Error, Debug)]
pub enum CircuitMapError {
    /// Transient I/O failure or timeout talking to a backing store or service.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An import job record is missing or inconsistent.
    #[error("Import conflict: {0}")]
    ImportConflict(String),

    /// A partner fragment failed on its own. Logged, never fatal to the parent run.
    #[error("Partial failure importing segment {segment_id}: {detail}")]
    PartialFailure { segment_id: i64, detail: String },

    /// The run was stopped by a shutdown signal.
    #[error("cancelled")]
    Cancelled,
}

impl CircuitMapError {
    /// Whether a caller may retry the failed operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CircuitMapError::StoreUnavailable(_))
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        CircuitMapError::InvalidInput(msg.into())
    }

    pub fn unavailable(msg: impl std::fmt::Display) -> Self {
        CircuitMapError::StoreUnavailable(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_errors_are_retryable() {
        assert!(CircuitMapError::unavailable("connection reset").is_retryable());
        assert!(!CircuitMapError::invalid("empty skeleton").is_retryable());
        assert!(!CircuitMapError::ImportConflict("two seed rows".into()).is_retryable());
        assert!(!CircuitMapError::PartialFailure {
            segment_id: 7,
            detail: "boom".into()
        }
        .is_retryable());
        assert!(!CircuitMapError::Cancelled.is_retryable());
    }

    #[test]
    fn partial_failure_message_names_segment() {
        let err = CircuitMapError::PartialFailure {
            segment_id: 42,
            detail: "timeout".into(),
        };
        assert_eq!(
            err.to_string(),
            "Partial failure importing segment 42: timeout"
        );
    }
}
