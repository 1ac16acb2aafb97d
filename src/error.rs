use std::collections::HashMap;

use thiserror::Error;

/// Error taxonomy for the agent.
///
/// Errors that threaten correctness (determinism violations, structural
/// divergence, authentication failures, incompatible recordings) surface to
/// the caller or halt the operation. Peripheral failures (capture,
/// serialization, IPC send) are counted and logged instead.
#[derive(Debug, Error)]
pub enum ChronosError {
    /// Replay refused: at least one Unsafe source is registered. The caller
    /// must remediate before retrying; the map names each offending source.
    #[error("replay refused: {} source(s) block determinism", sources.len())]
    DeterminismViolation { sources: HashMap<String, String> },

    /// Runtime assertions evaluated before replay did not all hold.
    #[error("runtime assertions failed: {0:?}")]
    AssertionsFailed(Vec<String>),

    #[error("source id already registered: {0}")]
    RegistrationConflict(String),

    #[error("connection exceeded the message rate limit")]
    RateLimitExceeded,

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Replay halted on a structural divergence.
    #[error("structural divergence: {0}")]
    StructuralDivergence(String),

    #[error("incompatible recording: {errors:?}")]
    IncompatibleRecording {
        warnings: Vec<String>,
        errors: Vec<String>,
    },

    /// An operation was attempted from a state that does not permit it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("crypto failure: {0}")]
    Crypto(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ChronosError {
    /// Whether the caller may retry without remediation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChronosError::Io(_) | ChronosError::Capture(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn determinism_violation_counts_sources() {
        let mut sources = HashMap::new();
        sources.insert("api".to_string(), "network I/O".to_string());
        sources.insert("clock".to_string(), "system time access".to_string());
        let err = ChronosError::DeterminismViolation { sources };
        assert_eq!(
            err.to_string(),
            "replay refused: 2 source(s) block determinism"
        );
        assert!(!err.is_retryable());
    }
}
