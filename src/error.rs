//! Unified engine error model.
//! One error enum is used across the whole crate so callers can match on the
//! kind of failure (configuration, validation, capability, persistence,
//! evaluation, distribution) without chasing per-module error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed model text, unknown section, missing required section,
    /// empty or ambiguous definition. Fatal at construction.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// Rule length mismatch, duplicate rule on add, missing rule on remove,
    /// mismatched list lengths on bulk update. No state change occurred.
    #[error("validation error: {reason}")]
    Validation { reason: String },

    /// The adapter or role manager does not advertise the requested
    /// capability.
    #[error("unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// Adapter I/O failure. The in-memory mutation has been rolled back.
    #[error("persistence error: {reason}")]
    Persistence { reason: String },

    /// Binding mismatch or unresolved name during matcher evaluation.
    #[error("evaluation error: {reason}")]
    Evaluation { reason: String },

    /// Watcher/dispatcher/reconciliation failure. Local state stays
    /// authoritative; these are logged by the engine and only surfaced
    /// from distribution-layer entry points.
    #[error("distribution error: {reason}")]
    Distribution { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl EngineError {
    pub fn configuration<S: Into<String>>(reason: S) -> Self {
        EngineError::Configuration { reason: reason.into() }
    }
    pub fn validation<S: Into<String>>(reason: S) -> Self {
        EngineError::Validation { reason: reason.into() }
    }
    pub fn unsupported<S: Into<String>>(operation: S) -> Self {
        EngineError::Unsupported { operation: operation.into() }
    }
    pub fn persistence<S: Into<String>>(reason: S) -> Self {
        EngineError::Persistence { reason: reason.into() }
    }
    pub fn evaluation<S: Into<String>>(reason: S) -> Self {
        EngineError::Evaluation { reason: reason.into() }
    }
    pub fn distribution<S: Into<String>>(reason: S) -> Self {
        EngineError::Distribution { reason: reason.into() }
    }

    /// Stable kind label used in logs and explanations.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Configuration { .. } => "configuration",
            EngineError::Validation { .. } => "validation",
            EngineError::Unsupported { .. } => "capability",
            EngineError::Persistence { .. } => "persistence",
            EngineError::Evaluation { .. } => "evaluation",
            EngineError::Distribution { .. } => "distribution",
            EngineError::Io { .. } => "io",
            EngineError::Serialization { .. } => "serialization",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_labels() {
        assert_eq!(EngineError::configuration("x").kind(), "configuration");
        assert_eq!(EngineError::validation("x").kind(), "validation");
        assert_eq!(EngineError::unsupported("add_policy").kind(), "capability");
        assert_eq!(EngineError::persistence("x").kind(), "persistence");
        assert_eq!(EngineError::evaluation("x").kind(), "evaluation");
        assert_eq!(EngineError::distribution("x").kind(), "distribution");
    }

    #[test]
    fn display_includes_reason() {
        let e = EngineError::unsupported("remove_filtered_policy");
        assert!(e.to_string().contains("remove_filtered_policy"));
        let e = EngineError::validation("rule already exists");
        assert!(e.to_string().contains("rule already exists"));
    }
}
