//! Error taxonomy for workload configuration and execution.

use crate::aggregate::RunFailure;

/// Errors raised before any agent runs: validation, composition, options and
/// manifest problems. Always fatal, never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("concurrency must be greater than zero")]
    NonPositiveConcurrency,

    #[error("workload {workload} defines no states")]
    MissingStates { workload: String },

    #[error("workload {workload} defines no transitions")]
    MissingTransitions { workload: String },

    #[error("start state {state} is not a declared state")]
    UnknownStartState { state: String },

    #[error("transitions declared for unknown state {state}")]
    UnknownTransitionSource { state: String },

    #[error("transition {from} -> {to} targets an undeclared state")]
    DanglingTransition { from: String, to: String },

    #[error("transition {from} -> {to} has invalid weight {weight} (must be finite and >= 0)")]
    InvalidWeight { from: String, to: String, weight: f64 },

    #[error("state not found: {state}")]
    UnknownState { state: String },

    #[error("unknown workload: {name}")]
    UnknownWorkload { name: String },

    #[error("duplicate workload name: {name}")]
    DuplicateWorkload { name: String },

    #[error("composed workload is invalid: {0}")]
    Composition(#[source] Box<ConfigError>),

    #[error("invalid run options: {0}")]
    InvalidOptions(String),

    #[error("invalid manifest: {0}")]
    Manifest(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Errors surfaced by [`crate::runner::Runner::run`].
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Failed(Box<RunFailure>),
}

/// Result type for run operations.
pub type RunResult<T> = std::result::Result<T, RunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dangling_transition_names_both_states() {
        let err = ConfigError::DanglingTransition {
            from: "init".to_string(),
            to: "missing".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("init"));
        assert!(msg.contains("missing"));
    }

    #[test]
    fn test_composition_error_wraps_cause() {
        let err = ConfigError::Composition(Box::new(ConfigError::MissingStates {
            workload: "derived".to_string(),
        }));
        let msg = err.to_string();
        assert!(msg.contains("composed workload is invalid"));
        assert!(msg.contains("derived"));
    }

    #[test]
    fn test_run_error_from_config_is_transparent() {
        let err: RunError = ConfigError::NonPositiveConcurrency.into();
        assert_eq!(err.to_string(), "concurrency must be greater than zero");
    }
}
