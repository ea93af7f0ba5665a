//! Run-level options: everything about a run that is not part of the workload.
//!
//! Options load from TOML (every key optional, unknown keys ignored) and are
//! normally layered under CLI flags by the caller.
//!
//! ```toml
//! seed = 1234
//! concurrency_multiplier = 2.0
//! iterations = 50
//! stop_on_first_failure = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// RNG seed. A random one is drawn (and recorded in the result) when absent.
    pub seed: Option<u64>,
    /// Replace the workload's agent count.
    pub concurrency: Option<usize>,
    /// Replace the workload's iteration budget.
    pub iterations: Option<u64>,
    /// Scale the (possibly replaced) agent count. Rounded, never below 1.
    pub concurrency_multiplier: f64,
    /// Scale the (possibly replaced) iteration budget. Rounded.
    pub iteration_multiplier: f64,
    /// Ask remaining agents to stop between iterations once one fails.
    pub stop_on_first_failure: bool,
    /// Record the sequence of visited states in every agent report.
    pub trace_states: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            seed: None,
            concurrency: None,
            iterations: None,
            concurrency_multiplier: 1.0,
            iteration_multiplier: 1.0,
            stop_on_first_failure: false,
            trace_states: false,
        }
    }
}

impl RunOptions {
    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        let options: RunOptions = toml::from_str(raw)?;
        options.validate()?;
        Ok(options)
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.concurrency == Some(0) {
            return Err(ConfigError::InvalidOptions(
                "concurrency override must be greater than zero".to_string(),
            ));
        }
        for (name, value) in [
            ("concurrency_multiplier", self.concurrency_multiplier),
            ("iteration_multiplier", self.iteration_multiplier),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidOptions(format!(
                    "{name} must be a positive number, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Effective (concurrency, iterations) for a workload declaring the given counts.
    pub fn resolve_counts(&self, concurrency: usize, iterations: u64) -> (usize, u64) {
        let concurrency = self.concurrency.unwrap_or(concurrency);
        let iterations = self.iterations.unwrap_or(iterations);
        let concurrency = ((concurrency as f64) * self.concurrency_multiplier).round() as usize;
        let iterations = ((iterations as f64) * self.iteration_multiplier).round() as u64;
        (concurrency.max(1), iterations)
    }

    pub(crate) fn resolve_seed(&self) -> u64 {
        self.seed.unwrap_or_else(rand::random)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_leave_counts_untouched() {
        let options = RunOptions::default();
        assert_eq!(options.resolve_counts(8, 100), (8, 100));
    }

    #[test]
    fn test_overrides_then_multipliers() {
        let options = RunOptions {
            concurrency: Some(4),
            iterations: Some(10),
            concurrency_multiplier: 2.5,
            iteration_multiplier: 0.5,
            ..RunOptions::default()
        };
        assert_eq!(options.resolve_counts(8, 100), (10, 5));
    }

    #[test]
    fn test_small_multiplier_keeps_one_agent() {
        let options = RunOptions {
            concurrency_multiplier: 0.01,
            ..RunOptions::default()
        };
        assert_eq!(options.resolve_counts(3, 7).0, 1);
    }

    #[test]
    fn test_toml_ignores_unknown_keys() {
        let options = RunOptions::from_toml_str(
            r#"
            seed = 42
            iterations = 20
            stop_on_first_failure = true
            dashboard_url = "ignored"
            "#,
        )
        .unwrap();
        assert_eq!(options.seed, Some(42));
        assert_eq!(options.iterations, Some(20));
        assert!(options.stop_on_first_failure);
        assert_eq!(options.concurrency_multiplier, 1.0);
    }

    #[test]
    fn test_invalid_multiplier_rejected() {
        let err = RunOptions::from_toml_str("iteration_multiplier = 0.0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOptions(_)));
        let err = RunOptions::from_toml_str("concurrency = 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOptions(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "seed = 7\ntrace_states = true").unwrap();
        let options = RunOptions::load(file.path()).unwrap();
        assert_eq!(options.seed, Some(7));
        assert!(options.trace_states);
    }

    #[test]
    fn test_explicit_seed_is_used() {
        let options = RunOptions::default().with_seed(99);
        assert_eq!(options.resolve_seed(), 99);
    }
}
