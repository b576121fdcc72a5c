//! Runtime configuration.
//!
//! Settings come from code or from environment variables, with explicit
//! errors for malformed values.
//!
//! # Example
//!
//! ```rust
//! use strand::runtime::RuntimeConfig;
//!
//! let config = RuntimeConfig::default();
//! assert_eq!(config.max_operations, 2048);
//! assert!(config.report_unhandled);
//! ```

use std::env;
use std::str::FromStr;

use super::platform::DEFAULT_MAX_OPERATIONS;
use crate::error::ConfigError;

/// Environment variable for [`RuntimeConfig::max_operations`].
pub const MAX_OPERATIONS_VAR: &str = "STRAND_MAX_OPERATIONS";
/// Environment variable for [`RuntimeConfig::worker_threads`].
pub const WORKER_THREADS_VAR: &str = "STRAND_WORKER_THREADS";
/// Environment variable for [`RuntimeConfig::report_unhandled`].
pub const REPORT_UNHANDLED_VAR: &str = "STRAND_REPORT_UNHANDLED";

/// Settings a [`Platform`](super::Platform) is built from.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RuntimeConfig {
    /// Operations a fiber performs before yielding to its scheduler.
    pub max_operations: usize,
    /// Worker threads of a dedicated tokio runtime. `None` shares the
    /// caller's runtime or the process-wide one.
    pub worker_threads: Option<usize>,
    /// Whether unhandled fiber failures are reported.
    pub report_unhandled: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_operations: DEFAULT_MAX_OPERATIONS,
            worker_threads: None,
            report_unhandled: true,
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `STRAND_MAX_OPERATIONS`: positive integer (optional, default: 2048)
    /// - `STRAND_WORKER_THREADS`: positive integer (optional)
    /// - `STRAND_REPORT_UNHANDLED`: `true` or `false` (optional, default: true)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable cannot be parsed and
    /// `ConfigError::Zero` if a count is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which maps a variable name to
    /// its value.
    ///
    /// # Errors
    ///
    /// See [`RuntimeConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let max_operations = get_optional_parsed(&lookup, MAX_OPERATIONS_VAR)?
            .unwrap_or(DEFAULT_MAX_OPERATIONS);
        let worker_threads = get_optional_parsed(&lookup, WORKER_THREADS_VAR)?;
        let report_unhandled = get_optional_parsed(&lookup, REPORT_UNHANDLED_VAR)?.unwrap_or(true);

        let config = Self {
            max_operations,
            worker_threads,
            report_unhandled,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that counts are positive.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Zero` naming the offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_operations == 0 {
            return Err(ConfigError::Zero {
                key: MAX_OPERATIONS_VAR,
            });
        }
        if matches!(self.worker_threads, Some(0)) {
            return Err(ConfigError::Zero {
                key: WORKER_THREADS_VAR,
            });
        }
        Ok(())
    }
}

/// Gets an optional variable and parses it.
fn get_optional_parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|error| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: error.to_string(),
                })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| values.get(key).cloned()
    }

    #[rstest]
    fn empty_environment_gives_defaults() {
        assert_eq!(
            RuntimeConfig::from_lookup(lookup(&[])).unwrap(),
            RuntimeConfig::default()
        );
    }

    #[rstest]
    fn reads_every_variable() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            (MAX_OPERATIONS_VAR, "128"),
            (WORKER_THREADS_VAR, " 4 "),
            (REPORT_UNHANDLED_VAR, "false"),
        ]))
        .unwrap();
        assert_eq!(
            config,
            RuntimeConfig {
                max_operations: 128,
                worker_threads: Some(4),
                report_unhandled: false,
            }
        );
    }

    #[rstest]
    #[case(MAX_OPERATIONS_VAR, "many")]
    #[case(WORKER_THREADS_VAR, "-1")]
    #[case(REPORT_UNHANDLED_VAR, "yes")]
    fn malformed_values_are_rejected(#[case] key: &str, #[case] value: &str) {
        let error = RuntimeConfig::from_lookup(lookup(&[(key, value)])).unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue { key: ref k, .. } if k == key));
    }

    #[rstest]
    #[case(MAX_OPERATIONS_VAR)]
    #[case(WORKER_THREADS_VAR)]
    fn zero_counts_are_rejected(#[case] key: &'static str) {
        let error = RuntimeConfig::from_lookup(lookup(&[(key, "0")])).unwrap_err();
        assert_eq!(error, ConfigError::Zero { key });
    }

    #[cfg(feature = "serde")]
    #[rstest]
    fn missing_fields_take_defaults() {
        let config: RuntimeConfig = serde_json::from_str(r#"{"max_operations": 64}"#).unwrap();
        assert_eq!(
            config,
            RuntimeConfig {
                max_operations: 64,
                ..RuntimeConfig::default()
            }
        );
    }
}
