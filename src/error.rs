//! Error types for the runtime.
//!
//! This module collects the concrete error values the runtime produces on its
//! own behalf: configuration and startup failures, the error synthesized when a
//! [`Cause`](crate::cause::Cause) made only of interruptions is squashed,
//! string defects, and [`FiberFailure`], the error form of a failed fiber.

use std::fmt;

use thiserror::Error;

use crate::cause::Cause;
use crate::fiber::FiberId;

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors that can occur when loading a [`RuntimeConfig`](crate::runtime::RuntimeConfig).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// The name of the environment variable.
        key: String,
        /// Description of why the value is invalid.
        message: String,
    },

    /// A numeric setting that must be positive was set to zero.
    #[error("{key} must be greater than 0")]
    Zero {
        /// The name of the setting.
        key: &'static str,
    },
}

/// Errors that can occur when building a [`Runtime`](crate::runtime::Runtime)
/// from the environment.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The dedicated scheduler could not be started.
    #[error("Failed to start the scheduler: {0}")]
    Scheduler(#[from] std::io::Error),
}

// =============================================================================
// Interruption
// =============================================================================

/// The error a cause is squashed into when it carries no typed failure and no
/// defect, only interruptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptedError {
    fibers: Vec<FiberId>,
}

impl InterruptedError {
    /// Creates an error naming the fibers that caused the interruption.
    ///
    /// The ids are stored sorted by sequence number.
    #[must_use]
    pub fn new(mut fibers: Vec<FiberId>) -> Self {
        fibers.sort_unstable();
        Self { fibers }
    }

    /// Returns the interrupting fibers, sorted.
    #[must_use]
    pub fn fibers(&self) -> &[FiberId] {
        &self.fibers
    }
}

impl fmt::Display for InterruptedError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fibers.is_empty() {
            return write!(formatter, "Interrupted");
        }
        write!(formatter, "Interrupted by fibers: ")?;
        for (index, fiber) in self.fibers.iter().enumerate() {
            if index > 0 {
                write!(formatter, ", ")?;
            }
            write!(formatter, "{fiber}")?;
        }
        Ok(())
    }
}

impl std::error::Error for InterruptedError {}

// =============================================================================
// Defect Messages
// =============================================================================

/// A defect described only by a message.
///
/// Produced by [`Defect::message`](crate::cause::Defect::message) and when a
/// panic payload is captured.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DefectMessage(pub String);

// =============================================================================
// FiberFailure
// =============================================================================

/// The error form of a failed [`Exit`](crate::exit::Exit).
///
/// Wraps the full [`Cause`] so that no information is lost when a failure
/// leaves the effect world through a `Result`.
///
/// # Examples
///
/// ```rust
/// use strand::cause::Cause;
/// use strand::error::FiberFailure;
///
/// let failure = FiberFailure::new(Cause::fail("boom"));
/// assert_eq!(failure.cause().failures(), vec!["boom"]);
/// ```
#[derive(Clone, PartialEq)]
pub struct FiberFailure<E> {
    cause: Cause<E>,
}

impl<E> FiberFailure<E> {
    /// Wraps a cause.
    #[must_use]
    pub const fn new(cause: Cause<E>) -> Self {
        Self { cause }
    }

    /// Returns the wrapped cause.
    #[must_use]
    pub const fn cause(&self) -> &Cause<E> {
        &self.cause
    }

    /// Unwraps the cause.
    #[must_use]
    pub fn into_cause(self) -> Cause<E> {
        self.cause
    }
}

impl<E: fmt::Debug> fmt::Debug for FiberFailure<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FiberFailure")
            .field("cause", &self.cause)
            .finish()
    }
}

impl<E: fmt::Debug> fmt::Display for FiberFailure<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.cause.pretty())
    }
}

impl<E: fmt::Debug> std::error::Error for FiberFailure<E> {}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn config_error_invalid_value_display() {
        let error = ConfigError::InvalidValue {
            key: "STRAND_MAX_OPERATIONS".to_string(),
            message: "invalid digit found in string".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid value for STRAND_MAX_OPERATIONS: invalid digit found in string"
        );
    }

    #[rstest]
    fn config_error_zero_display() {
        let error = ConfigError::Zero {
            key: "STRAND_WORKER_THREADS",
        };
        assert_eq!(error.to_string(), "STRAND_WORKER_THREADS must be greater than 0");
    }

    #[rstest]
    fn runtime_error_wraps_config_errors() {
        let error = RuntimeError::from(ConfigError::Zero {
            key: "STRAND_MAX_OPERATIONS",
        });
        assert_eq!(error.to_string(), "STRAND_MAX_OPERATIONS must be greater than 0");
    }

    #[rstest]
    fn interrupted_error_without_fibers() {
        assert_eq!(InterruptedError::new(Vec::new()).to_string(), "Interrupted");
    }

    #[rstest]
    fn interrupted_error_lists_sorted_fibers() {
        let first = FiberId::new(0, 3);
        let second = FiberId::new(0, 1);
        let error = InterruptedError::new(vec![first, second]);

        assert_eq!(error.fibers(), &[second, first]);
        assert_eq!(error.to_string(), "Interrupted by fibers: #1, #3");
    }

    #[rstest]
    fn fiber_failure_displays_rendered_cause() {
        let failure = FiberFailure::new(Cause::fail("boom"));
        assert!(failure.to_string().contains("\"boom\""));
    }
}
