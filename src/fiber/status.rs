//! Fiber status.

use std::fmt;

use super::FiberId;

/// Whether a region of an effect reacts to interruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterruptStatus {
    /// Pending interruptions take effect at the next check.
    Interruptible,
    /// Pending interruptions wait until the region exits.
    Uninterruptible,
}

impl InterruptStatus {
    /// Converts from the boolean stored on a fiber's interrupt-status stack.
    #[must_use]
    pub const fn from_flag(interruptible: bool) -> Self {
        if interruptible {
            Self::Interruptible
        } else {
            Self::Uninterruptible
        }
    }

    /// Returns `true` for [`InterruptStatus::Interruptible`].
    #[must_use]
    pub const fn is_interruptible(self) -> bool {
        matches!(self, Self::Interruptible)
    }
}

/// Where a fiber is in its lifecycle.
///
/// `Suspended` keeps the status it replaced, so nested suspensions unwind to
/// whatever came before them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// Executing instructions.
    Running {
        /// The fiber is already unwinding because of an interruption.
        interrupting: bool,
    },
    /// The instruction stack is exhausted and the fiber's scope is closing.
    Finishing {
        /// The fiber is already unwinding because of an interruption.
        interrupting: bool,
    },
    /// Waiting for an asynchronous callback.
    Suspended {
        /// The status before suspension.
        previous: Box<Status>,
        /// Whether an interruption may wake the fiber.
        interruptible: bool,
        /// The async epoch the fiber is waiting on.
        epoch: u64,
        /// Fibers this one is waiting for, if known.
        blocking_on: Vec<FiberId>,
    },
    /// Finished; the exit is available.
    Done,
}

impl Status {
    /// Returns `true` if the fiber is done.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns `true` if the fiber is suspended.
    #[must_use]
    pub const fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended { .. })
    }

    /// Returns `true` if the fiber is unwinding because of an interruption.
    ///
    /// For a suspended fiber this is the flag of the status it suspended from.
    #[must_use]
    pub fn is_interrupting(&self) -> bool {
        let mut current = self;
        loop {
            match current {
                Self::Running { interrupting } | Self::Finishing { interrupting } => {
                    return *interrupting;
                }
                Self::Suspended { previous, .. } => current = previous,
                Self::Done => return false,
            }
        }
    }

    /// Returns `true` if the fiber has finished its stack and is closing its
    /// scope, reading through suspensions.
    #[must_use]
    pub fn is_finishing(&self) -> bool {
        let mut current = self;
        loop {
            match current {
                Self::Finishing { .. } => return true,
                Self::Suspended { previous, .. } => current = previous,
                Self::Running { .. } | Self::Done => return false,
            }
        }
    }

    /// Returns a copy with the interrupting flag replaced.
    ///
    /// A suspended status is rewritten in its innermost non-suspended
    /// ancestor.
    #[must_use]
    pub fn with_interrupting(&self, interrupting: bool) -> Self {
        match self {
            Self::Running { .. } => Self::Running { interrupting },
            Self::Finishing { .. } => Self::Finishing { interrupting },
            Self::Suspended {
                previous,
                interruptible,
                epoch,
                blocking_on,
            } => Self::Suspended {
                previous: Box::new(previous.with_interrupting(interrupting)),
                interruptible: *interruptible,
                epoch: *epoch,
                blocking_on: blocking_on.clone(),
            },
            Self::Done => Self::Done,
        }
    }

    /// Wraps `self` into a suspended status.
    #[must_use]
    pub fn suspend(self, interruptible: bool, epoch: u64, blocking_on: Vec<FiberId>) -> Self {
        Self::Suspended {
            previous: Box::new(self),
            interruptible,
            epoch,
            blocking_on,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running { interrupting: false } => write!(formatter, "Running"),
            Self::Running { interrupting: true } => write!(formatter, "Running(interrupting)"),
            Self::Finishing { interrupting: false } => write!(formatter, "Finishing"),
            Self::Finishing { interrupting: true } => {
                write!(formatter, "Finishing(interrupting)")
            }
            Self::Suspended { epoch, .. } => write!(formatter, "Suspended(epoch {epoch})"),
            Self::Done => write!(formatter, "Done"),
        }
    }
}
