//! Fiber identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

static NEXT_SEQUENCE_NUMBER: AtomicU64 = AtomicU64::new(1);

/// Identifies a fiber.
///
/// Sequence numbers are drawn from a process-wide counter starting at 1, so
/// ids made later always order after ids made earlier. `FiberId::none()` is
/// reserved for interruptions that no fiber performed.
///
/// # Examples
///
/// ```rust
/// use strand::fiber::FiberId;
///
/// let first = FiberId::make();
/// let second = FiberId::make();
/// assert!(first.sequence_number() < second.sequence_number());
/// assert_eq!(FiberId::new(0, 42).to_string(), "#42");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FiberId {
    sequence_number: u64,
    start_time_millis: u64,
}

impl FiberId {
    /// Creates an id from its parts.
    #[must_use]
    pub const fn new(start_time_millis: u64, sequence_number: u64) -> Self {
        Self {
            sequence_number,
            start_time_millis,
        }
    }

    /// The id used when no fiber is responsible.
    #[must_use]
    pub const fn none() -> Self {
        Self::new(0, 0)
    }

    /// Allocates a fresh id stamped with the current wall-clock time.
    #[must_use]
    pub fn make() -> Self {
        let sequence_number = NEXT_SEQUENCE_NUMBER.fetch_add(1, Ordering::Relaxed);
        let start_time_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        Self::new(start_time_millis, sequence_number)
    }

    /// The process-wide sequence number.
    #[must_use]
    pub const fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Milliseconds since the Unix epoch at which the fiber was created.
    #[must_use]
    pub const fn start_time_millis(&self) -> u64 {
        self.start_time_millis
    }

    /// Returns `true` for [`FiberId::none`].
    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.sequence_number == 0
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{}", self.sequence_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn made_ids_are_unique_and_increasing() {
        let ids: Vec<FiberId> = (0..100).map(|_| FiberId::make()).collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[rstest]
    fn none_is_distinguished() {
        assert!(FiberId::none().is_none());
        assert!(!FiberId::make().is_none());
    }

    #[rstest]
    fn ordering_follows_sequence_number() {
        assert!(FiberId::new(999, 1) < FiberId::new(0, 2));
    }
}
