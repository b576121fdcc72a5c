//! A snapshot of a running fiber.

use std::collections::HashSet;

use super::{FiberId, InterruptStatus, Status};
use crate::scope::Scope;

/// What a fiber knows about itself at one point in time.
///
/// Obtained from inside the fiber with
/// [`Effect::descriptor`](crate::effect::Effect::descriptor).
#[derive(Debug, Clone)]
pub struct Descriptor {
    /// The fiber's id.
    pub id: FiberId,
    /// Its status when the snapshot was taken.
    pub status: Status,
    /// Fibers that have requested its interruption.
    pub interruptors: HashSet<FiberId>,
    /// Whether the current region is interruptible.
    pub interrupt_status: InterruptStatus,
    /// The fiber's own scope, closed when it finishes.
    pub scope: Scope,
}
