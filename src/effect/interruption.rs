//! Interruption control and fiber introspection.

use std::sync::Arc;

use super::{Data, Effect, Instruction};
use crate::cause::Cause;
use crate::fiber::{Descriptor, FiberId, InterruptStatus};

/// Restores the interrupt status that was in effect outside a mask.
///
/// Handed to the closures of [`Effect::uninterruptible_mask`] and
/// [`Effect::interruptible_mask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptStatusRestore {
    status: InterruptStatus,
}

impl InterruptStatusRestore {
    /// The status that will be restored.
    #[must_use]
    pub const fn status(&self) -> InterruptStatus {
        self.status
    }

    /// Runs `effect` with the restored status.
    pub fn apply<R: Data, E: Data, A: Data>(&self, effect: Effect<R, E, A>) -> Effect<R, E, A> {
        effect.interrupt_status(self.status)
    }
}

impl<R: Data, E: Data, A: Data> Effect<R, E, A> {
    /// Runs the effect with the given interrupt status.
    pub fn interrupt_status(self, status: InterruptStatus) -> Self {
        Self::from_instruction(self.into_instruction().with_interrupt_status(status))
    }

    /// Lets the effect be interrupted.
    pub fn interruptible(self) -> Self {
        self.interrupt_status(InterruptStatus::Interruptible)
    }

    /// Shields the effect from interruption.
    ///
    /// A request that arrives meanwhile is remembered and acted on as soon as
    /// the fiber leaves the region.
    pub fn uninterruptible(self) -> Self {
        self.interrupt_status(InterruptStatus::Uninterruptible)
    }

    /// Runs `f` uninterruptibly, handing it a way back to the outer status.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use strand::effect::UIO;
    /// use strand::fiber::InterruptStatus;
    /// use strand::runtime::Runtime;
    ///
    /// let program = UIO::uninterruptible_mask(|restore| {
    ///     restore.apply(UIO::descriptor()).map(|descriptor| descriptor.interrupt_status)
    /// });
    /// let exit = Runtime::default().run_blocking(program);
    /// assert_eq!(exit.into_result().unwrap(), InterruptStatus::Interruptible);
    /// ```
    pub fn uninterruptible_mask(
        f: impl Fn(InterruptStatusRestore) -> Self + Send + Sync + 'static,
    ) -> Self {
        Self::with_restore(f, InterruptStatus::Uninterruptible)
    }

    /// Runs `f` interruptibly, handing it a way back to the outer status.
    pub fn interruptible_mask(
        f: impl Fn(InterruptStatusRestore) -> Self + Send + Sync + 'static,
    ) -> Self {
        Self::with_restore(f, InterruptStatus::Interruptible)
    }

    fn with_restore(
        f: impl Fn(InterruptStatusRestore) -> Self + Send + Sync + 'static,
        status: InterruptStatus,
    ) -> Self {
        Self::from_instruction(Instruction::Descriptor(Arc::new(move |descriptor| {
            let restore = InterruptStatusRestore {
                status: descriptor.interrupt_status,
            };
            f(restore).interrupt_status(status).into_instruction()
        })))
    }

    /// Interrupts the running fiber on its own behalf.
    pub fn interrupt() -> Self {
        Effect::<R, E, FiberId>::fiber_id().flat_map(Self::interrupt_as)
    }

    /// Interrupts the running fiber on behalf of `fiber_id`.
    pub fn interrupt_as(fiber_id: FiberId) -> Self {
        Self::halt(Cause::interrupt(fiber_id))
    }

    /// Builds the effect from the running fiber's descriptor.
    pub fn descriptor_with(f: impl Fn(Descriptor) -> Self + Send + Sync + 'static) -> Self {
        Self::from_instruction(Instruction::Descriptor(Arc::new(move |descriptor| {
            f(descriptor).into_instruction()
        })))
    }
}

impl<R: Data, E: Data> Effect<R, E, Descriptor> {
    /// Reads the running fiber's descriptor.
    pub fn descriptor() -> Self {
        Self::descriptor_with(Self::succeed)
    }
}

impl<R: Data, E: Data> Effect<R, E, FiberId> {
    /// Reads the running fiber's id.
    pub fn fiber_id() -> Self {
        Self::from_instruction(Instruction::Suspend(Arc::new(|_, fiber_id| {
            Instruction::succeed(super::Erased::new(fiber_id))
        })))
    }
}
