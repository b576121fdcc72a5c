//! The instruction set consumed by the fiber interpreter.
//!
//! An [`Instruction`] is an immutable description. Children are shared
//! through `Arc` and continuations are `Fn`, so the same description can be
//! run any number of times, by any number of fibers. The interpreter tracks
//! its position with explicit stacks; nothing in this module holds execution
//! state.
//!
//! Dropping a description never recurses into its children: a left-nested
//! chain of any length is taken apart with an explicit work list.

use std::fmt;
use std::sync::{Arc, LazyLock};

use smallvec::{SmallVec, smallvec};

use super::Erased;
use crate::cause::{Cause, Defect};
use crate::exit::Exit;
use crate::fiber::{Descriptor, ErasedFiberRef, FiberId, InterruptStatus, Resume, RuntimeFiber};
use crate::runtime::{Platform, Reporter, Supervisor};
use crate::scope::Scope;

/// The exit of a fiber with both sides erased.
pub type RawExit = Exit<Erased, Erased>;

/// Continues with the successful value of the previous instruction.
pub type Continuation = Arc<dyn Fn(Erased) -> Instruction + Send + Sync>;

/// Handles the full, untyped cause of a failure.
pub type FailureHandler = Arc<dyn Fn(Cause<Erased>) -> Instruction + Send + Sync>;

/// Produces a value lazily.
pub type Thunk = Arc<dyn Fn() -> Erased + Send + Sync>;

/// Registers a resumption callback and optionally completes synchronously.
pub type Register = Arc<dyn Fn(Resume) -> Option<Instruction> + Send + Sync>;

/// Decides what to do after one side of a race has finished first.
pub type RaceContinuation = Arc<dyn Fn(RawExit, RuntimeFiber) -> Instruction + Send + Sync>;

/// Stands in for a child that has been taken out of its parent.
static DETACHED: LazyLock<Arc<Instruction>> = LazyLock::new(|| Arc::new(Instruction::Yield));

/// One node of an effect description.
#[derive(Clone)]
pub enum Instruction {
    /// A pure value.
    Succeed(Erased),
    /// A total side effect.
    EffectTotal(Thunk),
    /// A side effect that may panic; the panic is turned into a typed failure.
    EffectPartial {
        /// The side effect.
        effect: Thunk,
        /// Maps the captured panic to the typed failure.
        on_panic: Arc<dyn Fn(Defect) -> Erased + Send + Sync>,
    },
    /// Fails with a lazily built cause.
    Fail(Arc<dyn Fn() -> Cause<Erased> + Send + Sync>),
    /// Suspends until resumed through the [`Resume`] handed to `register`.
    Async {
        /// Called once per execution with a resume handle for the current epoch.
        register: Register,
        /// Fibers the suspension is waiting for, for diagnostics.
        blocking_on: Vec<FiberId>,
    },
    /// Sequential composition.
    FlatMap {
        /// Runs first.
        effect: Arc<Instruction>,
        /// Receives its value.
        continuation: Continuation,
    },
    /// Structured handling of both outcomes.
    Fold {
        /// The monitored effect.
        effect: Arc<Instruction>,
        /// Receives the full cause on failure.
        on_failure: FailureHandler,
        /// Receives the value on success.
        on_success: Continuation,
    },
    /// Starts a child fiber and produces its [`RuntimeFiber`].
    Fork {
        /// What the child runs.
        effect: Arc<Instruction>,
        /// The scope the child is linked to, instead of the current fork scope.
        scope: Option<Scope>,
        /// Receives the child's unhandled failures instead of the platform reporter.
        report_failure: Option<Reporter>,
    },
    /// Runs `effect` with the given interrupt status.
    InterruptStatus {
        /// The region.
        effect: Arc<Instruction>,
        /// Its interrupt status.
        status: InterruptStatus,
    },
    /// Runs `effect` with `environment` on top of the environment stack.
    Provide {
        /// The environment.
        environment: Erased,
        /// The region.
        effect: Arc<Instruction>,
    },
    /// Reads the current environment.
    Read(Continuation),
    /// Reads this fiber's descriptor.
    Descriptor(Arc<dyn Fn(Descriptor) -> Instruction + Send + Sync>),
    /// Builds the next instruction from the platform and the fiber id.
    Suspend(Arc<dyn Fn(&Platform, FiberId) -> Instruction + Send + Sync>),
    /// Hands control back to the scheduler.
    Yield,
    /// Runs `effect` with `supervisor` watching every fiber it forks.
    Supervise {
        /// The region.
        effect: Arc<Instruction>,
        /// The supervisor.
        supervisor: Arc<dyn Supervisor>,
    },
    /// Runs `effect` forking children into `scope`; `None` restores the
    /// fiber's own scope.
    OverrideForkScope {
        /// The region.
        effect: Arc<Instruction>,
        /// The override.
        scope: Option<Scope>,
    },
    /// Reads the scope new children are linked to.
    GetForkScope(Arc<dyn Fn(Scope) -> Instruction + Send + Sync>),
    /// Reads and replaces a fiber-local value, producing a result.
    FiberRefModify {
        /// The reference.
        fiber_ref: ErasedFiberRef,
        /// Maps the current value to `(result, new value)`.
        modify: Arc<dyn Fn(Erased) -> (Erased, Erased) + Send + Sync>,
    },
    /// Runs two effects concurrently and continues with whichever finishes
    /// first.
    RaceWith {
        /// The left side.
        left: Arc<Instruction>,
        /// The right side.
        right: Arc<Instruction>,
        /// Called if the left side finishes first, with the right fiber.
        left_wins: RaceContinuation,
        /// Called if the right side finishes first, with the left fiber.
        right_wins: RaceContinuation,
        /// The scope both sides are linked to, instead of the current fork scope.
        scope: Option<Scope>,
    },
}

impl Instruction {
    /// A pure value.
    pub fn succeed(value: Erased) -> Self {
        Self::Succeed(value)
    }

    /// The unit value.
    #[must_use]
    pub fn unit() -> Self {
        Self::Succeed(Erased::unit())
    }

    /// Fails with an already built cause.
    #[must_use]
    pub fn halt(cause: Cause<Erased>) -> Self {
        Self::Fail(Arc::new(move || cause.clone()))
    }

    /// Completes with an exit.
    #[must_use]
    pub fn done(exit: RawExit) -> Self {
        match exit {
            Exit::Success(value) => Self::Succeed(value),
            Exit::Failure(cause) => Self::halt(cause),
        }
    }

    /// Sequential composition.
    #[must_use]
    pub fn flat_map(self, continuation: Continuation) -> Self {
        Self::FlatMap {
            effect: Arc::new(self),
            continuation,
        }
    }

    /// Runs `self` and delivers its exit as a value, never failing.
    #[must_use]
    pub fn exit(self) -> Self {
        Self::Fold {
            effect: Arc::new(self),
            on_failure: Arc::new(|cause| Self::Succeed(Erased::new(RawExit::Failure(cause)))),
            on_success: Arc::new(|value| Self::Succeed(Erased::new(RawExit::Success(value)))),
        }
    }

    /// Runs `self` with the given interrupt status.
    #[must_use]
    pub fn with_interrupt_status(self, status: InterruptStatus) -> Self {
        Self::InterruptStatus {
            effect: Arc::new(self),
            status,
        }
    }

    /// The variant name, for diagnostics.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Succeed(_) => "Succeed",
            Self::EffectTotal(_) => "EffectTotal",
            Self::EffectPartial { .. } => "EffectPartial",
            Self::Fail(_) => "Fail",
            Self::Async { .. } => "Async",
            Self::FlatMap { .. } => "FlatMap",
            Self::Fold { .. } => "Fold",
            Self::Fork { .. } => "Fork",
            Self::InterruptStatus { .. } => "InterruptStatus",
            Self::Provide { .. } => "Provide",
            Self::Read(_) => "Read",
            Self::Descriptor(_) => "Descriptor",
            Self::Suspend(_) => "Suspend",
            Self::Yield => "Yield",
            Self::Supervise { .. } => "Supervise",
            Self::OverrideForkScope { .. } => "OverrideForkScope",
            Self::GetForkScope(_) => "GetForkScope",
            Self::FiberRefModify { .. } => "FiberRefModify",
            Self::RaceWith { .. } => "RaceWith",
        }
    }

    /// Takes a child out of its parent, leaving a shared placeholder behind.
    ///
    /// The parent must not be run afterwards.
    pub(crate) fn detach(slot: &mut Arc<Self>) -> Arc<Self> {
        std::mem::replace(slot, DETACHED.clone())
    }

    fn children_mut(&mut self) -> SmallVec<[&mut Arc<Self>; 2]> {
        match self {
            Self::FlatMap { effect, .. }
            | Self::Fold { effect, .. }
            | Self::Fork { effect, .. }
            | Self::InterruptStatus { effect, .. }
            | Self::Provide { effect, .. }
            | Self::Supervise { effect, .. }
            | Self::OverrideForkScope { effect, .. } => smallvec![effect],
            Self::RaceWith { left, right, .. } => smallvec![left, right],
            _ => SmallVec::new(),
        }
    }

    /// Moves every child this node owns alone onto `pending`.
    fn detach_unique_children(&mut self, pending: &mut Vec<Arc<Self>>) {
        for child in self.children_mut() {
            if Arc::strong_count(child) == 1 {
                pending.push(Self::detach(child));
            }
        }
    }
}

impl Drop for Instruction {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.detach_unique_children(&mut pending);
        while let Some(child) = pending.pop() {
            if let Some(mut owned) = Arc::into_inner(child) {
                owned.detach_unique_children(&mut pending);
            }
        }
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeed(value) => formatter.debug_tuple("Succeed").field(value).finish(),
            Self::InterruptStatus { status, .. } => formatter
                .debug_struct("InterruptStatus")
                .field("status", status)
                .finish_non_exhaustive(),
            other => write!(formatter, "{}", other.tag()),
        }
    }
}

static_assertions::assert_impl_all!(Instruction: Send, Sync, Clone);
