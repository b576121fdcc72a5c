//! Handles to running fibers.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use super::fiber_ref::inherit_locals;
use super::{FiberContext, FiberId, Status};
use crate::effect::{Data, Effect, IO, RawExit, UIO, typed_exit};
use crate::exit::Exit;

/// An untyped handle to a fiber.
///
/// This is what the interpreter produces for a fork and what supervisors
/// and race continuations receive. [`Fiber`] adds the fiber's error and
/// value types on top.
#[derive(Clone)]
pub struct RuntimeFiber {
    context: Arc<FiberContext>,
}

impl RuntimeFiber {
    pub(crate) const fn new(context: Arc<FiberContext>) -> Self {
        Self { context }
    }

    pub(crate) const fn context(&self) -> &Arc<FiberContext> {
        &self.context
    }

    /// The fiber's id.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.context.id()
    }

    /// Suspends until the fiber is done.
    pub fn await_exit(&self) -> UIO<RawExit> {
        Effect::from_instruction(self.context.await_exit())
    }

    /// Interrupts the fiber on behalf of `by` and waits for it to finish.
    pub fn interrupt_as(&self, by: FiberId) -> UIO<RawExit> {
        Effect::from_instruction(self.context.interrupt_as(by))
    }

    /// Requests interruption on behalf of `by` without waiting.
    pub fn interrupt_now(&self, by: FiberId) {
        self.context.interrupt_as_now(by);
    }

    /// The exit, if the fiber is done.
    #[must_use]
    pub fn poll_now(&self) -> Option<RawExit> {
        self.context.poll()
    }

    /// The fiber's current status.
    #[must_use]
    pub fn status_now(&self) -> Status {
        self.context.status()
    }

    /// Merges the fiber's fiber-local values into the running fiber.
    pub fn inherit_refs(&self) -> UIO<()> {
        let context = self.context.clone();
        UIO::suspend(move || Effect::from_instruction(inherit_locals(&context.locals())))
    }

    /// Adds the error and value types back.
    ///
    /// A value or failure of another type shows up as a defect in the typed
    /// exit.
    #[must_use]
    pub fn typed<E: Data, A: Data>(self) -> Fiber<E, A> {
        Fiber {
            raw: self,
            marker: PhantomData,
        }
    }
}

impl fmt::Debug for RuntimeFiber {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RuntimeFiber")
            .field("id", &self.id())
            .field("status", &self.status_now())
            .finish()
    }
}

impl PartialEq for RuntimeFiber {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.context, &other.context)
    }
}

impl Eq for RuntimeFiber {}

/// A fiber that fails with `E` or succeeds with `A`.
///
/// # Examples
///
/// ```rust
/// use strand::effect::UIO;
/// use strand::runtime::Runtime;
///
/// let program = UIO::succeed(20)
///     .map(|n| n + 1)
///     .fork()
///     .flat_map(|fiber| fiber.join())
///     .map(|n| n * 2);
/// let exit = Runtime::default().run_blocking(program);
/// assert_eq!(exit.into_result().unwrap(), 42);
/// ```
pub struct Fiber<E, A> {
    raw: RuntimeFiber,
    marker: PhantomData<fn() -> (E, A)>,
}

impl<E: Data, A: Data> Fiber<E, A> {
    /// The fiber's id.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.raw.id()
    }

    /// The untyped handle.
    #[must_use]
    pub const fn raw(&self) -> &RuntimeFiber {
        &self.raw
    }

    /// Suspends until the fiber is done, producing its exit.
    pub fn await_exit(&self) -> UIO<Exit<E, A>> {
        self.raw.await_exit().map(typed_exit::<E, A>)
    }

    /// Suspends until the fiber is done, then succeeds or fails like it.
    ///
    /// On success the fiber's fiber-local values are merged into the running
    /// fiber.
    pub fn join(&self) -> IO<E, A> {
        let inherit = self.raw.inherit_refs();
        self.await_exit().widen().flat_map(move |exit: Exit<E, A>| {
            let inherit = inherit.clone();
            match exit {
                Exit::Success(value) => inherit.widen().as_value(value),
                Exit::Failure(cause) => IO::halt(cause),
            }
        })
    }

    /// Interrupts the fiber on behalf of the running fiber and waits for it
    /// to finish.
    pub fn interrupt(&self) -> UIO<Exit<E, A>> {
        let fiber = self.clone();
        UIO::fiber_id().flat_map(move |by| fiber.interrupt_as(by))
    }

    /// Interrupts the fiber on behalf of `by` and waits for it to finish.
    pub fn interrupt_as(&self, by: FiberId) -> UIO<Exit<E, A>> {
        self.raw.interrupt_as(by).map(typed_exit::<E, A>)
    }

    /// The exit, if the fiber is done.
    pub fn poll(&self) -> UIO<Option<Exit<E, A>>> {
        let fiber = self.clone();
        UIO::sync(move || fiber.poll_now())
    }

    /// The fiber's current status.
    pub fn status(&self) -> UIO<Status> {
        let fiber = self.raw.clone();
        UIO::sync(move || fiber.status_now())
    }

    /// Merges the fiber's fiber-local values into the running fiber.
    pub fn inherit_refs(&self) -> UIO<()> {
        self.raw.inherit_refs()
    }

    /// The exit, if the fiber is done, read immediately.
    #[must_use]
    pub fn poll_now(&self) -> Option<Exit<E, A>> {
        self.raw.poll_now().map(typed_exit::<E, A>)
    }

    /// The fiber's current status, read immediately.
    #[must_use]
    pub fn status_now(&self) -> Status {
        self.raw.status_now()
    }
}

impl<E, A> Clone for Fiber<E, A> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            marker: PhantomData,
        }
    }
}

impl<E, A> fmt::Debug for Fiber<E, A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Fiber")
            .field("id", &self.raw.id())
            .field("status", &self.raw.status_now())
            .finish()
    }
}

static_assertions::assert_impl_all!(RuntimeFiber: Send, Sync, Clone);
static_assertions::assert_impl_all!(Fiber<String, u32>: Send, Sync, Clone);
