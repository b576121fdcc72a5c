//! Host task dispatch.
//!
//! Fibers never block a native thread. Whenever a fiber must start, resume,
//! yield or be preempted, it hands a [`Task`] to its platform's
//! [`Scheduler`], which decides where and when that task runs.
//!
//! Two implementations ship with the crate:
//!
//! - [`TokioScheduler`] (feature `tokio`, enabled by default) spawns tasks on
//!   a tokio runtime.
//! - [`ManualScheduler`] queues tasks until the caller drives them, with a
//!   virtual clock for timers. Tests use it to pin down ordering.

mod manual;
#[cfg(feature = "tokio")]
mod tokio_scheduler;

pub use manual::ManualScheduler;
#[cfg(feature = "tokio")]
pub use tokio_scheduler::TokioScheduler;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A unit of work handed to a scheduler.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks on behalf of fibers.
///
/// # Contract
///
/// - `dispatch_later` must not run the task before returning.
/// - `dispatch_now` may run the task before returning, but never re-entrantly
///   inside another task dispatched with `dispatch_now` on the same thread.
/// - A task dispatched with `dispatch_after` runs no earlier than `delay`
///   after dispatch, unless its [`TimerHandle`] is cancelled first, in which
///   case it never runs.
pub trait Scheduler: Send + Sync {
    /// Runs `task` on the calling thread as soon as possible.
    ///
    /// The default implementation drains a thread-local queue: if the calling
    /// thread is already draining, the task is queued behind the running one.
    fn dispatch_now(&self, task: Task) {
        run_now(task);
    }

    /// Runs `task` some time after this call returns.
    fn dispatch_later(&self, task: Task);

    /// Runs `task` after `delay`.
    fn dispatch_after(&self, delay: Duration, task: Task) -> TimerHandle;
}

/// Cancels a task scheduled with [`Scheduler::dispatch_after`].
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    /// Creates a handle that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prevents the task from running if it has not started yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Wraps `task` so it does nothing once this handle is cancelled.
    #[must_use]
    pub fn guard(&self, task: Task) -> Task {
        let handle = self.clone();
        Box::new(move || {
            if !handle.is_cancelled() {
                task();
            }
        })
    }
}

thread_local! {
    static NOW_QUEUE: RefCell<VecDeque<Task>> = const { RefCell::new(VecDeque::new()) };
    static DRAINING: Cell<bool> = const { Cell::new(false) };
}

/// Resets the draining flag even if a task unwinds.
struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        DRAINING.with(|draining| draining.set(false));
    }
}

/// Runs `task` on the calling thread through the thread-local queue.
pub fn run_now(task: Task) {
    NOW_QUEUE.with(|queue| queue.borrow_mut().push_back(task));
    if DRAINING.with(|draining| draining.replace(true)) {
        return;
    }
    let _guard = DrainGuard;
    while let Some(task) = NOW_QUEUE.with(|queue| queue.borrow_mut().pop_front()) {
        task();
    }
}
