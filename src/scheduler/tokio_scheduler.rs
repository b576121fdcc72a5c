//! A scheduler backed by tokio.
//!
//! # Runtime Selection
//!
//! Tasks are spawned on, in order of preference:
//!
//! 1. the runtime this scheduler was built with ([`TokioScheduler::from_handle`],
//!    [`TokioScheduler::with_worker_threads`]);
//! 2. the runtime of the calling thread, if there is one;
//! 3. a lazily built, process-wide multi-thread runtime with one worker per
//!    CPU core, which is never dropped.
//!
//! The handle to the process-wide runtime is cached per thread so repeated
//! dispatches from outside any runtime do not go through the `LazyLock`.

use std::cell::RefCell;
use std::sync::LazyLock;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};

use super::{Scheduler, Task, TimerHandle};

static GLOBAL_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("strand-worker")
        .enable_all()
        .build()
        .expect("Failed to create global tokio runtime")
});

thread_local! {
    static CACHED_HANDLE: RefCell<Option<Handle>> = const { RefCell::new(None) };
}

/// Returns the calling thread's runtime handle, or the process-wide one.
#[must_use]
pub(crate) fn current_or_global() -> Handle {
    if let Ok(current) = Handle::try_current() {
        return current;
    }
    CACHED_HANDLE.with(|cached| {
        cached
            .borrow_mut()
            .get_or_insert_with(|| GLOBAL_RUNTIME.handle().clone())
            .clone()
    })
}

/// Dispatches fiber tasks onto tokio worker threads.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use strand::effect::UIO;
/// use strand::runtime::{Platform, Runtime};
/// use strand::scheduler::TokioScheduler;
///
/// let platform = Platform::builder()
///     .scheduler(Arc::new(TokioScheduler::new()))
///     .build();
/// let exit = Runtime::new(platform).run_blocking(UIO::succeed(1).map(|n| n + 1));
/// assert_eq!(exit.into_result().unwrap(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct TokioScheduler {
    handle: Option<Handle>,
}

impl TokioScheduler {
    /// Uses the caller's runtime when there is one, the process-wide runtime
    /// otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Always spawns on `handle`.
    #[must_use]
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Builds a dedicated multi-thread runtime with `worker_threads` workers.
    ///
    /// Like the process-wide runtime, the dedicated runtime is never dropped:
    /// fibers may still hold the scheduler from a worker thread, where
    /// dropping a runtime is not allowed.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while building the runtime.
    pub fn with_worker_threads(worker_threads: usize) -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name("strand-worker")
            .enable_all()
            .build()?;
        let runtime: &'static Runtime = Box::leak(Box::new(runtime));
        Ok(Self::from_handle(runtime.handle().clone()))
    }

    fn handle(&self) -> Handle {
        self.handle.clone().unwrap_or_else(current_or_global)
    }
}

impl Scheduler for TokioScheduler {
    fn dispatch_later(&self, task: Task) {
        drop(self.handle().spawn(async move { task() }));
    }

    fn dispatch_after(&self, delay: Duration, task: Task) -> TimerHandle {
        let timer = TimerHandle::new();
        let guarded = timer.guard(task);
        drop(self.handle().spawn(async move {
            tokio::time::sleep(delay).await;
            guarded();
        }));
        timer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;

    #[test]
    fn dispatch_later_runs_outside_a_runtime() {
        let scheduler = TokioScheduler::new();
        let (sender, receiver) = mpsc::channel();
        scheduler.dispatch_later(Box::new(move || sender.send(42).unwrap()));
        assert_eq!(receiver.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dispatch_after_waits_for_the_delay() {
        let scheduler = TokioScheduler::new();
        let (sender, receiver) = tokio::sync::oneshot::channel();
        let started = tokio::time::Instant::now();
        let _timer = scheduler.dispatch_after(
            Duration::from_millis(20),
            Box::new(move || {
                let _ = sender.send(());
            }),
        );
        receiver.await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelled_timer_never_fires() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let timer = scheduler.dispatch_after(
            Duration::from_millis(10),
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );
        timer.cancel();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn dedicated_runtime_runs_tasks() {
        let scheduler = TokioScheduler::with_worker_threads(1).unwrap();
        let (sender, receiver) = mpsc::channel();
        scheduler.dispatch_later(Box::new(move || sender.send("ran").unwrap()));
        assert_eq!(receiver.recv_timeout(Duration::from_secs(5)).unwrap(), "ran");
    }
}
