//! Running effects.
//!
//! A [`Runtime`] pairs an environment with a [`Platform`] and turns effect
//! descriptions into root fibers. Results come back through a callback, a
//! blocking call or a future.
//!
//! # Examples
//!
//! ```rust
//! use strand::effect::{IO, URIO};
//! use strand::runtime::{Platform, Runtime};
//!
//! let runtime = Runtime::with_environment(10_u32, Platform::default());
//! let program = URIO::<u32, u32>::access(|base| base * 4).widen::<String>()
//!     .flat_map(|n| IO::succeed(n + 2).lift());
//!
//! let exit = runtime.run_blocking(program);
//! assert_eq!(exit.into_result().unwrap(), 42);
//! ```
//!
//! # Configuration
//!
//! [`Runtime::from_env`] reads [`RuntimeConfig`] from `STRAND_*`
//! environment variables:
//!
//! - `STRAND_MAX_OPERATIONS`: operations per fiber between yields
//! - `STRAND_WORKER_THREADS`: size of a dedicated tokio runtime
//! - `STRAND_REPORT_UNHANDLED`: whether unhandled failures are reported

mod config;
mod platform;
pub mod supervisor;

pub use config::{MAX_OPERATIONS_VAR, REPORT_UNHANDLED_VAR, RuntimeConfig, WORKER_THREADS_VAR};
pub use platform::{DEFAULT_MAX_OPERATIONS, Platform, PlatformBuilder, Reporter};
pub use supervisor::{Supervisor, Track};

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, mpsc};
use std::task::{Context, Poll};

use futures::channel::oneshot;
use pin_project_lite::pin_project;

use crate::cause::Defect;
use crate::effect::{Data, Effect, Erased, RawExit, typed_exit};
use crate::error::RuntimeError;
use crate::exit::Exit;
use crate::fiber::{Fiber, FiberContext, FiberId, RuntimeFiber};

/// Runs effects that need an environment of type `R`.
///
/// Every run starts a new root fiber with its own copy of the environment.
/// Cloning a runtime is cheap and shares the platform.
#[derive(Clone)]
pub struct Runtime<R = ()> {
    environment: R,
    platform: Arc<Platform>,
}

impl Runtime<()> {
    /// A runtime without an environment.
    #[must_use]
    pub fn new(platform: Platform) -> Self {
        Self::with_environment((), platform)
    }

    /// A runtime configured from `STRAND_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Config`] if a variable is invalid and
    /// [`RuntimeError::Scheduler`] if a dedicated tokio runtime cannot be
    /// started.
    pub fn from_env() -> Result<Self, RuntimeError> {
        let config = RuntimeConfig::from_env()?;
        Self::from_config(&config)
    }

    /// A runtime configured from `config`.
    ///
    /// # Errors
    ///
    /// See [`Runtime::from_env`].
    pub fn from_config(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        config.validate()?;
        let platform = Platform::from_config(config)?;
        tracing::debug!(
            max_operations = config.max_operations,
            worker_threads = ?config.worker_threads,
            "runtime configured"
        );
        Ok(Self::new(platform))
    }
}

impl<R: Data> Runtime<R> {
    /// A runtime whose fibers start with `environment`.
    pub fn with_environment(environment: R, platform: Platform) -> Self {
        Self {
            environment,
            platform: Arc::new(platform),
        }
    }

    /// The shared platform.
    #[must_use]
    pub const fn platform(&self) -> &Arc<Platform> {
        &self.platform
    }

    /// The environment every root fiber starts with.
    #[must_use]
    pub const fn environment(&self) -> &R {
        &self.environment
    }

    /// Starts `effect` on a root fiber and returns its handle.
    pub fn fork<E: Data, A: Data>(&self, effect: Effect<R, E, A>) -> Fiber<E, A> {
        self.start(effect, None).typed()
    }

    /// Starts `effect` and calls `callback` with its exit once it is done.
    ///
    /// The callback runs on whichever thread finishes the fiber.
    pub fn run_async<E: Data, A: Data>(
        &self,
        effect: Effect<R, E, A>,
        callback: impl FnOnce(Exit<E, A>) + Send + 'static,
    ) {
        self.run_cancelable(effect, callback);
    }

    /// Like [`run_async`](Self::run_async), returning a handle that
    /// interrupts the fiber.
    pub fn run_cancelable<E: Data, A: Data>(
        &self,
        effect: Effect<R, E, A>,
        callback: impl FnOnce(Exit<E, A>) + Send + 'static,
    ) -> Cancel {
        let observer = Box::new(move |exit: &RawExit| callback(typed_exit(exit.clone())));
        Cancel {
            fiber: self.start(effect, Some(observer)),
        }
    }

    /// Starts `effect` and blocks the calling thread until it is done.
    ///
    /// This must not be called from a thread the platform's scheduler needs
    /// to make progress: a tokio worker thread of the scheduler's runtime, or
    /// any thread while a [`ManualScheduler`](crate::scheduler::ManualScheduler)
    /// is in use. Use [`run_future`](Self::run_future) inside async code.
    pub fn run_blocking<E: Data, A: Data>(&self, effect: Effect<R, E, A>) -> Exit<E, A> {
        let (sender, receiver) = mpsc::channel();
        self.run_async(effect, move |exit| {
            let _ = sender.send(exit);
        });
        receiver
            .recv()
            .unwrap_or_else(|_| Exit::die(Defect::message("fiber finished without an exit")))
    }

    /// Starts `effect` and returns a future of its exit.
    ///
    /// Dropping the future before it completes interrupts the fiber.
    pub fn run_future<E: Data, A: Data>(&self, effect: Effect<R, E, A>) -> ExitFuture<E, A> {
        let (sender, receiver) = oneshot::channel();
        let observer = Box::new(move |exit: &RawExit| {
            let _ = sender.send(exit.clone());
        });
        ExitFuture {
            receiver,
            fiber: self.start(effect, Some(observer)),
            finished: false,
            marker: PhantomData,
        }
    }

    fn start<E: Data, A: Data>(
        &self,
        effect: Effect<R, E, A>,
        observer: Option<Box<dyn FnOnce(&RawExit) + Send>>,
    ) -> RuntimeFiber {
        let context = FiberContext::root(
            self.platform.clone(),
            Erased::new(self.environment.clone()),
        );
        if let Some(observer) = observer {
            // A fiber that has not started cannot be done yet.
            let _ = context.observe(observer);
        }
        context.start_root(effect.into_instruction());
        RuntimeFiber::new(context)
    }
}

#[cfg(feature = "tokio")]
impl Default for Runtime<()> {
    /// A runtime on the default platform: tokio scheduling, reporting
    /// through `tracing`.
    fn default() -> Self {
        Self::new(Platform::default())
    }
}

impl<R: fmt::Debug> fmt::Debug for Runtime<R> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Runtime")
            .field("environment", &self.environment)
            .field("platform", &self.platform)
            .finish()
    }
}

/// Interrupts a fiber started with [`Runtime::run_cancelable`].
#[derive(Debug, Clone)]
pub struct Cancel {
    fiber: RuntimeFiber,
}

impl Cancel {
    /// Requests interruption without waiting for the fiber to finish.
    ///
    /// The fiber's callback still runs, with an interrupted exit unless the
    /// fiber finished first.
    pub fn cancel(&self) {
        self.fiber.interrupt_now(FiberId::none());
    }

    /// The fiber being run.
    #[must_use]
    pub const fn fiber(&self) -> &RuntimeFiber {
        &self.fiber
    }
}

pin_project! {
    /// The exit of a fiber started with [`Runtime::run_future`].
    ///
    /// Dropping the future before it completes interrupts the fiber.
    pub struct ExitFuture<E, A> {
        #[pin]
        receiver: oneshot::Receiver<RawExit>,
        fiber: RuntimeFiber,
        finished: bool,
        marker: PhantomData<fn() -> (E, A)>,
    }

    impl<E, A> PinnedDrop for ExitFuture<E, A> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if !*this.finished {
                this.fiber.interrupt_now(FiberId::none());
            }
        }
    }
}

impl<E, A> ExitFuture<E, A> {
    /// The fiber being run.
    #[must_use]
    pub const fn fiber(&self) -> &RuntimeFiber {
        &self.fiber
    }
}

impl<E: Data, A: Data> Future for ExitFuture<E, A> {
    type Output = Exit<E, A>;

    fn poll(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.receiver.poll(context) {
            Poll::Ready(Ok(exit)) => {
                *this.finished = true;
                Poll::Ready(typed_exit(exit))
            }
            Poll::Ready(Err(oneshot::Canceled)) => {
                *this.finished = true;
                Poll::Ready(Exit::die(Defect::message("fiber finished without an exit")))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<E, A> fmt::Debug for ExitFuture<E, A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ExitFuture")
            .field("fiber", &self.fiber)
            .field("finished", &self.finished)
            .finish()
    }
}

static_assertions::assert_impl_all!(Runtime<u32>: Send, Sync, Clone);
static_assertions::assert_impl_all!(ExitFuture<String, u32>: Send, Unpin);
