//! Suspending on callbacks from the outside world.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{Data, Effect, Instruction, URIO};
use crate::exit::Exit;
use crate::fiber::{FiberId, Resume};

/// Resumes a fiber suspended by [`Effect::async_register`].
///
/// Only the first call on behalf of one suspension has an effect; the rest
/// return `false`. Resuming runs the rest of the fiber through its scheduler,
/// never on the calling thread's stack.
pub struct Callback<R, E, A> {
    resume: Resume,
    marker: PhantomData<fn(R) -> (E, A)>,
}

impl<R: Data, E: Data, A: Data> Callback<R, E, A> {
    const fn new(resume: Resume) -> Self {
        Self {
            resume,
            marker: PhantomData,
        }
    }

    /// Resumes the fiber with `effect`.
    pub fn complete(&self, effect: Effect<R, E, A>) -> bool {
        self.resume.resume(effect.into_instruction())
    }

    /// Resumes the fiber with a value.
    pub fn succeed(&self, value: A) -> bool {
        self.complete(Effect::succeed(value))
    }

    /// Resumes the fiber with a typed failure.
    pub fn fail(&self, error: E) -> bool {
        self.complete(Effect::fail(error))
    }

    /// Resumes the fiber with an exit.
    pub fn done(&self, exit: Exit<E, A>) -> bool {
        self.complete(Effect::from_exit(exit))
    }

    /// The suspended fiber's id.
    #[must_use]
    pub fn fiber_id(&self) -> FiberId {
        self.resume.fiber_id()
    }
}

impl<R, E, A> Clone for Callback<R, E, A> {
    fn clone(&self) -> Self {
        Self {
            resume: self.resume.clone(),
            marker: PhantomData,
        }
    }
}

impl<R, E, A> fmt::Debug for Callback<R, E, A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Callback")
            .field("resume", &self.resume)
            .finish()
    }
}

/// What a registration function tells the fiber.
pub enum Registration<R, E, A> {
    /// Wait for the callback.
    Pending,
    /// Do not wait: continue with this effect right away.
    Ready(Effect<R, E, A>),
    /// Wait for the callback; run this effect if the wait is interrupted.
    Cancelable(URIO<R, ()>),
}

impl<R, E, A> fmt::Debug for Registration<R, E, A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => formatter.write_str("Pending"),
            Self::Ready(effect) => formatter.debug_tuple("Ready").field(effect).finish(),
            Self::Cancelable(_) => formatter.write_str("Cancelable"),
        }
    }
}

impl<R: Data, E: Data, A: Data> Effect<R, E, A> {
    /// Suspends the fiber until `register`'s callback is called.
    ///
    /// `register` runs once per execution of the effect. It may complete
    /// synchronously with [`Registration::Ready`], or hand back a canceler
    /// that runs if the fiber is interrupted while waiting.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use strand::effect::{IO, Registration};
    /// use strand::runtime::Runtime;
    ///
    /// let program = IO::<String, u32>::async_register(|callback| {
    ///     std::thread::spawn(move || callback.succeed(42));
    ///     Registration::Pending
    /// });
    /// let exit = Runtime::default().run_blocking(program);
    /// assert_eq!(exit.into_result().unwrap(), 42);
    /// ```
    pub fn async_register(
        register: impl Fn(Callback<R, E, A>) -> Registration<R, E, A> + Send + Sync + 'static,
    ) -> Self {
        let register = Arc::new(register);
        Self::suspend(move || {
            let canceler: Arc<Mutex<Option<URIO<R, ()>>>> = Arc::default();
            let stored = canceler.clone();
            let register = register.clone();
            let suspended = Self::from_instruction(Instruction::Async {
                register: Arc::new(move |resume| match register(Callback::new(resume)) {
                    Registration::Pending => None,
                    Registration::Ready(effect) => Some(effect.into_instruction()),
                    Registration::Cancelable(cancel) => {
                        *stored.lock() = Some(cancel);
                        None
                    }
                }),
                blocking_on: Vec::new(),
            });
            suspended.on_interrupt(URIO::suspend(move || {
                canceler.lock().take().unwrap_or_else(URIO::unit)
            }))
        })
    }

    /// Suspends the fiber until `register`'s callback is called, with no
    /// canceler.
    pub fn effect_async(register: impl Fn(Callback<R, E, A>) + Send + Sync + 'static) -> Self {
        Self::from_instruction(Instruction::Async {
            register: Arc::new(move |resume| {
                register(Callback::new(resume));
                None
            }),
            blocking_on: Vec::new(),
        })
    }

    /// Suspends forever, until interrupted.
    pub fn never() -> Self {
        Self::from_instruction(Instruction::Async {
            register: Arc::new(|_| None),
            blocking_on: Vec::new(),
        })
    }
}

impl<R: Data, E: Data> Effect<R, E, ()> {
    /// Lets other fibers run before continuing.
    pub fn yield_now() -> Self {
        Self::from_instruction(Instruction::Yield)
    }

    /// Suspends for `duration` using the platform's timers.
    ///
    /// The timer is cancelled if the fiber is interrupted while sleeping.
    pub fn sleep(duration: Duration) -> Self {
        Self::suspend_with(move |platform, _| {
            let scheduler = platform.scheduler().clone();
            Self::async_register(move |callback: Callback<R, E, ()>| {
                let timer = scheduler.dispatch_after(
                    duration,
                    Box::new(move || {
                        callback.succeed(());
                    }),
                );
                Registration::Cancelable(URIO::sync(move || timer.cancel()))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{IO, UIO};
    use crate::runtime::{Platform, Runtime};
    use crate::scheduler::ManualScheduler;
    use rstest::{fixture, rstest};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Harness {
        scheduler: Arc<ManualScheduler>,
        runtime: Runtime,
    }

    #[fixture]
    fn harness() -> Harness {
        let scheduler = Arc::new(ManualScheduler::new());
        let runtime = Runtime::new(
            Platform::builder()
                .scheduler(scheduler.clone())
                .report_unhandled(false)
                .build(),
        );
        Harness { scheduler, runtime }
    }

    #[rstest]
    fn ready_registration_completes_synchronously(harness: Harness) {
        let fiber = harness
            .runtime
            .fork(IO::<String, i32>::async_register(|_| Registration::Ready(IO::succeed(3))));
        harness.scheduler.run_until_idle();
        assert_eq!(fiber.poll_now(), Some(Exit::succeed(3)));
    }

    #[rstest]
    fn callbacks_resume_only_once(harness: Harness) {
        let slot: Arc<Mutex<Option<Callback<(), String, i32>>>> = Arc::default();
        let shared = slot.clone();
        let fiber = harness.runtime.fork(IO::effect_async(move |callback| {
            *shared.lock() = Some(callback);
        }));
        harness.scheduler.run_until_idle();
        assert!(fiber.poll_now().is_none());

        let callback = slot.lock().take().expect("registered");
        assert!(callback.succeed(1));
        assert!(!callback.succeed(2));
        harness.scheduler.run_until_idle();
        assert_eq!(fiber.poll_now(), Some(Exit::succeed(1)));
    }

    #[rstest]
    fn sleep_waits_for_the_clock(harness: Harness) {
        let fiber = harness
            .runtime
            .fork(UIO::sleep(Duration::from_millis(10)).as_value("woke"));
        harness.scheduler.run_until_idle();
        harness.scheduler.advance(Duration::from_millis(9));
        assert!(fiber.poll_now().is_none());
        harness.scheduler.advance(Duration::from_millis(1));
        assert_eq!(fiber.poll_now(), Some(Exit::succeed("woke")));
    }

    #[rstest]
    fn interrupted_sleep_runs_the_canceler(harness: Harness) {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let fiber = harness.runtime.fork(UIO::<()>::async_register(move |_| {
            let flag = flag.clone();
            Registration::Cancelable(UIO::sync(move || flag.store(true, Ordering::SeqCst)))
        }));
        harness.scheduler.run_until_idle();

        fiber.raw().interrupt_now(crate::fiber::FiberId::none());
        harness.scheduler.run_until_idle();

        assert!(cancelled.load(Ordering::SeqCst));
        assert!(fiber.poll_now().is_some_and(|exit| exit.is_interrupted()));
    }

    #[rstest]
    fn never_stays_suspended(harness: Harness) {
        let fiber = harness.runtime.fork(UIO::<()>::never());
        harness.scheduler.run_until_idle();
        assert!(fiber.status_now().is_suspended());
    }

    #[rstest]
    fn yield_lets_other_fibers_run(harness: Harness) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (first, second, third) = (log.clone(), log.clone(), log.clone());
        harness.runtime.fork(
            UIO::sync(move || first.lock().push("a1"))
                .zip_right(UIO::yield_now())
                .zip_right(UIO::sync(move || second.lock().push("a2"))),
        );
        harness
            .runtime
            .fork(UIO::sync(move || third.lock().push("b")));
        harness.scheduler.run_until_idle();
        assert_eq!(*log.lock(), vec!["a1", "b", "a2"]);
    }
}
