//! Failure handling and resource safety.

use std::convert::Infallible;
use std::sync::Arc;

use super::{Data, Effect, Instruction, URIO, continuation, failure_handler};
use crate::cause::Cause;
use crate::exit::Exit;

impl<R: Data, E: Data, A: Data> Effect<R, E, A> {
    /// Continues with `on_failure` given the full cause, or with
    /// `on_success` given the value.
    ///
    /// This is the most general handler; every other combinator in this
    /// module is built on it.
    pub fn fold_cause_m<E2: Data, B: Data>(
        self,
        on_failure: impl Fn(Cause<E>) -> Effect<R, E2, B> + Send + Sync + 'static,
        on_success: impl Fn(A) -> Effect<R, E2, B> + Send + Sync + 'static,
    ) -> Effect<R, E2, B> {
        Effect::from_instruction(Instruction::Fold {
            effect: Arc::new(self.into_instruction()),
            on_failure: failure_handler(move |cause| on_failure(cause).into_instruction()),
            on_success: continuation(move |value| on_success(value).into_instruction()),
        })
    }

    /// Like [`fold_cause_m`](Self::fold_cause_m), but only typed failures
    /// reach `on_failure`; defects and interruptions keep propagating.
    pub fn fold_m<E2: Data, B: Data>(
        self,
        on_failure: impl Fn(E) -> Effect<R, E2, B> + Send + Sync + 'static,
        on_success: impl Fn(A) -> Effect<R, E2, B> + Send + Sync + 'static,
    ) -> Effect<R, E2, B> {
        self.fold_cause_m(
            move |cause| match cause.failure_or_cause() {
                Ok(error) => on_failure(error),
                Err(cause) => Effect::halt(cause.widen()),
            },
            on_success,
        )
    }

    /// Maps both outcomes to a value.
    pub fn fold<B: Data>(
        self,
        on_failure: impl Fn(E) -> B + Send + Sync + 'static,
        on_success: impl Fn(A) -> B + Send + Sync + 'static,
    ) -> URIO<R, B> {
        self.fold_m(
            move |error| URIO::succeed(on_failure(error)),
            move |value| URIO::succeed(on_success(value)),
        )
    }

    /// Transforms typed failures.
    pub fn map_error<E2: Data>(self, f: impl Fn(E) -> E2 + Send + Sync + 'static) -> Effect<R, E2, A> {
        self.fold_cause_m(
            move |cause| Effect::halt(cause.map(|error| f(error.clone()))),
            Effect::succeed,
        )
    }

    /// Recovers from typed failures.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use strand::effect::IO;
    /// use strand::runtime::Runtime;
    ///
    /// let program = IO::<&str, i32>::fail("boom").catch_all(|error| IO::<(), i32>::succeed(error.len() as i32));
    /// let exit = Runtime::default().run_blocking(program);
    /// assert_eq!(exit.into_result().unwrap(), 4);
    /// ```
    pub fn catch_all<E2: Data>(
        self,
        f: impl Fn(E) -> Effect<R, E2, A> + Send + Sync + 'static,
    ) -> Effect<R, E2, A> {
        self.fold_m(f, Effect::succeed)
    }

    /// Recovers from any failure, including defects and interruptions.
    pub fn catch_all_cause<E2: Data>(
        self,
        f: impl Fn(Cause<E>) -> Effect<R, E2, A> + Send + Sync + 'static,
    ) -> Effect<R, E2, A> {
        self.fold_cause_m(f, Effect::succeed)
    }

    /// Runs `that` if `self` fails with a typed failure.
    pub fn or_else<E2: Data>(self, that: Effect<R, E2, A>) -> Effect<R, E2, A> {
        self.catch_all(move |_| that.clone())
    }

    /// Exposes typed failures as an `Err` value.
    pub fn either(self) -> URIO<R, Result<A, E>> {
        self.fold(Err, Ok)
    }

    /// Exposes the exit as a value.
    pub fn exit(self) -> URIO<R, Exit<E, A>> {
        self.fold_cause_m(
            |cause| URIO::succeed(Exit::Failure(cause)),
            |value| URIO::succeed(Exit::Success(value)),
        )
    }

    /// Exposes the full cause as the typed failure.
    pub fn sandbox(self) -> Effect<R, Cause<E>, A> {
        self.fold_cause_m(Effect::fail, Effect::succeed)
    }

    /// Runs `finalizer` after the effect, whatever its outcome.
    ///
    /// The finalizer cannot be interrupted. If it fails, its cause is
    /// appended to the effect's.
    pub fn ensuring(self, finalizer: URIO<R, ()>) -> Self {
        self.on_exit(move |_| finalizer.clone())
    }

    /// Runs `cleanup` with the effect's exit, whatever it is.
    pub fn on_exit(
        self,
        cleanup: impl Fn(&Exit<E, A>) -> URIO<R, ()> + Send + Sync + 'static,
    ) -> Self {
        Self::bracket_exit(
            Effect::<R, E, ()>::unit(),
            move |()| self.clone(),
            move |_, exit| cleanup(exit),
        )
    }

    /// Runs `cleanup` if the effect is interrupted.
    pub fn on_interrupt(self, cleanup: URIO<R, ()>) -> Self {
        self.on_exit(move |exit| {
            if exit.is_interrupted() {
                cleanup.clone()
            } else {
                URIO::unit()
            }
        })
    }

    /// Acquires a resource, uses it, and releases it whatever happens.
    ///
    /// Acquisition and release are uninterruptible; only the use is exposed
    /// to interruption, with the interrupt status that was in effect outside.
    /// Release sees the exit of the use. If release fails, its cause is
    /// appended to the use's, so a successful use then fails.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use std::sync::atomic::{AtomicBool, Ordering};
    /// use strand::effect::{IO, UIO};
    /// use strand::runtime::Runtime;
    ///
    /// let released = Arc::new(AtomicBool::new(false));
    /// let flag = released.clone();
    /// let program = IO::bracket_exit(
    ///     IO::<&str, i32>::succeed(1),
    ///     |_| IO::<&str, i32>::fail("use failed"),
    ///     move |_, _| {
    ///         let flag = flag.clone();
    ///         UIO::sync(move || flag.store(true, Ordering::SeqCst))
    ///     },
    /// );
    /// let exit = Runtime::default().run_blocking(program);
    /// assert!(exit.is_failure());
    /// assert!(released.load(Ordering::SeqCst));
    /// ```
    pub fn bracket_exit<X: Data>(
        acquire: Effect<R, E, X>,
        use_resource: impl Fn(X) -> Self + Send + Sync + 'static,
        release: impl Fn(&X, &Exit<E, A>) -> URIO<R, ()> + Send + Sync + 'static,
    ) -> Self {
        let use_resource = Arc::new(use_resource);
        let release = Arc::new(release);
        Self::uninterruptible_mask(move |restore| {
            let use_resource = use_resource.clone();
            let release = release.clone();
            acquire.clone().flat_map(move |resource: X| {
                let release = release.clone();
                restore
                    .apply(use_resource(resource.clone()))
                    .exit()
                    .widen::<E>()
                    .flat_map(move |exit: Exit<E, A>| {
                        release(&resource, &exit)
                            .exit()
                            .widen::<E>()
                            .flat_map(move |released: Exit<Infallible, ()>| {
                                Self::from_exit(combine_release(exit.clone(), released))
                            })
                    })
            })
        })
    }

    /// Like [`bracket_exit`](Self::bracket_exit), with a release that does
    /// not need the exit.
    pub fn bracket<X: Data>(
        acquire: Effect<R, E, X>,
        use_resource: impl Fn(X) -> Self + Send + Sync + 'static,
        release: impl Fn(&X) -> URIO<R, ()> + Send + Sync + 'static,
    ) -> Self {
        Self::bracket_exit(acquire, use_resource, move |resource, _| release(resource))
    }
}

impl<R: Data, E: Data, A: Data> Effect<R, Cause<E>, A> {
    /// Undoes [`sandbox`](Effect::sandbox): the cause carried as a typed
    /// failure becomes the failure again.
    pub fn unsandbox(self) -> Effect<R, E, A> {
        self.fold_cause_m(
            |cause| {
                let rebuilt = cause.fold(
                    Cause::empty,
                    Clone::clone,
                    |defect| Cause::die(defect.clone()),
                    Cause::interrupt,
                    Cause::then,
                    Cause::both,
                );
                Effect::halt(rebuilt)
            },
            Effect::succeed,
        )
    }
}

fn combine_release<E, A>(exit: Exit<E, A>, released: Exit<Infallible, ()>) -> Exit<E, A> {
    match (exit, released) {
        (exit, Exit::Success(())) => exit,
        (Exit::Success(_), Exit::Failure(cause)) => Exit::Failure(cause.widen()),
        (Exit::Failure(cause), Exit::Failure(more)) => Exit::Failure(cause.then(more.widen())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cause::Defect;
    use crate::effect::{IO, UIO};
    use crate::fiber::FiberId;
    use crate::runtime::{Platform, Runtime};
    use crate::scheduler::ManualScheduler;
    use parking_lot::Mutex;
    use rstest::rstest;

    fn run<E: Data, A: Data>(effect: IO<E, A>) -> Exit<E, A> {
        let scheduler = Arc::new(ManualScheduler::new());
        let runtime = Runtime::new(
            Platform::builder()
                .scheduler(scheduler.clone())
                .report_unhandled(false)
                .build(),
        );
        let fiber = runtime.fork(effect);
        scheduler.run_until_idle();
        fiber.poll_now().expect("fiber should be done")
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> UIO<()> + Clone) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let shared = log.clone();
        let record = move |entry: &str| {
            let shared = shared.clone();
            let entry = entry.to_string();
            UIO::sync(move || shared.lock().push(entry.clone()))
        };
        (log, record)
    }

    #[rstest]
    fn catch_all_recovers_typed_failures() {
        let effect = IO::<&str, i32>::fail("e").catch_all(|_| IO::<(), i32>::succeed(7));
        assert_eq!(run(effect), Exit::succeed(7));
    }

    #[rstest]
    fn catch_all_lets_defects_through() {
        let effect = IO::<&str, i32>::die_message("bug").catch_all(|_| IO::<(), i32>::succeed(7));
        let exit = run(effect);
        assert!(exit.cause().is_some_and(Cause::died));
    }

    #[rstest]
    fn catch_all_cause_sees_defects() {
        let effect = IO::<&str, i32>::die(Defect::message("bug"))
            .catch_all_cause(|cause| IO::<(), i32>::succeed(i32::from(cause.died())));
        assert_eq!(run(effect), Exit::succeed(1));
    }

    #[rstest]
    #[case::success(IO::succeed(2), Ok(2))]
    #[case::failure(IO::fail("e"), Err("e"))]
    fn either_exposes_the_outcome(#[case] effect: IO<&'static str, i32>, #[case] expected: Result<i32, &'static str>) {
        assert_eq!(run(effect.either().widen::<()>()), Exit::succeed(expected));
    }

    #[rstest]
    fn map_error_keeps_structure() {
        let effect = IO::<i32, ()>::fail(2).map_error(|n| n * 10);
        assert_eq!(run(effect), Exit::fail(20));
    }

    #[rstest]
    fn sandbox_round_trips() {
        let id = FiberId::new(0, 9);
        let effect = IO::<&str, ()>::halt(Cause::fail("e").then(Cause::interrupt(id)))
            .sandbox()
            .unsandbox();
        let exit = run(effect);
        let cause = exit.cause().expect("failure").clone();
        assert_eq!(cause, Cause::fail("e").then(Cause::interrupt(id)));
    }

    #[rstest]
    fn ensuring_runs_after_success_and_failure() {
        let (log, record) = recorder();
        let ok = IO::<&str, i32>::succeed(1).ensuring(record("ok"));
        let failed = IO::<&str, i32>::fail("e").ensuring(record("failed"));
        assert_eq!(run(ok), Exit::succeed(1));
        assert_eq!(run(failed), Exit::fail("e"));
        assert_eq!(*log.lock(), vec!["ok", "failed"]);
    }

    #[rstest]
    fn bracket_releases_in_order() {
        let (log, record) = recorder();
        let (acquire, use_it, release) = (record.clone(), record.clone(), record);
        let effect = IO::<&str, i32>::bracket_exit(
            acquire("acquire").widen().as_value(5),
            move |n| use_it("use").widen().as_value(n * 2),
            move |_, exit| release(if exit.is_success() { "release ok" } else { "release failed" }),
        );
        assert_eq!(run(effect), Exit::succeed(10));
        assert_eq!(*log.lock(), vec!["acquire", "use", "release ok"]);
    }

    #[rstest]
    fn failed_release_turns_success_into_failure() {
        let effect = IO::<&str, i32>::bracket_exit(
            IO::succeed(()),
            |()| IO::succeed(1),
            |_, _| UIO::die_message("release failed"),
        );
        let exit = run(effect);
        assert!(exit.cause().is_some_and(|cause| cause.died() && !cause.failed()));
    }

    #[rstest]
    fn failed_release_is_sequenced_after_use_failure() {
        let effect = IO::<&str, i32>::bracket_exit(
            IO::succeed(()),
            |()| IO::fail("use"),
            |_, _| UIO::die_message("release"),
        );
        let exit = run(effect);
        let cause = exit.cause().expect("failure");
        assert_eq!(cause.failures(), vec!["use"]);
        assert_eq!(cause.defects().len(), 1);
    }
}
