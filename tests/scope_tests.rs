//! Tests for scopes and the fork scope of effects.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rstest::{fixture, rstest};
use strand::effect::{Data, Erased, IO, UIO};
use strand::exit::Exit;
use strand::fiber::Fiber;
use strand::runtime::{Platform, Runtime};
use strand::scheduler::ManualScheduler;
use strand::scope::{ExecutionStrategy, Scope};

struct Harness {
    scheduler: Arc<ManualScheduler>,
    runtime: Runtime,
}

impl Harness {
    fn run<E: Data, A: Data>(&self, effect: IO<E, A>) -> Option<Exit<E, A>> {
        let fiber = self.runtime.fork(effect);
        self.scheduler.run_until_idle();
        fiber.poll_now()
    }
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

type Log = Arc<Mutex<Vec<String>>>;

fn recording(log: &Log, name: &'static str) -> impl FnOnce(&Exit<Erased, Erased>) -> UIO<()> + Send + 'static {
    let log = log.clone();
    move |exit: &Exit<Erased, Erased>| {
        let entry = format!("{name}:{}", if exit.is_success() { "ok" } else { "failed" });
        UIO::sync(move || log.lock().push(entry.clone()))
    }
}

fn closed_ok() -> Exit<Erased, Erased> {
    Exit::succeed(Erased::unit())
}

// =============================================================================
// Finalizers
// =============================================================================

#[rstest]
fn sequential_finalizers_run_last_added_first(harness: Harness) {
    let log = Log::default();
    let scope = Scope::make();
    for name in ["first", "second", "third"] {
        scope.add_finalizer(recording(&log, name)).expect("open");
    }

    assert_eq!(harness.run(scope.close(closed_ok())), Some(Exit::succeed(true)));
    assert_eq!(*log.lock(), vec!["third:ok", "second:ok", "first:ok"]);
}

#[rstest]
fn finalizers_see_the_closing_exit(harness: Harness) {
    let log = Log::default();
    let scope = Scope::make();
    scope.add_finalizer(recording(&log, "only")).expect("open");

    harness.run(scope.close(Exit::fail(Erased::new("shutdown"))));
    assert_eq!(*log.lock(), vec!["only:failed"]);
}

#[rstest]
fn closing_twice_runs_finalizers_once(harness: Harness) {
    let log = Log::default();
    let scope = Scope::make();
    scope.add_finalizer(recording(&log, "once")).expect("open");

    let twice = scope.close(closed_ok()).zip(scope.close(closed_ok()));
    assert_eq!(harness.run(twice), Some(Exit::succeed((true, false))));
    assert_eq!(log.lock().len(), 1);
}

#[rstest]
fn closed_scopes_refuse_finalizers(harness: Harness) {
    let scope = Scope::make();
    harness.run(scope.close(closed_ok()));

    assert!(scope.is_closed());
    let refused = scope.add_finalizer(|_| UIO::unit());
    assert!(refused.is_err_and(|exit| exit.is_success()));
}

#[rstest]
fn denied_finalizers_do_not_run(harness: Harness) {
    let log = Log::default();
    let scope = Scope::make();
    let key = scope.add_finalizer(recording(&log, "denied")).expect("open");
    scope.add_finalizer(recording(&log, "kept")).expect("open");

    assert!(scope.deny(key));
    assert!(!scope.deny(key));
    harness.run(scope.close(closed_ok()));
    assert_eq!(*log.lock(), vec!["kept:ok"]);
}

#[rstest]
fn failing_finalizers_do_not_stop_the_rest(harness: Harness) {
    let log = Log::default();
    let scope = Scope::make();
    scope.add_finalizer(recording(&log, "survivor")).expect("open");
    scope
        .add_finalizer(|_| UIO::die_message("finalizer broke"))
        .expect("open");

    assert_eq!(harness.run(scope.close(closed_ok())), Some(Exit::succeed(true)));
    assert_eq!(*log.lock(), vec!["survivor:ok"]);
}

#[rstest]
fn parallel_finalizers_all_run(harness: Harness) {
    let log = Log::default();
    let scope = Scope::make_with(ExecutionStrategy::Parallel);
    for name in ["a", "b", "c"] {
        scope.add_finalizer(recording(&log, name)).expect("open");
    }

    assert_eq!(harness.run(scope.close(closed_ok())), Some(Exit::succeed(true)));
    let mut entries = log.lock().clone();
    entries.sort();
    assert_eq!(entries, vec!["a:ok", "b:ok", "c:ok"]);
}

// =============================================================================
// Nesting
// =============================================================================

#[rstest]
fn child_scopes_close_with_their_parent(harness: Harness) {
    let log = Log::default();
    let parent = Scope::make();
    let child = parent.fork(ExecutionStrategy::Sequential);
    child.add_finalizer(recording(&log, "child")).expect("open");

    harness.run(parent.close(closed_ok()));
    assert!(child.is_closed());
    assert_eq!(*log.lock(), vec!["child:ok"]);
}

#[rstest]
fn closing_a_child_first_detaches_it(harness: Harness) {
    let log = Log::default();
    let parent = Scope::make();
    let child = parent.fork(ExecutionStrategy::Sequential);
    child.add_finalizer(recording(&log, "child")).expect("open");

    harness.run(child.close(closed_ok()));
    harness.run(parent.close(closed_ok()));
    assert_eq!(*log.lock(), vec!["child:ok"]);
}

#[rstest]
fn forking_from_a_closed_scope_yields_a_closed_child(harness: Harness) {
    let parent = Scope::make();
    harness.run(parent.close(closed_ok()));
    assert!(parent.fork(ExecutionStrategy::Sequential).is_closed());
}

#[rstest]
fn the_global_scope_never_closes(harness: Harness) {
    let global = Scope::global();
    assert!(global.is_global());
    assert_eq!(harness.run(global.close(closed_ok())), Some(Exit::succeed(false)));
    assert!(!global.is_closed());
}

// =============================================================================
// Fork Scopes
// =============================================================================

#[rstest]
fn fork_in_ties_the_child_to_the_given_scope(harness: Harness) {
    let scope = Scope::make();
    let child: Arc<Mutex<Option<Fiber<(), ()>>>> = Arc::default();
    let slot = child.clone();
    harness.run(UIO::<()>::never().widen::<()>().fork_in(scope.clone()).map(move |fiber| {
        *slot.lock() = Some(fiber);
    }));

    let child = child.lock().take().expect("forked");
    assert!(child.poll_now().is_none());

    harness.run(scope.close(closed_ok()));
    assert!(child.poll_now().is_some_and(|exit| exit.is_interrupted()));
}

#[rstest]
fn override_fork_scope_redirects_children(harness: Harness) {
    let scope = Scope::make();
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    let child = UIO::sleep(Duration::from_secs(1)).on_interrupt(UIO::sync(move || {
        flag.store(true, Ordering::SeqCst);
    }));

    let parent = harness.run(child.fork().unit_value().override_fork_scope(scope.clone()));
    assert_eq!(parent, Some(Exit::succeed(())));
    assert!(!interrupted.load(Ordering::SeqCst));

    harness.run(scope.close(closed_ok()));
    assert!(interrupted.load(Ordering::SeqCst));
}

#[rstest]
fn fork_scope_reports_the_override(harness: Harness) {
    let scope = Scope::make();
    let expected = scope.clone();
    let exit = harness.run(UIO::<Scope>::fork_scope().override_fork_scope(scope));
    assert_eq!(exit, Some(Exit::succeed(expected)));
}

#[rstest]
fn reset_fork_scope_restores_the_fiber_scope(harness: Harness) {
    let overriding = Scope::make();
    let compared = overriding.clone();
    let reset_differs = UIO::<Scope>::fork_scope()
        .reset_fork_scope()
        .map(move |current| current != compared && !current.is_global());
    let exit = harness.run(reset_differs.override_fork_scope(overriding));
    assert_eq!(exit, Some(Exit::succeed(true)));
}
