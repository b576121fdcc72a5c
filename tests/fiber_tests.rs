//! Tests for forking, joining and observing fibers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rstest::{fixture, rstest};
use strand::cause::Cause;
use strand::effect::{Data, IO, UIO};
use strand::exit::Exit;
use strand::fiber::{Fiber, FiberId};
use strand::runtime::{Platform, Runtime};
use strand::scheduler::ManualScheduler;

// =============================================================================
// Harness
// =============================================================================

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

// =============================================================================
// Fork and Join
// =============================================================================

#[rstest]
fn join_produces_the_child_value(harness: Harness) {
    let program = IO::<String, i32>::succeed(20)
        .map(|n| n + 1)
        .fork()
        .widen()
        .flat_map(|fiber| fiber.join())
        .map(|n| n * 2);
    assert_eq!(harness.run(program), Some(Exit::succeed(42)));
}

#[rstest]
fn join_fails_like_the_child(harness: Harness) {
    let program = IO::<String, i32>::fail("boom".to_owned())
        .fork()
        .widen()
        .flat_map(|fiber| fiber.join());
    assert_eq!(harness.run(program), Some(Exit::fail("boom".to_owned())));
}

#[rstest]
fn await_exit_never_fails(harness: Harness) {
    let program = IO::<&str, i32>::die_message("broken")
        .fork()
        .flat_map(|fiber| fiber.await_exit())
        .map(|exit| exit.cause().is_some_and(Cause::died));
    assert_eq!(harness.run(program.widen::<()>()), Some(Exit::succeed(true)));
}

#[rstest]
fn many_children_join_in_order(harness: Harness) {
    let program = UIO::foreach(0..100_u32, |n| UIO::succeed(n).fork())
        .flat_map(|fibers: Vec<Fiber<_, u32>>| {
            UIO::foreach(fibers, |fiber: Fiber<_, u32>| fiber.join())
        })
        .map(|values| values.into_iter().sum::<u32>());
    assert_eq!(harness.run(program), Some(Exit::succeed(4950)));
}

#[rstest]
fn fiber_ids_are_distinct_and_ordered(harness: Harness) {
    let first = harness.runtime.fork(UIO::<()>::unit());
    let second = harness.runtime.fork(UIO::<()>::unit());
    harness.scheduler.run_until_idle();
    assert_ne!(first.id(), second.id());
    assert!(first.id().sequence_number() < second.id().sequence_number());
    assert!(!first.id().is_none());
}

#[rstest]
fn fiber_id_is_visible_from_inside(harness: Harness) {
    let fiber = harness.runtime.fork(UIO::<FiberId>::fiber_id());
    harness.scheduler.run_until_idle();
    assert_eq!(fiber.poll_now(), Some(Exit::succeed(fiber.id())));
}

// =============================================================================
// Status and Polling
// =============================================================================

#[rstest]
fn status_follows_the_lifecycle(harness: Harness) {
    let fiber = harness
        .runtime
        .fork(UIO::sleep(Duration::from_millis(5)).as_value(1));
    assert!(fiber.poll_now().is_none());

    harness.scheduler.run_until_idle();
    assert!(fiber.status_now().is_suspended());

    harness.scheduler.advance(Duration::from_millis(5));
    assert!(fiber.status_now().is_done());
    assert_eq!(fiber.poll_now(), Some(Exit::succeed(1)));
}

#[rstest]
fn poll_reports_a_running_child_as_pending(harness: Harness) {
    let program = UIO::<()>::never()
        .fork()
        .flat_map(|fiber| fiber.poll())
        .map(|exit| exit.is_none());
    assert_eq!(harness.run(program), Some(Exit::succeed(true)));
}

#[rstest]
fn observers_see_the_exit_once(harness: Harness) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    harness.runtime.run_async(IO::<&str, i32>::succeed(3), move |exit| {
        assert_eq!(exit, Exit::succeed(3));
        counter.fetch_add(1, Ordering::SeqCst);
    });
    harness.scheduler.run_until_idle();
    harness.scheduler.run_until_idle();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Preemption
// =============================================================================

#[test]
fn long_running_fibers_yield_to_others() {
    let scheduler = Arc::new(ManualScheduler::new());
    let runtime = Runtime::new(
        Platform::builder()
            .scheduler(scheduler.clone())
            .max_operations(4)
            .build(),
    );
    let log = Arc::new(Mutex::new(Vec::new()));

    let busy_log = log.clone();
    let busy = UIO::foreach(0..50_u32, move |n| {
        let busy_log = busy_log.clone();
        UIO::sync(move || busy_log.lock().push(format!("a{n}")))
    });
    let quick_log = log.clone();
    let quick = UIO::sync(move || quick_log.lock().push("b".to_owned()));

    runtime.fork(busy);
    runtime.fork(quick);
    scheduler.run_until_idle();

    let log = log.lock();
    assert_eq!(log.len(), 51);
    let quick_at = log.iter().position(|entry| entry == "b");
    assert!(quick_at.is_some_and(|index| index < 50));
}

// =============================================================================
// Parent and Child Lifetimes
// =============================================================================

#[rstest]
fn children_end_with_their_parent(harness: Harness) {
    let child: Arc<Mutex<Option<Fiber<(), ()>>>> = Arc::default();
    let slot = child.clone();
    let parent = harness.runtime.fork(
        UIO::<()>::never()
            .widen::<()>()
            .fork()
            .map(move |fiber| {
                *slot.lock() = Some(fiber);
            }),
    );
    harness.scheduler.run_until_idle();

    assert_eq!(parent.poll_now(), Some(Exit::succeed(())));
    let child = child.lock().take().expect("child was forked");
    assert!(child.poll_now().is_some_and(|exit| exit.is_interrupted()));
}

#[rstest]
fn daemons_keep_running(harness: Harness) {
    let child: Arc<Mutex<Option<Fiber<(), u32>>>> = Arc::default();
    let slot = child.clone();
    let parent = harness.runtime.fork(
        UIO::sleep(Duration::from_millis(10))
            .as_value(7_u32)
            .widen::<()>()
            .fork_daemon()
            .map(move |fiber| {
                *slot.lock() = Some(fiber);
            }),
    );
    harness.scheduler.run_until_idle();
    assert!(parent.poll_now().is_some());

    let child = child.lock().take().expect("daemon was forked");
    assert!(child.poll_now().is_none());
    harness.scheduler.advance(Duration::from_millis(10));
    assert_eq!(child.poll_now(), Some(Exit::succeed(7)));
}
