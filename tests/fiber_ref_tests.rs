//! Tests for fiber-local references.

use std::sync::Arc;

use rstest::{fixture, rstest};
use strand::effect::{Data, IO};
use strand::exit::Exit;
use strand::fiber::FiberRef;
use strand::runtime::{Platform, Runtime};
use strand::scheduler::ManualScheduler;

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
// Reading and Writing
// =============================================================================

#[rstest]
fn unset_references_read_their_initial_value(harness: Harness) {
    let fiber_ref = FiberRef::new(10_u32);
    assert_eq!(harness.run(fiber_ref.get()), Some(Exit::succeed(10)));
}

#[rstest]
fn set_and_update_are_visible_to_later_reads(harness: Harness) {
    let fiber_ref = FiberRef::new(1_u32);
    let program = fiber_ref
        .set(5)
        .zip_right(fiber_ref.update(|n| n * 3))
        .zip_right(fiber_ref.get());
    assert_eq!(harness.run(program), Some(Exit::succeed(15)));
}

#[rstest]
fn modify_returns_a_result_and_stores_the_rest(harness: Harness) {
    let fiber_ref = FiberRef::new(vec![1_u32, 2, 3]);
    let program = fiber_ref
        .modify(|mut values| {
            let popped = values.pop();
            (popped, values)
        })
        .zip(fiber_ref.get());
    assert_eq!(
        harness.run(program),
        Some(Exit::succeed((Some(3), vec![1, 2])))
    );
}

#[rstest]
fn values_are_local_to_each_root_fiber(harness: Harness) {
    let fiber_ref = FiberRef::new(0_u32);
    let writer = harness.runtime.fork(fiber_ref.set(9).zip_right(fiber_ref.get()));
    let reader = harness.runtime.fork(fiber_ref.get());
    harness.scheduler.run_until_idle();
    assert_eq!(writer.poll_now(), Some(Exit::succeed(9)));
    assert_eq!(reader.poll_now(), Some(Exit::succeed(0)));
}

// =============================================================================
// locally
// =============================================================================

#[rstest]
fn locally_restores_the_previous_value(harness: Harness) {
    let fiber_ref = FiberRef::new(7_u32);
    let program = fiber_ref
        .locally(9, fiber_ref.get())
        .zip(fiber_ref.get());
    assert_eq!(harness.run(program), Some(Exit::succeed((9, 7))));
}

#[rstest]
fn locally_restores_after_a_failure(harness: Harness) {
    let fiber_ref = FiberRef::new(7_u32);
    let program = fiber_ref
        .locally(9, IO::<&str, u32>::fail("inner"))
        .either()
        .zip(fiber_ref.get());
    assert_eq!(harness.run(program), Some(Exit::succeed((Err("inner"), 7))));
}

// =============================================================================
// Fork and Join
// =============================================================================

#[rstest]
fn children_start_from_the_parent_value(harness: Harness) {
    let fiber_ref = FiberRef::new(0_u32);
    let program = fiber_ref
        .set(4)
        .zip_right(fiber_ref.get().fork())
        .flat_map(|child| child.join());
    assert_eq!(harness.run(program), Some(Exit::succeed(4)));
}

#[rstest]
fn child_writes_stay_in_the_child_until_join(harness: Harness) {
    let fiber_ref = FiberRef::new(0_u32);
    let inherited = fiber_ref.clone();
    let program = fiber_ref.set(5).fork().flat_map(move |child| {
        let inherited = inherited.clone();
        child
            .await_exit()
            .zip_right(inherited.get())
            .zip(child.join().zip_right(inherited.get()))
    });
    assert_eq!(harness.run(program), Some(Exit::succeed((0, 5))));
}

#[rstest]
fn fork_and_join_hooks_shape_the_values(harness: Harness) {
    let counter = FiberRef::with_hooks(1_u32, |parent| parent + 100, |parent, child| parent + child);
    let program = counter
        .set(1)
        .zip_right(counter.get().fork())
        .flat_map(|child| child.join())
        .zip(counter.get());
    assert_eq!(harness.run(program), Some(Exit::succeed((101, 102))));
}

#[rstest]
fn failed_children_are_not_merged(harness: Harness) {
    let fiber_ref = FiberRef::new(0_u32);
    let program = fiber_ref
        .set(8)
        .widen::<&str>()
        .zip_right(IO::<&str, ()>::fail("child failed"))
        .fork()
        .flat_map(|child| child.join().either())
        .zip_right(fiber_ref.get());
    assert_eq!(harness.run(program), Some(Exit::succeed(0)));
}

#[rstest]
fn inherit_refs_merges_without_joining(harness: Harness) {
    let fiber_ref = FiberRef::new(String::from("parent"));
    let reader = fiber_ref.clone();
    let program = fiber_ref
        .set(String::from("child"))
        .fork()
        .flat_map(move |child| {
            let reader = reader.clone();
            child
                .await_exit()
                .zip_right(child.inherit_refs())
                .zip_right(reader.get())
        });
    assert_eq!(
        harness.run(program),
        Some(Exit::succeed(String::from("child")))
    );
}

#[test]
fn references_are_independent() {
    let first = FiberRef::new(1_u32);
    let second = FiberRef::new(1_u32);
    let scheduler = Arc::new(ManualScheduler::new());
    let runtime = Runtime::new(Platform::builder().scheduler(scheduler.clone()).build());
    let fiber = runtime.fork(first.set(2).zip_right(second.get()).zip(first.get()));
    scheduler.run_until_idle();
    assert_eq!(fiber.poll_now(), Some(Exit::succeed((1, 2))));
}
