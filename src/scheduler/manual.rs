//! A deterministic scheduler driven by the caller.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{Scheduler, Task, TimerHandle};

#[derive(Default)]
struct ManualState {
    ready: VecDeque<Task>,
    timers: BTreeMap<(Duration, u64), Task>,
    next_timer: u64,
    now: Duration,
}

/// A single-threaded scheduler with a virtual clock.
///
/// Nothing runs until the caller invokes [`run_until_idle`](Self::run_until_idle)
/// or [`advance`](Self::advance). Tasks run in dispatch order; timers fire
/// in deadline order once the clock has passed their deadline.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use strand::effect::UIO;
/// use strand::runtime::{Platform, Runtime};
/// use strand::scheduler::ManualScheduler;
///
/// let scheduler = Arc::new(ManualScheduler::new());
/// let runtime = Runtime::new(Platform::builder().scheduler(scheduler.clone()).build());
///
/// let fiber = runtime.fork(UIO::sleep(Duration::from_millis(10)).as_value(5));
/// scheduler.run_until_idle();
/// assert!(fiber.poll_now().is_none());
///
/// scheduler.advance(Duration::from_millis(10));
/// assert_eq!(fiber.poll_now().unwrap().into_result().unwrap(), 5);
/// ```
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

impl ManualScheduler {
    /// Creates an idle scheduler at virtual time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs ready tasks, including the ones they dispatch, until none remain.
    /// Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut count = 0;
        loop {
            let next = self.state.lock().ready.pop_front();
            match next {
                Some(task) => {
                    task();
                    count += 1;
                }
                None => return count,
            }
        }
    }

    /// Moves the clock forward by `duration`, firing due timers in deadline
    /// order and draining ready tasks after each one.
    pub fn advance(&self, duration: Duration) -> usize {
        let target = self.state.lock().now + duration;
        let mut count = self.run_until_idle();
        loop {
            let due = {
                let mut state = self.state.lock();
                let first = state.timers.first_key_value().map(|(key, _)| *key);
                match first {
                    Some(key) if key.0 <= target => {
                        state.now = key.0;
                        state.timers.remove(&key)
                    }
                    _ => {
                        state.now = target;
                        None
                    }
                }
            };
            match due {
                Some(task) => {
                    task();
                    count += 1 + self.run_until_idle();
                }
                None => return count,
            }
        }
    }

    /// The virtual time elapsed since creation.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Number of ready tasks plus pending timers.
    #[must_use]
    pub fn pending(&self) -> usize {
        let state = self.state.lock();
        state.ready.len() + state.timers.len()
    }
}

impl Scheduler for ManualScheduler {
    /// Queues the task like [`dispatch_later`](Scheduler::dispatch_later), so
    /// that nothing runs outside [`ManualScheduler::run_until_idle`].
    fn dispatch_now(&self, task: Task) {
        self.dispatch_later(task);
    }

    fn dispatch_later(&self, task: Task) {
        self.state.lock().ready.push_back(task);
    }

    fn dispatch_after(&self, delay: Duration, task: Task) -> TimerHandle {
        let handle = TimerHandle::new();
        let mut state = self.state.lock();
        let deadline = state.now + delay;
        let sequence = state.next_timer;
        state.next_timer += 1;
        state.timers.insert((deadline, sequence), handle.guard(task));
        handle
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        formatter
            .debug_struct("ManualScheduler")
            .field("ready", &state.ready.len())
            .field("timers", &state.timers.len())
            .field("now", &state.now)
            .finish()
    }
}
