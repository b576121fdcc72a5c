//! The shared state envelope of a fiber.

use std::convert::Infallible;
use std::panic::{AssertUnwindSafe, catch_unwind};

use super::Status;
use crate::cause::{Cause, Defect};
use crate::effect::RawExit;

/// Called once with the fiber's exit.
pub(crate) type Observer = Box<dyn FnOnce(&RawExit) + Send>;

/// Identifies a registered observer so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ObserverKey(u64);

/// What other fibers may see and change about a fiber.
///
/// Every transition is a single critical section on the fiber's state mutex;
/// observers are collected under the lock and called after it is released.
pub(crate) enum FiberState {
    Executing {
        status: Status,
        observers: Vec<(ObserverKey, Observer)>,
        next_observer: u64,
        interrupted: Cause<Infallible>,
    },
    Done(RawExit),
}

impl FiberState {
    pub(crate) fn initial() -> Self {
        Self::Executing {
            status: Status::Running {
                interrupting: false,
            },
            observers: Vec::new(),
            next_observer: 0,
            interrupted: Cause::empty(),
        }
    }

    /// Registers an observer, or returns the exit if the fiber is done.
    pub(crate) fn observe(&mut self, observer: Observer) -> Result<ObserverKey, RawExit> {
        match self {
            Self::Executing {
                observers,
                next_observer,
                ..
            } => {
                let key = ObserverKey(*next_observer);
                *next_observer += 1;
                observers.push((key, observer));
                Ok(key)
            }
            Self::Done(exit) => Err(exit.clone()),
        }
    }

    pub(crate) fn unobserve(&mut self, key: ObserverKey) {
        if let Self::Executing { observers, .. } = self {
            observers.retain(|(registered, _)| *registered != key);
        }
    }

    pub(crate) fn status(&self) -> Status {
        match self {
            Self::Executing { status, .. } => status.clone(),
            Self::Done(_) => Status::Done,
        }
    }

    pub(crate) fn interrupted(&self) -> Cause<Infallible> {
        match self {
            Self::Executing { interrupted, .. } => interrupted.clone(),
            Self::Done(_) => Cause::empty(),
        }
    }

    pub(crate) fn exit(&self) -> Option<RawExit> {
        match self {
            Self::Executing { .. } => None,
            Self::Done(exit) => Some(exit.clone()),
        }
    }
}

/// Calls every observer in registration order.
///
/// A panicking observer is logged and does not prevent the others from running.
pub(crate) fn notify_observers(observers: Vec<(ObserverKey, Observer)>, exit: &RawExit) {
    for (_, observer) in observers {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| observer(exit))) {
            let defect = Defect::from_panic(payload);
            tracing::error!(%defect, "fiber observer panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::Erased;
    use crate::exit::Exit;
    use parking_lot::Mutex;
    use rstest::rstest;
    use std::sync::Arc;

    #[rstest]
    fn observers_run_in_registration_order() {
        let mut state = FiberState::initial();
        let calls = Arc::new(Mutex::new(Vec::new()));
        for index in 0..3 {
            let calls = calls.clone();
            assert!(state.observe(Box::new(move |_| calls.lock().push(index))).is_ok());
        }
        let FiberState::Executing { observers, .. } = state else {
            unreachable!();
        };
        notify_observers(observers, &Exit::Success(Erased::unit()));
        assert_eq!(*calls.lock(), vec![0, 1, 2]);
    }

    #[rstest]
    fn removed_observers_are_not_called() {
        let mut state = FiberState::initial();
        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();
        let key = state
            .observe(Box::new(move |_| *flag.lock() = true))
            .unwrap();
        state.unobserve(key);
        let FiberState::Executing { observers, .. } = state else {
            unreachable!();
        };
        assert!(observers.is_empty());
        assert!(!*called.lock());
    }

    #[rstest]
    fn done_state_returns_the_exit() {
        let mut state = FiberState::Done(Exit::Success(Erased::new(7_i32)));
        let exit = state.observe(Box::new(|_| {})).unwrap_err();
        assert_eq!(exit.value().and_then(Erased::downcast_ref::<i32>), Some(&7));
        assert!(state.status().is_done());
    }

    #[rstest]
    fn panicking_observer_does_not_stop_the_rest() {
        let reached = Arc::new(Mutex::new(false));
        let flag = reached.clone();
        let observers: Vec<(ObserverKey, Observer)> = vec![
            (ObserverKey(0), Box::new(|_| panic!("observer failure"))),
            (ObserverKey(1), Box::new(move |_| *flag.lock() = true)),
        ];
        notify_observers(observers, &Exit::Success(Erased::unit()));
        assert!(*reached.lock());
    }
}
