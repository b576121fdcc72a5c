//! Observation of fiber lifecycles.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::effect::{Erased, Instruction, RawExit, UIO};
use crate::fiber::{FiberContext, RuntimeFiber};

/// Watches fibers start and end.
///
/// A supervisor installed with [`Effect::supervised`](crate::effect::Effect::supervised)
/// sees every fiber forked inside that region, and every fiber those fibers
/// fork in turn. Callbacks run on the fiber's own thread while it is being
/// started or finished, so they must be quick and must not block.
pub trait Supervisor: Send + Sync {
    /// Called when `child` is forked by `parent`, before it starts running.
    fn on_start(
        &self,
        environment: &Erased,
        effect: &Instruction,
        parent: Option<&RuntimeFiber>,
        child: &RuntimeFiber,
    );

    /// Called once `child` is done.
    fn on_end(&self, exit: &RawExit, child: &RuntimeFiber);
}

/// A supervisor that does nothing.
#[must_use]
pub fn none() -> Arc<dyn Supervisor> {
    Arc::new(NoSupervisor)
}

struct NoSupervisor;

impl Supervisor for NoSupervisor {
    fn on_start(&self, _: &Erased, _: &Instruction, _: Option<&RuntimeFiber>, _: &RuntimeFiber) {}

    fn on_end(&self, _: &RawExit, _: &RuntimeFiber) {}
}

/// Tracks live children.
///
/// Children are held weakly, so tracking never keeps a finished fiber alive.
#[derive(Default)]
pub struct Track {
    children: Mutex<Vec<Weak<FiberContext>>>,
}

impl Track {
    /// A supervisor that keeps track of the fibers it has seen start and
    /// not yet end.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The children that have started and not yet ended.
    #[must_use]
    pub fn value(&self) -> Vec<RuntimeFiber> {
        self.children
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .map(RuntimeFiber::new)
            .collect()
    }

    /// Reads the live children as an effect.
    pub fn children(self: &Arc<Self>) -> UIO<Vec<RuntimeFiber>> {
        let track = self.clone();
        UIO::sync(move || track.value())
    }
}

impl Supervisor for Track {
    fn on_start(&self, _: &Erased, _: &Instruction, _: Option<&RuntimeFiber>, child: &RuntimeFiber) {
        let mut children = self.children.lock();
        children.retain(|weak| weak.strong_count() > 0);
        children.push(Arc::downgrade(child.context()));
    }

    fn on_end(&self, _: &RawExit, child: &RuntimeFiber) {
        let target = Arc::as_ptr(child.context());
        self.children
            .lock()
            .retain(|weak| weak.strong_count() > 0 && !std::ptr::eq(weak.as_ptr(), target));
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Track")
            .field("children", &self.children.lock().len())
            .finish()
    }
}

/// Notifies two supervisors, `first` then `second`.
pub(crate) struct Both {
    first: Arc<dyn Supervisor>,
    second: Arc<dyn Supervisor>,
}

impl Both {
    pub(crate) fn new(first: Arc<dyn Supervisor>, second: Arc<dyn Supervisor>) -> Arc<dyn Supervisor> {
        Arc::new(Self { first, second })
    }
}

impl Supervisor for Both {
    fn on_start(
        &self,
        environment: &Erased,
        effect: &Instruction,
        parent: Option<&RuntimeFiber>,
        child: &RuntimeFiber,
    ) {
        self.first.on_start(environment, effect, parent, child);
        self.second.on_start(environment, effect, parent, child);
    }

    fn on_end(&self, exit: &RawExit, child: &RuntimeFiber) {
        self.first.on_end(exit, child);
        self.second.on_end(exit, child);
    }
}
