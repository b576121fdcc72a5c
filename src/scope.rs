//! Lifetimes and finalization.
//!
//! A [`Scope`] collects finalizers and runs them once, when it is closed with
//! an exit. Every fiber owns a scope; children forked by the fiber register a
//! finalizer on it that interrupts them, which is how closing a parent
//! cascades to its children.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use strand::effect::{Erased, UIO};
//! use strand::exit::Exit;
//! use strand::runtime::Runtime;
//! use strand::scope::Scope;
//!
//! let scope = Scope::make();
//! let released = Arc::new(AtomicBool::new(false));
//! let flag = released.clone();
//! scope
//!     .add_finalizer(move |_| {
//!         let flag = flag.clone();
//!         UIO::sync(move || flag.store(true, Ordering::SeqCst))
//!     })
//!     .unwrap();
//!
//! let closed = Runtime::default().run_blocking(scope.close(Exit::succeed(Erased::unit())));
//! assert!(closed.into_result().unwrap());
//! assert!(released.load(Ordering::SeqCst));
//! assert!(scope.is_closed());
//! ```

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::cause::Cause;
use crate::effect::{Effect, Erased, Instruction, RawExit, UIO};
use crate::exit::Exit;

/// How the finalizers of a scope run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionStrategy {
    /// One after the other, last added first.
    #[default]
    Sequential,
    /// All at once.
    Parallel,
}

/// Identifies a finalizer so it can be removed with [`Scope::deny`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FinalizerKey(u64);

type Finalizer = Box<dyn FnOnce(&RawExit) -> Instruction + Send>;

enum ScopeState {
    Open {
        next_key: u64,
        finalizers: BTreeMap<u64, Finalizer>,
    },
    Closed(RawExit),
}

struct ScopeInner {
    global: bool,
    strategy: ExecutionStrategy,
    state: Mutex<ScopeState>,
    parent: Mutex<Option<(Weak<ScopeInner>, FinalizerKey)>>,
}

/// A finalization boundary.
///
/// Cloning is cheap; clones refer to the same scope.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    fn with(global: bool, strategy: ExecutionStrategy) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                global,
                strategy,
                state: Mutex::new(ScopeState::Open {
                    next_key: 0,
                    finalizers: BTreeMap::new(),
                }),
                parent: Mutex::new(None),
            }),
        }
    }

    /// The scope that never closes. Fibers forked into it are daemons.
    #[must_use]
    pub fn global() -> Self {
        static GLOBAL: std::sync::LazyLock<Scope> =
            std::sync::LazyLock::new(|| Scope::with(true, ExecutionStrategy::Sequential));
        GLOBAL.clone()
    }

    /// A fresh, open scope whose finalizers run sequentially.
    #[must_use]
    pub fn make() -> Self {
        Self::with(false, ExecutionStrategy::Sequential)
    }

    /// A fresh, open scope with the given strategy.
    #[must_use]
    pub fn make_with(strategy: ExecutionStrategy) -> Self {
        Self::with(false, strategy)
    }

    /// Creates a child scope that is closed, with the same exit, when `self`
    /// closes. Closing the child first detaches it from `self`.
    ///
    /// If `self` is already closed, the child is created closed.
    #[must_use]
    pub fn fork(&self, strategy: ExecutionStrategy) -> Self {
        let child = Self::with(false, strategy);
        let weak_child = Arc::downgrade(&child.inner);
        let registered = self.add_finalizer_raw(Box::new(move |exit: &RawExit| {
            weak_child.upgrade().map_or_else(Instruction::unit, |inner| {
                Scope { inner }.close(exit.clone()).into_instruction()
            })
        }));
        match registered {
            Ok(key) => {
                *child.inner.parent.lock() = Some((Arc::downgrade(&self.inner), key));
            }
            Err(exit) => {
                *child.inner.state.lock() = ScopeState::Closed(exit);
            }
        }
        child
    }

    /// Returns `true` for [`Scope::global`].
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.inner.global
    }

    /// Returns `true` once the scope has been closed.
    ///
    /// The global scope is never closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(*self.inner.state.lock(), ScopeState::Closed(_))
    }

    /// The strategy finalizers run with.
    #[must_use]
    pub fn strategy(&self) -> ExecutionStrategy {
        self.inner.strategy
    }

    /// Registers a finalizer, run with the closing exit.
    ///
    /// # Errors
    ///
    /// Returns the exit the scope was closed with if it is already closed.
    pub fn add_finalizer(
        &self,
        finalizer: impl FnOnce(&Exit<Erased, Erased>) -> UIO<()> + Send + 'static,
    ) -> Result<FinalizerKey, Exit<Erased, Erased>> {
        self.add_finalizer_raw(Box::new(move |exit| finalizer(exit).into_instruction()))
    }

    pub(crate) fn add_finalizer_raw(&self, finalizer: Finalizer) -> Result<FinalizerKey, RawExit> {
        if self.inner.global {
            return Ok(FinalizerKey(u64::MAX));
        }
        match &mut *self.inner.state.lock() {
            ScopeState::Open {
                next_key,
                finalizers,
            } => {
                let key = *next_key;
                *next_key += 1;
                finalizers.insert(key, finalizer);
                Ok(FinalizerKey(key))
            }
            ScopeState::Closed(exit) => Err(exit.clone()),
        }
    }

    /// Removes a finalizer. Returns `true` if it was still registered.
    pub fn deny(&self, key: FinalizerKey) -> bool {
        match &mut *self.inner.state.lock() {
            ScopeState::Open { finalizers, .. } => finalizers.remove(&key.0).is_some(),
            ScopeState::Closed(_) => false,
        }
    }

    /// Closes the scope with `exit` and runs its finalizers.
    ///
    /// Succeeds with `true` if this call closed the scope, `false` if it was
    /// already closed (or is the global scope). Finalizer failures are
    /// logged.
    pub fn close(&self, exit: Exit<Erased, Erased>) -> UIO<bool> {
        self.close_collecting(exit).map(|(closed, failures)| {
            if !failures.is_empty() {
                tracing::warn!(failures = %failures.pretty(), "scope finalizers failed");
            }
            closed
        })
    }

    /// Closes the scope, producing whether this call closed it together with
    /// the combined failures of its finalizers.
    pub(crate) fn close_collecting(&self, exit: RawExit) -> UIO<(bool, Cause<Infallible>)> {
        let scope = self.clone();
        UIO::suspend(move || {
            let Some(finalizers) = scope.take_finalizers(&exit) else {
                return UIO::succeed((false, Cause::empty()));
            };
            if let Some((parent, key)) = scope.inner.parent.lock().take() {
                if let Some(inner) = parent.upgrade() {
                    Scope { inner }.deny(key);
                }
            }
            let effects: Vec<UIO<()>> = finalizers
                .into_iter()
                .rev()
                .map(|finalizer| Effect::from_instruction(finalizer(&exit)))
                .collect();
            run_finalizers(effects, scope.inner.strategy).map(|failures| (true, failures))
        })
    }

    fn take_finalizers(&self, exit: &RawExit) -> Option<Vec<Finalizer>> {
        if self.inner.global {
            return None;
        }
        let mut state = self.inner.state.lock();
        match std::mem::replace(&mut *state, ScopeState::Closed(exit.clone())) {
            ScopeState::Open { finalizers, .. } => Some(finalizers.into_values().collect()),
            closed @ ScopeState::Closed(_) => {
                *state = closed;
                None
            }
        }
    }
}

/// Runs finalizers, combining their failures with `Then` (sequential) or
/// `Both` (parallel).
fn run_finalizers(effects: Vec<UIO<()>>, strategy: ExecutionStrategy) -> UIO<Cause<Infallible>> {
    match strategy {
        ExecutionStrategy::Sequential => {
            effects
                .into_iter()
                .fold(UIO::succeed(Cause::empty()), |acc, finalizer| {
                    acc.flat_map(move |failures: Cause<Infallible>| {
                        finalizer.clone().exit().map(move |exit| {
                            failures.clone().then(exit.cause().cloned().unwrap_or_default())
                        })
                    })
                })
        }
        ExecutionStrategy::Parallel => UIO::foreach_par_in(
            effects,
            |finalizer: UIO<()>| finalizer.exit(),
            Scope::global(),
        )
        .map(|exits| {
            exits
                .into_iter()
                .filter_map(|exit| exit.cause().cloned())
                .fold(Cause::empty(), Cause::both)
        }),
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Scope")
            .field("global", &self.inner.global)
            .field("strategy", &self.inner.strategy)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Scope {}
