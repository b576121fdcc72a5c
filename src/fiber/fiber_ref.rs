//! Fiber-local references.
//!
//! A [`FiberRef`] holds one value per fiber. A forked child starts with its
//! parent's value passed through the reference's `fork` hook; joining a child
//! merges the child's value back through the `join` hook.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::effect::{Data, Effect, Erased, Instruction, UIO, downcast_value};

static NEXT_FIBER_REF_ID: AtomicU64 = AtomicU64::new(1);

type ForkHook = Arc<dyn Fn(&Erased) -> Erased + Send + Sync>;
type JoinHook = Arc<dyn Fn(&Erased, &Erased) -> Erased + Send + Sync>;

/// The untyped identity of a [`FiberRef`], as seen by the interpreter.
#[derive(Clone)]
pub struct ErasedFiberRef {
    inner: Arc<FiberRefInner>,
}

struct FiberRefInner {
    id: u64,
    initial: Erased,
    fork: ForkHook,
    join: JoinHook,
}

impl ErasedFiberRef {
    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn initial(&self) -> Erased {
        self.inner.initial.clone()
    }

    pub(crate) fn fork(&self, value: &Erased) -> Erased {
        (self.inner.fork)(value)
    }

    pub(crate) fn join(&self, parent: &Erased, child: &Erased) -> Erased {
        (self.inner.join)(parent, child)
    }
}

impl fmt::Debug for ErasedFiberRef {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "FiberRef({})", self.inner.id)
    }
}

/// The values a fiber has set, keyed by reference id.
#[derive(Clone, Default)]
pub(crate) struct FiberLocals {
    values: BTreeMap<u64, (ErasedFiberRef, Erased)>,
}

impl FiberLocals {
    pub(crate) fn get(&self, fiber_ref: &ErasedFiberRef) -> Erased {
        self.values
            .get(&fiber_ref.id())
            .map_or_else(|| fiber_ref.initial(), |(_, value)| value.clone())
    }

    pub(crate) fn set(&mut self, fiber_ref: &ErasedFiberRef, value: Erased) {
        self.values.insert(fiber_ref.id(), (fiber_ref.clone(), value));
    }

    /// The locals a child starts with.
    pub(crate) fn fork(&self) -> Self {
        let values = self
            .values
            .iter()
            .map(|(id, (fiber_ref, value))| (*id, (fiber_ref.clone(), fiber_ref.fork(value))))
            .collect();
        Self { values }
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&ErasedFiberRef, &Erased)> {
        self.values.values().map(|(fiber_ref, value)| (fiber_ref, value))
    }
}

/// A value with one copy per fiber.
///
/// # Examples
///
/// ```rust
/// use strand::effect::UIO;
/// use strand::fiber::FiberRef;
/// use strand::runtime::Runtime;
///
/// let request_id = FiberRef::new(0_u64);
/// let program = request_id
///     .set(7)
///     .zip_right(request_id.locally(9, request_id.get()))
///     .zip(request_id.get());
///
/// let exit = Runtime::default().run_blocking(program);
/// assert_eq!(exit.into_result().unwrap(), (9, 7));
/// ```
pub struct FiberRef<A> {
    raw: ErasedFiberRef,
    marker: PhantomData<fn() -> A>,
}

impl<A: Data> FiberRef<A> {
    /// Creates a reference whose children copy the parent's value and whose
    /// joins keep the child's value.
    pub fn new(initial: A) -> Self {
        Self::with_hooks(initial, A::clone, |_, child| child.clone())
    }

    /// Creates a reference with custom fork and join hooks.
    ///
    /// `fork` maps the parent's value to the child's initial value; `join`
    /// merges `(parent, child)` when the child is joined.
    pub fn with_hooks(
        initial: A,
        fork: impl Fn(&A) -> A + Send + Sync + 'static,
        join: impl Fn(&A, &A) -> A + Send + Sync + 'static,
    ) -> Self {
        let fork: ForkHook = Arc::new(move |value: &Erased| match value.downcast_ref::<A>() {
            Some(value) => Erased::new(fork(value)),
            None => value.clone(),
        });
        let join: JoinHook = Arc::new(move |parent: &Erased, child: &Erased| {
            match (parent.downcast_ref::<A>(), child.downcast_ref::<A>()) {
                (Some(parent), Some(child)) => Erased::new(join(parent, child)),
                _ => child.clone(),
            }
        });
        Self {
            raw: ErasedFiberRef {
                inner: Arc::new(FiberRefInner {
                    id: NEXT_FIBER_REF_ID.fetch_add(1, Ordering::Relaxed),
                    initial: Erased::new(initial),
                    fork,
                    join,
                }),
            },
            marker: PhantomData,
        }
    }

    /// Reads the value and replaces it, producing a result.
    pub fn modify<B: Data>(&self, f: impl Fn(A) -> (B, A) + Send + Sync + 'static) -> UIO<B> {
        let modify = Arc::new(move |current: Erased| match downcast_value::<A>(current.clone()) {
            Ok(value) => {
                let (result, next) = f(value);
                (Erased::new(result), Erased::new(next))
            }
            Err(_) => (Erased::unit(), current),
        });
        Effect::from_instruction(Instruction::FiberRefModify {
            fiber_ref: self.raw.clone(),
            modify,
        })
    }

    /// Reads the value.
    pub fn get(&self) -> UIO<A> {
        self.modify(|value| (value.clone(), value))
    }

    /// Replaces the value.
    pub fn set(&self, value: A) -> UIO<()> {
        self.modify(move |_| ((), value.clone()))
    }

    /// Transforms the value.
    pub fn update(&self, f: impl Fn(A) -> A + Send + Sync + 'static) -> UIO<()> {
        self.modify(move |value| ((), f(value)))
    }

    /// Runs `effect` with the value set to `value`, restoring the previous
    /// value afterwards, whatever the outcome.
    pub fn locally<R: Data, E: Data, B: Data>(
        &self,
        value: A,
        effect: Effect<R, E, B>,
    ) -> Effect<R, E, B> {
        let this = self.clone();
        let restore = self.clone();
        let set = self.clone();
        Effect::bracket_exit(
            this.get().lift().widen(),
            move |_| set.set(value.clone()).lift().widen().zip_right(effect.clone()),
            move |previous, _| restore.set(previous.clone()).lift(),
        )
    }
}

impl<A> Clone for FiberRef<A> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            marker: PhantomData,
        }
    }
}

impl<A> fmt::Debug for FiberRef<A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.raw.fmt(formatter)
    }
}

/// Merges the locals of a finished child into the running fiber.
pub(crate) fn inherit_locals(child: &FiberLocals) -> Instruction {
    child
        .entries()
        .map(|(fiber_ref, value)| (fiber_ref.clone(), value.clone()))
        .fold(Instruction::unit(), |acc, (fiber_ref, child_value)| {
            let merge = fiber_ref.clone();
            let step = Instruction::FiberRefModify {
                fiber_ref,
                modify: Arc::new(move |parent| {
                    (Erased::unit(), merge.join(&parent, &child_value))
                }),
            };
            acc.flat_map(Arc::new(move |_| step.clone()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn locals_fall_back_to_initial() {
        let fiber_ref = FiberRef::new(5_i32);
        let locals = FiberLocals::default();
        assert_eq!(
            locals.get(&fiber_ref.raw).downcast_ref::<i32>(),
            Some(&5)
        );
    }

    #[rstest]
    fn fork_applies_the_hook() {
        let fiber_ref = FiberRef::with_hooks(1_i32, |value| value * 10, |parent, _| *parent);
        let mut locals = FiberLocals::default();
        locals.set(&fiber_ref.raw, Erased::new(3_i32));
        let child = locals.fork();
        assert_eq!(
            child.get(&fiber_ref.raw).downcast_ref::<i32>(),
            Some(&30)
        );
    }

    #[rstest]
    fn join_hook_merges_values() {
        let fiber_ref = FiberRef::with_hooks(0_i32, |value| *value, |parent, child| parent + child);
        let merged = fiber_ref
            .raw
            .join(&Erased::new(2_i32), &Erased::new(5_i32));
        assert_eq!(merged.downcast_ref::<i32>(), Some(&7));
    }

    #[rstest]
    fn references_have_distinct_ids() {
        let first = FiberRef::new(());
        let second = FiberRef::new(());
        assert_ne!(first.raw.id(), second.raw.id());
    }
}
