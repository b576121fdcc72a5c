//! Folds, searches and derived queries over [`Cause`].
//!
//! Every traversal here is driven by an explicit work stack, so the depth of
//! the tree never translates into native stack depth.

use std::collections::HashSet;
use std::convert::Infallible;

use super::{Cause, CauseView, Defect, Leaf};
use crate::error::InterruptedError;
use crate::fiber::FiberId;

/// Pending work of [`Cause::fold`].
enum Step<'a, E> {
    Visit(&'a Cause<E>),
    Then,
    Both,
}

impl<E> Cause<E> {
    /// Structural catamorphism: replaces every node with the matching case.
    ///
    /// Leaves are visited left to right; `then` and `both` receive the
    /// already-folded children.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use strand::cause::Cause;
    ///
    /// let cause = Cause::fail(2).then(Cause::fail(3).both(Cause::fail(4)));
    /// let sum = cause.fold(
    ///     || 0,
    ///     |value| *value,
    ///     |_| 0,
    ///     |_| 0,
    ///     |left, right| left + right,
    ///     |left, right| left + right,
    /// );
    /// assert_eq!(sum, 9);
    /// ```
    #[allow(clippy::too_many_arguments)]
    pub fn fold<Z>(
        &self,
        empty: impl Fn() -> Z,
        fail: impl Fn(&E) -> Z,
        die: impl Fn(&Defect) -> Z,
        interrupt: impl Fn(FiberId) -> Z,
        then: impl Fn(Z, Z) -> Z,
        both: impl Fn(Z, Z) -> Z,
    ) -> Z {
        let mut work = vec![Step::Visit(self)];
        let mut results: Vec<Z> = Vec::new();

        while let Some(step) = work.pop() {
            match step {
                Step::Visit(cause) => match cause.view() {
                    CauseView::Empty => results.push(empty()),
                    CauseView::Fail(error) => results.push(fail(error)),
                    CauseView::Die(defect) => results.push(die(defect)),
                    CauseView::Interrupt(fiber_id) => results.push(interrupt(fiber_id)),
                    CauseView::Then(left, right) => {
                        work.push(Step::Then);
                        work.push(Step::Visit(right));
                        work.push(Step::Visit(left));
                    }
                    CauseView::Both(left, right) => {
                        work.push(Step::Both);
                        work.push(Step::Visit(right));
                        work.push(Step::Visit(left));
                    }
                },
                Step::Then => {
                    let (left, right) = pop_pair(&mut results);
                    results.push(then(left, right));
                }
                Step::Both => {
                    let (left, right) = pop_pair(&mut results);
                    results.push(both(left, right));
                }
            }
        }

        results
            .pop()
            .expect("internal error: fold produced no result")
    }

    /// Folds over every node (composite nodes included) in pre-order,
    /// left to right.
    pub fn fold_left<Z>(&self, initial: Z, mut f: impl FnMut(Z, &Self) -> Z) -> Z {
        let mut accumulator = initial;
        let mut stack = vec![self];
        while let Some(cause) = stack.pop() {
            accumulator = f(accumulator, cause);
            if let CauseView::Then(left, right) | CauseView::Both(left, right) = cause.view() {
                stack.push(right);
                stack.push(left);
            }
        }
        accumulator
    }

    /// Returns the first `Some` produced by `f` over the nodes, in pre-order.
    pub fn find<Z>(&self, mut f: impl FnMut(&Self) -> Option<Z>) -> Option<Z> {
        let mut stack = vec![self];
        while let Some(cause) = stack.pop() {
            if let Some(found) = f(cause) {
                return Some(found);
            }
            if let CauseView::Then(left, right) | CauseView::Both(left, right) = cause.view() {
                stack.push(right);
                stack.push(left);
            }
        }
        None
    }

    /// Returns `true` if `that` is empty or equals some subtree of `self`.
    pub fn contains(&self, that: &Self) -> bool
    where
        E: PartialEq,
    {
        that.is_empty() || self.find(|cause| (cause == that).then_some(())).is_some()
    }

    /// Typed failures, left to right.
    pub fn failures(&self) -> Vec<E>
    where
        E: Clone,
    {
        self.leaves()
            .filter_map(|leaf| match leaf {
                Leaf::Fail(error) => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    /// Defects, left to right.
    pub fn defects(&self) -> Vec<Defect> {
        self.leaves()
            .filter_map(|leaf| match leaf {
                Leaf::Die(defect) => Some(defect.clone()),
                _ => None,
            })
            .collect()
    }

    /// The ids of every fiber that took part in an interruption.
    pub fn interruptors(&self) -> HashSet<FiberId> {
        self.leaves()
            .filter_map(|leaf| match leaf {
                Leaf::Interrupt(fiber_id) => Some(fiber_id),
                _ => None,
            })
            .collect()
    }

    /// Returns `true` if some leaf is an interruption.
    pub fn interrupted(&self) -> bool {
        self.leaves().any(|leaf| matches!(leaf, Leaf::Interrupt(_)))
    }

    /// Returns `true` if no leaf is a typed failure or a defect.
    pub fn interrupted_only(&self) -> bool {
        !self
            .leaves()
            .any(|leaf| matches!(leaf, Leaf::Fail(_) | Leaf::Die(_)))
    }

    /// Returns `true` if some leaf is a defect.
    pub fn died(&self) -> bool {
        self.leaves().any(|leaf| matches!(leaf, Leaf::Die(_)))
    }

    /// Returns `true` if some leaf is a typed failure.
    pub fn failed(&self) -> bool {
        self.leaves().any(|leaf| matches!(leaf, Leaf::Fail(_)))
    }

    /// The first typed failure, if any.
    pub fn failure_option(&self) -> Option<E>
    where
        E: Clone,
    {
        self.leaves().find_map(|leaf| match leaf {
            Leaf::Fail(error) => Some(error.clone()),
            _ => None,
        })
    }

    /// The first typed failure, or else the cause with every typed failure
    /// removed.
    ///
    /// This is how ordinary error handlers see a cause: only typed failures
    /// are recoverable, everything else keeps propagating.
    pub fn failure_or_cause(&self) -> Result<E, Cause<Infallible>>
    where
        E: Clone,
    {
        self.failure_option().ok_or_else(|| self.strip_failures())
    }

    /// Removes every typed failure, pruning the tree.
    pub fn strip_failures(&self) -> Cause<Infallible> {
        self.fold(
            Cause::empty,
            |_| Cause::empty(),
            |defect| Cause::die(defect.clone()),
            Cause::interrupt,
            Cause::then,
            Cause::both,
        )
    }

    /// Removes every interruption, pruning the tree.
    pub fn strip_interrupts(&self) -> Self
    where
        E: Clone,
    {
        self.fold(
            Self::empty,
            |error| Self::fail(error.clone()),
            |defect| Self::die(defect.clone()),
            |_| Self::empty(),
            Self::then,
            Self::both,
        )
    }

    /// Keeps only the defects, or `None` when there are none.
    pub fn keep_defects(&self) -> Option<Cause<Infallible>> {
        let kept = self.fold(
            Cause::empty,
            |_| Cause::empty(),
            |defect| Cause::die(defect.clone()),
            |_| Cause::empty(),
            Cause::then,
            Cause::both,
        );
        (!kept.is_empty()).then_some(kept)
    }

    /// Transforms every typed failure, keeping the shape.
    pub fn map<E2>(&self, f: impl Fn(&E) -> E2) -> Cause<E2> {
        self.fold(
            Cause::empty,
            |error| Cause::fail(f(error)),
            |defect| Cause::die(defect.clone()),
            Cause::interrupt,
            Cause::then,
            Cause::both,
        )
    }

    /// Picks the single most important failure as a defect.
    ///
    /// Preference order: the first typed failure mapped through `f`; an
    /// [`InterruptedError`] naming every interruptor; the first defect; a
    /// generic [`InterruptedError`].
    pub fn squash_with(&self, f: impl FnOnce(&E) -> Defect) -> Defect {
        if let Some(error) = self.leaves().find_map(|leaf| match leaf {
            Leaf::Fail(error) => Some(error),
            _ => None,
        }) {
            return f(error);
        }

        let interruptors = self.interruptors();
        if !interruptors.is_empty() {
            return Defect::new(InterruptedError::new(interruptors.into_iter().collect()));
        }

        self.leaves()
            .find_map(|leaf| match leaf {
                Leaf::Die(defect) => Some(defect.clone()),
                _ => None,
            })
            .unwrap_or_else(|| Defect::new(InterruptedError::new(Vec::new())))
    }

    /// [`squash_with`](Self::squash_with) for error types that are errors
    /// themselves.
    pub fn squash(&self) -> Defect
    where
        E: std::error::Error + Clone + Send + Sync + 'static,
    {
        self.squash_with(|error| Defect::new(error.clone()))
    }
}

fn pop_pair<Z>(results: &mut Vec<Z>) -> (Z, Z) {
    let right = results
        .pop()
        .expect("internal error: missing right operand");
    let left = results
        .pop()
        .expect("internal error: missing left operand");
    (left, right)
}
