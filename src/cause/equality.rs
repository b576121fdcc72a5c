//! Leaf linearization and equality.

use std::iter::FusedIterator;

use super::{Cause, CauseView, Defect};
use crate::fiber::FiberId;

/// A leaf of a [`Cause`], as yielded by [`Cause::leaves`].
#[derive(Debug, PartialEq, Eq)]
pub enum Leaf<'a, E> {
    /// A typed failure.
    Fail(&'a E),
    /// A defect.
    Die(&'a Defect),
    /// An interruption.
    Interrupt(FiberId),
}

/// Depth-first, left-to-right iterator over the leaves of a [`Cause`].
///
/// `Empty` nodes are skipped. The pending right-hand sides live on an
/// explicit stack, so arbitrarily deep trees are walked in constant native
/// stack space.
#[derive(Debug)]
pub struct Leaves<'a, E> {
    stack: Vec<&'a Cause<E>>,
}

impl<'a, E> Iterator for Leaves<'a, E> {
    type Item = Leaf<'a, E>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(cause) = self.stack.pop() {
            match cause.view() {
                CauseView::Empty => {}
                CauseView::Fail(error) => return Some(Leaf::Fail(error)),
                CauseView::Die(defect) => return Some(Leaf::Die(defect)),
                CauseView::Interrupt(fiber_id) => return Some(Leaf::Interrupt(fiber_id)),
                CauseView::Then(left, right) | CauseView::Both(left, right) => {
                    self.stack.push(right);
                    self.stack.push(left);
                }
            }
        }
        None
    }
}

impl<E> FusedIterator for Leaves<'_, E> {}

impl<E> Cause<E> {
    /// Iterates over the leaves, left to right.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use strand::cause::{Cause, Leaf};
    ///
    /// let cause = Cause::fail(1).both(Cause::fail(2));
    /// let leaves: Vec<_> = cause.leaves().collect();
    /// assert_eq!(leaves, vec![Leaf::Fail(&1), Leaf::Fail(&2)]);
    /// ```
    pub fn leaves(&self) -> Leaves<'_, E> {
        Leaves { stack: vec![self] }
    }
}

/// Causes are equal when their leaf sequences are pairwise equal, regardless
/// of how `Then` and `Both` nodes group them.
impl<E: PartialEq> PartialEq for Cause<E> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.leaves().eq(other.leaves())
    }
}

impl<E: Eq> Eq for Cause<E> {}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn reassociated_both_is_equal() {
        let left = Cause::fail(1).both(Cause::fail(2)).both(Cause::fail(3));
        let right = Cause::fail(1).both(Cause::fail(2).both(Cause::fail(3)));
        assert_eq!(left, right);
    }

    #[rstest]
    fn empty_leaves_are_ignored() {
        assert_eq!(Cause::fail(1).then(Cause::empty()), Cause::fail(1));
        assert_eq!(Cause::<i32>::empty(), Cause::empty());
    }

    #[rstest]
    fn leaf_order_matters() {
        assert_ne!(
            Cause::fail(1).then(Cause::fail(2)),
            Cause::fail(2).then(Cause::fail(1))
        );
    }

    #[rstest]
    fn different_leaf_kinds_differ() {
        let fiber_id = FiberId::new(0, 1);
        assert_ne!(Cause::<i32>::interrupt(fiber_id), Cause::die(Defect::message("#1")));
    }

    #[rstest]
    fn deep_left_chain_equality() {
        let mut left = Cause::fail(0);
        let mut right = Cause::fail(0);
        for index in 1..100_000 {
            left = left.then(Cause::fail(index));
            right = right.then(Cause::fail(index));
        }
        assert_eq!(left, right);
    }
}
