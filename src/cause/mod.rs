//! A lossless algebra of failure.
//!
//! A [`Cause<E>`] records every reason an effect did not succeed:
//!
//! - `Fail(E)`: an expected, typed failure
//! - `Die(Defect)`: an unchecked defect (for example a panic)
//! - `Interrupt(FiberId)`: cooperative cancellation by the given fiber
//! - `Then(left, right)`: `left` happened, and while recovering `right` happened too
//! - `Both(left, right)`: `left` and `right` happened concurrently
//! - `Empty`: no failure at all, the identity of both compositions
//!
//! # Semiring Laws
//!
//! - **Identity**: `Cause::empty().then(a) == a` and `a.both(Cause::empty()) == a`
//! - **Associativity**: `a.then(b.then(c)) == a.then(b).then(c)` (same for `both`)
//! - **Equality by leaves**: two causes are equal when their leaves, read
//!   left to right, are pairwise equal, whatever the shape of the tree
//!
//! # Stack Safety
//!
//! Causes aggregate arbitrarily many concurrent failures, so every traversal
//! (folding, equality, rendering, even dropping) walks the tree with an
//! explicit work stack instead of recursion.
//!
//! # Examples
//!
//! ```rust
//! use strand::cause::Cause;
//! use strand::fiber::FiberId;
//!
//! let interruptor = FiberId::new(0, 7);
//! let cause = Cause::fail("timeout").then(Cause::interrupt(interruptor));
//!
//! assert_eq!(cause.failures(), vec!["timeout"]);
//! assert!(cause.interruptors().contains(&interruptor));
//! assert!(!cause.interrupted_only());
//! ```

mod defect;
mod equality;
mod render;
mod traversal;

pub use defect::Defect;
pub use equality::{Leaf, Leaves};

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use crate::fiber::FiberId;

/// Internal node of a non-empty cause.
///
/// Composite nodes only ever hold non-empty children: [`Cause::then`] and
/// [`Cause::both`] collapse `Empty` operands.
enum Node<E> {
    Fail(E),
    Die(Defect),
    Interrupt(FiberId),
    Then(Cause<E>, Cause<E>),
    Both(Cause<E>, Cause<E>),
}

/// A structured record of why an effect failed.
///
/// Nodes are shared through `Arc`, so cloning a cause is O(1) and does not
/// require `E: Clone`.
///
/// See the [module documentation](self) for the algebra.
pub struct Cause<E> {
    /// `None` is the empty cause.
    node: Option<Arc<Node<E>>>,
}

/// A borrowed view of the top node of a [`Cause`], for pattern matching.
///
/// # Examples
///
/// ```rust
/// use strand::cause::{Cause, CauseView};
///
/// let cause = Cause::fail(1).both(Cause::fail(2));
/// match cause.view() {
///     CauseView::Both(left, right) => {
///         assert_eq!(left.failures(), vec![1]);
///         assert_eq!(right.failures(), vec![2]);
///     }
///     _ => unreachable!(),
/// }
/// ```
#[derive(Debug)]
pub enum CauseView<'a, E> {
    /// No failure.
    Empty,
    /// A typed failure.
    Fail(&'a E),
    /// An unchecked defect.
    Die(&'a Defect),
    /// An interruption by the given fiber.
    Interrupt(FiberId),
    /// Sequential composition.
    Then(&'a Cause<E>, &'a Cause<E>),
    /// Parallel composition.
    Both(&'a Cause<E>, &'a Cause<E>),
}

impl<E> Cause<E> {
    /// The empty cause.
    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self { node: None }
    }

    /// A typed failure.
    #[inline]
    pub fn fail(error: E) -> Self {
        Self::from_node(Node::Fail(error))
    }

    /// An unchecked defect.
    #[inline]
    pub fn die(defect: Defect) -> Self {
        Self::from_node(Node::Die(defect))
    }

    /// An interruption performed by `fiber_id`.
    #[inline]
    pub fn interrupt(fiber_id: FiberId) -> Self {
        Self::from_node(Node::Interrupt(fiber_id))
    }

    fn from_node(node: Node<E>) -> Self {
        Self {
            node: Some(Arc::new(node)),
        }
    }

    /// Sequential composition: `self` happened, then `that` happened.
    ///
    /// Used when a failure handler itself fails, or a finalizer fails after
    /// the main computation did. `Empty` on either side is dropped.
    #[must_use]
    pub fn then(self, that: Self) -> Self {
        if self.is_empty() {
            that
        } else if that.is_empty() {
            self
        } else {
            Self::from_node(Node::Then(self, that))
        }
    }

    /// Parallel composition: `self` and `that` happened concurrently.
    ///
    /// `Empty` on either side is dropped.
    #[must_use]
    pub fn both(self, that: Self) -> Self {
        if self.is_empty() {
            that
        } else if that.is_empty() {
            self
        } else {
            Self::from_node(Node::Both(self, that))
        }
    }

    /// Returns `true` if this cause records no failure.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.node.is_none()
    }

    /// Returns a borrowed view of the top node.
    #[must_use]
    pub fn view(&self) -> CauseView<'_, E> {
        match self.node.as_deref() {
            None => CauseView::Empty,
            Some(Node::Fail(error)) => CauseView::Fail(error),
            Some(Node::Die(defect)) => CauseView::Die(defect),
            Some(Node::Interrupt(fiber_id)) => CauseView::Interrupt(*fiber_id),
            Some(Node::Then(left, right)) => CauseView::Then(left, right),
            Some(Node::Both(left, right)) => CauseView::Both(left, right),
        }
    }

    /// Returns `true` if both causes share the same top node.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.node, &other.node) {
            (None, None) => true,
            (Some(left), Some(right)) => Arc::ptr_eq(left, right),
            _ => false,
        }
    }
}

impl Cause<Infallible> {
    /// Embeds a cause that cannot contain typed failures into any error type.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::convert::Infallible;
    /// use strand::cause::Cause;
    /// use strand::fiber::FiberId;
    ///
    /// let interrupted: Cause<Infallible> = Cause::interrupt(FiberId::new(0, 1));
    /// let widened: Cause<String> = interrupted.widen();
    /// assert!(widened.interrupted_only());
    /// ```
    #[must_use]
    pub fn widen<E>(&self) -> Cause<E> {
        self.map(|never| match *never {})
    }
}

impl<E> Clone for Cause<E> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
        }
    }
}

impl<E> Default for Cause<E> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<E> Drop for Cause<E> {
    /// Dismantles uniquely owned composite nodes iteratively, so dropping a
    /// chain of any depth never recurses.
    fn drop(&mut self) {
        let Some(node) = self.node.take() else {
            return;
        };
        if !matches!(*node, Node::Then(..) | Node::Both(..)) {
            return;
        }
        let mut pending = vec![node];
        while let Some(node) = pending.pop() {
            if let Some(mut owned) = Arc::into_inner(node) {
                if let Node::Then(left, right) | Node::Both(left, right) = &mut owned {
                    pending.extend(left.node.take());
                    pending.extend(right.node.take());
                }
            }
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for Cause<E> {
    /// Writes the tree structure, e.g. `Then(Fail("a"), Interrupt(#3))`.
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        enum Token<'a, E> {
            Visit(&'a Cause<E>),
            Text(&'static str),
        }

        let mut work = vec![Token::Visit(self)];
        while let Some(token) = work.pop() {
            match token {
                Token::Text(text) => formatter.write_str(text)?,
                Token::Visit(cause) => match cause.view() {
                    CauseView::Empty => formatter.write_str("Empty")?,
                    CauseView::Fail(error) => write!(formatter, "Fail({error:?})")?,
                    CauseView::Die(defect) => write!(formatter, "Die({defect:?})")?,
                    CauseView::Interrupt(fiber_id) => write!(formatter, "Interrupt({fiber_id})")?,
                    CauseView::Then(left, right) | CauseView::Both(left, right) => {
                        let open = if matches!(cause.view(), CauseView::Then(..)) {
                            "Then("
                        } else {
                            "Both("
                        };
                        formatter.write_str(open)?;
                        work.push(Token::Text(")"));
                        work.push(Token::Visit(right));
                        work.push(Token::Text(", "));
                        work.push(Token::Visit(left));
                    }
                },
            }
        }
        Ok(())
    }
}

impl<E: fmt::Debug> fmt::Display for Cause<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.pretty())
    }
}

static_assertions::assert_impl_all!(Cause<String>: Send, Sync, Clone);
