//! Per-fiber stacks.

use smallvec::SmallVec;

/// Number of elements stored inline before spilling to the heap.
const INLINE_CAPACITY: usize = 8;

/// A LIFO stack owned by a single fiber.
///
/// Interpreter stacks are usually shallow, so the first few elements live
/// inline. Push and pop are amortized O(1).
#[derive(Debug, Clone)]
pub struct Stack<A> {
    elements: SmallVec<[A; INLINE_CAPACITY]>,
}

impl<A> Stack<A> {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self {
            elements: SmallVec::new(),
        }
    }

    /// Creates a stack holding a single element.
    #[must_use]
    pub fn with(element: A) -> Self {
        let mut stack = Self::new();
        stack.push(element);
        stack
    }

    /// Pushes an element.
    #[inline]
    pub fn push(&mut self, element: A) {
        self.elements.push(element);
    }

    /// Pops the top element.
    #[inline]
    pub fn pop(&mut self) -> Option<A> {
        self.elements.pop()
    }

    /// Returns the top element.
    #[inline]
    #[must_use]
    pub fn peek(&self) -> Option<&A> {
        self.elements.last()
    }

    /// Returns `true` if the stack is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Number of elements.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns `true` if the elements are stored on the heap.
    #[must_use]
    pub fn spilled(&self) -> bool {
        self.elements.spilled()
    }
}

impl<A> Default for Stack<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn push_pop_is_lifo() {
        let mut stack = Stack::new();
        stack.push(1);
        stack.push(2);
        assert_eq!(stack.peek(), Some(&2));
        assert_eq!(stack.pop(), Some(2));
        assert_eq!(stack.pop(), Some(1));
        assert_eq!(stack.pop(), None);
    }

    #[rstest]
    fn spills_past_inline_capacity() {
        let mut stack = Stack::with(0);
        for value in 1..INLINE_CAPACITY {
            stack.push(value);
        }
        assert!(!stack.spilled());
        stack.push(INLINE_CAPACITY);
        assert!(stack.spilled());
        assert_eq!(stack.len(), INLINE_CAPACITY + 1);
    }
}
