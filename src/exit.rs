//! The outcome of running an effect.

use std::fmt;

use crate::cause::{Cause, Defect};
use crate::error::FiberFailure;
use crate::fiber::FiberId;

/// How a fiber finished: with a value, or with the full [`Cause`] of its
/// failure.
///
/// # Examples
///
/// ```rust
/// use strand::exit::Exit;
///
/// let success: Exit<String, i32> = Exit::succeed(2);
/// assert_eq!(success.map(|value| value * 10), Exit::succeed(20));
///
/// let failure: Exit<&str, i32> = Exit::fail("e");
/// assert!(failure.into_result().is_err());
/// ```
pub enum Exit<E, A> {
    /// The effect produced a value.
    Success(A),
    /// The effect failed.
    Failure(Cause<E>),
}

impl<E, A> Exit<E, A> {
    /// A successful exit.
    pub const fn succeed(value: A) -> Self {
        Self::Success(value)
    }

    /// A failed exit with a typed error.
    pub fn fail(error: E) -> Self {
        Self::Failure(Cause::fail(error))
    }

    /// A failed exit with a defect.
    pub fn die(defect: Defect) -> Self {
        Self::Failure(Cause::die(defect))
    }

    /// An exit interrupted by `fiber_id`.
    pub fn interrupt(fiber_id: FiberId) -> Self {
        Self::Failure(Cause::interrupt(fiber_id))
    }

    /// A failed exit with an arbitrary cause.
    pub const fn halt(cause: Cause<E>) -> Self {
        Self::Failure(cause)
    }

    /// Returns `true` on success.
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns `true` on failure.
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns `true` if the exit records an interruption.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Failure(cause) if cause.interrupted())
    }

    /// The value, if successful.
    pub const fn value(&self) -> Option<&A> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure(_) => None,
        }
    }

    /// The cause, if failed.
    pub const fn cause(&self) -> Option<&Cause<E>> {
        match self {
            Self::Success(_) => None,
            Self::Failure(cause) => Some(cause),
        }
    }

    /// Transforms the value.
    pub fn map<B>(self, f: impl FnOnce(A) -> B) -> Exit<E, B> {
        match self {
            Self::Success(value) => Exit::Success(f(value)),
            Self::Failure(cause) => Exit::Failure(cause),
        }
    }

    /// Transforms every typed failure.
    pub fn map_error<E2>(self, f: impl Fn(&E) -> E2) -> Exit<E2, A> {
        match self {
            Self::Success(value) => Exit::Success(value),
            Self::Failure(cause) => Exit::Failure(cause.map(f)),
        }
    }

    /// Combines two exits.
    ///
    /// Two successes are merged with `f`; two failures are joined with
    /// `combine`; otherwise the failure wins.
    pub fn zip_with<B, C>(
        self,
        that: Exit<E, B>,
        f: impl FnOnce(A, B) -> C,
        combine: impl FnOnce(Cause<E>, Cause<E>) -> Cause<E>,
    ) -> Exit<E, C> {
        match (self, that) {
            (Self::Success(left), Exit::Success(right)) => Exit::Success(f(left, right)),
            (Self::Failure(left), Exit::Failure(right)) => Exit::Failure(combine(left, right)),
            (Self::Failure(cause), Exit::Success(_)) | (Self::Success(_), Exit::Failure(cause)) => {
                Exit::Failure(cause)
            }
        }
    }

    /// Pairs the values of two exits that ran concurrently.
    pub fn zip_par<B>(self, that: Exit<E, B>) -> Exit<E, (A, B)> {
        self.zip_with(that, |left, right| (left, right), Cause::both)
    }

    /// Pairs the values of two exits that ran one after the other.
    pub fn zip<B>(self, that: Exit<E, B>) -> Exit<E, (A, B)> {
        self.zip_with(that, |left, right| (left, right), Cause::then)
    }

    /// Converts into a `Result`, keeping the full cause on failure.
    ///
    /// # Errors
    ///
    /// Returns a [`FiberFailure`] wrapping the cause when the exit failed.
    pub fn into_result(self) -> Result<A, FiberFailure<E>> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(cause) => Err(FiberFailure::new(cause)),
        }
    }
}

impl<E> Exit<E, ()> {
    /// The successful unit exit.
    pub const fn unit() -> Self {
        Self::Success(())
    }
}

impl<E, A: Clone> Clone for Exit<E, A> {
    fn clone(&self) -> Self {
        match self {
            Self::Success(value) => Self::Success(value.clone()),
            Self::Failure(cause) => Self::Failure(cause.clone()),
        }
    }
}

impl<E: PartialEq, A: PartialEq> PartialEq for Exit<E, A> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Success(left), Self::Success(right)) => left == right,
            (Self::Failure(left), Self::Failure(right)) => left == right,
            _ => false,
        }
    }
}

impl<E: Eq, A: Eq> Eq for Exit<E, A> {}

impl<E: fmt::Debug, A: fmt::Debug> fmt::Debug for Exit<E, A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(value) => formatter.debug_tuple("Success").field(value).finish(),
            Self::Failure(cause) => formatter.debug_tuple("Failure").field(cause).finish(),
        }
    }
}

impl<E, A> From<Result<A, E>> for Exit<E, A> {
    fn from(result: Result<A, E>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(error) => Self::fail(error),
        }
    }
}
