//! Type-erased values moved through the interpreter.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::cause::{Cause, Defect};
use crate::exit::Exit;

/// Values an effect may produce, fail with, or read from its environment.
///
/// Anything `Clone + Send + Sync + 'static` qualifies.
pub trait Data: Any + Clone + Send + Sync {}

impl<T: Any + Clone + Send + Sync> Data for T {}

/// A shareable value whose concrete type is known only to the typed
/// [`Effect`](super::Effect) layer.
///
/// The interpreter never inspects the value; it only moves it between
/// continuations. Cloning is O(1).
///
/// # Examples
///
/// ```rust
/// use strand::effect::Erased;
///
/// let erased = Erased::new(21_u32);
/// assert_eq!(erased.downcast_ref::<u32>(), Some(&21));
/// assert_eq!(erased.downcast::<u32>().ok(), Some(21));
/// ```
#[derive(Clone)]
pub struct Erased {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Erased {
    /// Erases a value.
    pub fn new<T: Data>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// The erased unit value.
    #[must_use]
    pub fn unit() -> Self {
        Self::new(())
    }

    /// Recovers the value, cloning it only if it is still shared.
    ///
    /// # Errors
    ///
    /// Returns `self` unchanged if the value is not a `T`.
    pub fn downcast<T: Data>(self) -> Result<T, Self> {
        let type_name = self.type_name;
        match self.value.downcast::<T>() {
            Ok(shared) => Ok(Arc::try_unwrap(shared).unwrap_or_else(|shared| (*shared).clone())),
            Err(value) => Err(Self { value, type_name }),
        }
    }

    /// Borrows the value as a `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Returns `true` if the value is a `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// The name of the erased type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for Erased {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "Erased<{}>", self.type_name)
    }
}

/// Recovers a typed value, turning a type mismatch into a defect.
pub(crate) fn downcast_value<A: Data>(value: Erased) -> Result<A, Defect> {
    value.downcast::<A>().map_err(|value| {
        Defect::message(format!(
            "expected a value of type {} but found {}",
            std::any::type_name::<A>(),
            value.type_name()
        ))
    })
}

/// Erases every typed failure of a cause.
pub(crate) fn erase_cause<E: Data>(cause: &Cause<E>) -> Cause<Erased> {
    cause.map(|error| Erased::new(error.clone()))
}

/// Recovers the typed failures of a cause; failures of another type become
/// defects.
pub(crate) fn typed_cause<E: Data>(cause: &Cause<Erased>) -> Cause<E> {
    cause.fold(
        Cause::empty,
        |error| match downcast_value::<E>(error.clone()) {
            Ok(error) => Cause::fail(error),
            Err(defect) => Cause::die(defect),
        },
        |defect| Cause::die(defect.clone()),
        Cause::interrupt,
        Cause::then,
        Cause::both,
    )
}

/// Erases both sides of an exit.
pub(crate) fn erase_exit<E: Data, A: Data>(exit: &Exit<E, A>) -> Exit<Erased, Erased> {
    match exit {
        Exit::Success(value) => Exit::Success(Erased::new(value.clone())),
        Exit::Failure(cause) => Exit::Failure(erase_cause(cause)),
    }
}

/// Recovers both sides of an exit.
pub(crate) fn typed_exit<E: Data, A: Data>(exit: Exit<Erased, Erased>) -> Exit<E, A> {
    match exit {
        Exit::Success(value) => match downcast_value::<A>(value) {
            Ok(value) => Exit::Success(value),
            Err(defect) => Exit::Failure(Cause::die(defect)),
        },
        Exit::Failure(cause) => Exit::Failure(typed_cause(&cause)),
    }
}
