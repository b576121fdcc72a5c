//! Unchecked failures.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::error::DefectMessage;

/// An unexpected, unchecked failure recorded by [`Cause::die`](super::Cause::die).
///
/// A defect wraps any shareable error. Panics raised while a fiber is running
/// are captured as defects carrying the panic message.
///
/// Two defects are equal when they share the same allocation or render the
/// same message.
///
/// # Examples
///
/// ```rust
/// use strand::cause::Defect;
///
/// let defect = Defect::message("invariant violated");
/// assert_eq!(defect.to_string(), "invariant violated");
/// assert_eq!(defect, Defect::message("invariant violated"));
/// ```
#[derive(Clone)]
pub struct Defect {
    error: Arc<dyn Error + Send + Sync + 'static>,
}

impl Defect {
    /// Wraps an error as a defect.
    pub fn new<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            error: Arc::new(error),
        }
    }

    /// Creates a defect described only by a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(DefectMessage(message.into()))
    }

    /// Converts a panic payload into a defect.
    ///
    /// `&str` and `String` payloads keep their text; any other payload is
    /// recorded as `"Unknown panic"`.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(string) = payload.downcast_ref::<&str>() {
            (*string).to_string()
        } else if let Some(string) = payload.downcast_ref::<String>() {
            string.clone()
        } else {
            "Unknown panic".to_string()
        };
        Self::message(message)
    }

    /// Returns the wrapped error.
    #[must_use]
    pub fn error(&self) -> &(dyn Error + Send + Sync + 'static) {
        self.error.as_ref()
    }

    /// Attempts to view the wrapped error as a concrete type.
    #[must_use]
    pub fn downcast_ref<T: Error + 'static>(&self) -> Option<&T> {
        self.error.downcast_ref::<T>()
    }
}

impl PartialEq for Defect {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.error, &other.error) || self.error.to_string() == other.error.to_string()
    }
}

impl Eq for Defect {}

impl fmt::Debug for Defect {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "Defect({:?})", self.error.to_string())
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InterruptedError;
    use rstest::rstest;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    #[rstest]
    fn from_panic_keeps_str_payload() {
        let payload = catch_unwind(AssertUnwindSafe(|| panic!("static message"))).unwrap_err();
        assert_eq!(Defect::from_panic(payload).to_string(), "static message");
    }

    #[rstest]
    fn from_panic_keeps_formatted_payload() {
        let value = 42;
        let payload =
            catch_unwind(AssertUnwindSafe(|| panic!("formatted {value}"))).unwrap_err();
        assert_eq!(Defect::from_panic(payload).to_string(), "formatted 42");
    }

    #[rstest]
    fn from_panic_with_unknown_payload() {
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(Defect::from_panic(payload).to_string(), "Unknown panic");
    }

    #[rstest]
    fn downcast_ref_recovers_the_error() {
        let defect = Defect::new(InterruptedError::new(Vec::new()));
        assert!(defect.downcast_ref::<InterruptedError>().is_some());
        assert!(defect.downcast_ref::<DefectMessage>().is_none());
    }

    #[rstest]
    fn equality_by_identity_or_message() {
        let defect = Defect::message("a");
        assert_eq!(defect, defect.clone());
        assert_eq!(defect, Defect::message("a"));
        assert_ne!(defect, Defect::message("b"));
    }
}
