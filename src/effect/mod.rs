//! Typed effect descriptions.
//!
//! An [`Effect<R, E, A>`] describes a computation that needs an environment
//! of type `R`, may fail with a typed error `E`, and may succeed with a value
//! of type `A`. Building an effect performs no work: it only assembles an
//! [`Instruction`] tree, which a [`Runtime`](crate::runtime::Runtime) later
//! hands to a fiber to interpret.
//!
//! Descriptions are immutable and cheap to clone, and can be run any number
//! of times.
//!
//! # Aliases
//!
//! - [`IO<E, A>`]: no environment.
//! - [`UIO<A>`]: no environment, cannot fail with a typed error.
//! - [`URIO<R, A>`]: needs `R`, cannot fail with a typed error.
//!
//! # Examples
//!
//! ```rust
//! use strand::effect::{IO, UIO};
//! use strand::runtime::Runtime;
//!
//! let parse = |text: &'static str| IO::attempt(move || text.parse::<i32>().map_err(|e| e.to_string()));
//!
//! let program = parse("20")
//!     .zip_with(parse("22"), |a, b| a + b)
//!     .catch_all(|_| UIO::succeed(0));
//!
//! let exit = Runtime::default().run_blocking(program);
//! assert_eq!(exit.into_result().unwrap(), 42);
//! ```
//!
//! # Failures
//!
//! Failures are described by a [`Cause`], which keeps typed failures,
//! defects and interruptions apart. [`Effect::catch_all`] and
//! [`Effect::fold_m`] see typed failures only; defects and interruptions
//! pass through them unless [`Effect::catch_all_cause`] or
//! [`Effect::fold_cause_m`] is used.

mod asynchronous;
mod concurrency;
mod erased;
mod instruction;
mod interruption;
mod recovery;

pub use asynchronous::{Callback, Registration};
pub use erased::{Data, Erased};
pub(crate) use erased::{downcast_value, erase_cause, erase_exit, typed_cause, typed_exit};
pub use instruction::{
    Continuation, FailureHandler, Instruction, RaceContinuation, RawExit, Register, Thunk,
};
pub use interruption::InterruptStatusRestore;

use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cause::{Cause, Defect};
use crate::exit::Exit;
use crate::fiber::FiberId;
use crate::runtime::Platform;

/// A description of a computation that needs `R`, may fail with `E` and may
/// succeed with `A`.
pub struct Effect<R, E, A> {
    instruction: Instruction,
    marker: PhantomData<fn(R) -> (E, A)>,
}

/// An effect that needs no environment.
pub type IO<E, A> = Effect<(), E, A>;

/// An effect that needs no environment and has no typed failures.
pub type UIO<A> = Effect<(), Infallible, A>;

/// An effect that needs `R` and has no typed failures.
pub type URIO<R, A> = Effect<R, Infallible, A>;

// =============================================================================
// Instructions
// =============================================================================

impl<R, E, A> Effect<R, E, A> {
    /// Wraps an instruction.
    ///
    /// The instruction must fail only with `E` values and succeed only with
    /// `A` values; anything else surfaces as a defect when the typed layer
    /// reads it back.
    #[must_use]
    pub const fn from_instruction(instruction: Instruction) -> Self {
        Self {
            instruction,
            marker: PhantomData,
        }
    }

    /// Unwraps the instruction.
    #[must_use]
    pub fn into_instruction(self) -> Instruction {
        self.instruction
    }

    /// Borrows the instruction.
    #[must_use]
    pub const fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn retype<R2, E2, A2>(self) -> Effect<R2, E2, A2> {
        Effect::from_instruction(self.instruction)
    }
}

impl<R, A> Effect<R, Infallible, A> {
    /// Lets an effect without typed failures take part in a computation with
    /// any error type.
    #[must_use]
    pub fn widen<E>(self) -> Effect<R, E, A> {
        self.retype()
    }
}

impl<E, A> Effect<(), E, A> {
    /// Lets an effect that needs no environment run in any environment.
    ///
    /// The effect itself still sees `()`.
    #[must_use]
    pub fn lift<R>(self) -> Effect<R, E, A> {
        Effect::from_instruction(Instruction::Provide {
            environment: Erased::unit(),
            effect: Arc::new(self.instruction),
        })
    }
}

/// Adapts a typed continuation to the interpreter.
///
/// A value of the wrong type becomes a defect.
fn continuation<A: Data>(f: impl Fn(A) -> Instruction + Send + Sync + 'static) -> Continuation {
    Arc::new(move |value| match downcast_value::<A>(value) {
        Ok(value) => f(value),
        Err(defect) => Instruction::halt(Cause::die(defect)),
    })
}

/// Adapts a typed failure handler to the interpreter.
fn failure_handler<E: Data>(
    f: impl Fn(Cause<E>) -> Instruction + Send + Sync + 'static,
) -> FailureHandler {
    Arc::new(move |cause| f(typed_cause(&cause)))
}

// =============================================================================
// Constructors
// =============================================================================

impl<R: Data, E: Data, A: Data> Effect<R, E, A> {
    /// Succeeds with `value`.
    pub fn succeed(value: A) -> Self {
        Self::from_instruction(Instruction::Succeed(Erased::new(value)))
    }

    /// Runs a side effect that cannot fail.
    ///
    /// A panic inside `f` becomes a defect.
    pub fn sync(f: impl Fn() -> A + Send + Sync + 'static) -> Self {
        Self::from_instruction(Instruction::EffectTotal(Arc::new(move || Erased::new(f()))))
    }

    /// Runs a side effect whose panic is turned into a typed failure by
    /// `on_panic`.
    pub fn try_catch(
        f: impl Fn() -> A + Send + Sync + 'static,
        on_panic: impl Fn(Defect) -> E + Send + Sync + 'static,
    ) -> Self {
        Self::from_instruction(Instruction::EffectPartial {
            effect: Arc::new(move || Erased::new(f())),
            on_panic: Arc::new(move |defect| Erased::new(on_panic(defect))),
        })
    }

    /// Runs a side effect that reports failure through its result.
    pub fn attempt(f: impl Fn() -> Result<A, E> + Send + Sync + 'static) -> Self {
        Self::suspend(move || Self::from_result(f()))
    }

    /// Fails with `error`.
    pub fn fail(error: E) -> Self {
        Self::halt(Cause::fail(error))
    }

    /// Fails with an error built when the effect runs.
    pub fn fail_with(f: impl Fn() -> E + Send + Sync + 'static) -> Self {
        Self::from_instruction(Instruction::Fail(Arc::new(move || {
            Cause::fail(Erased::new(f()))
        })))
    }

    /// Dies with `defect`.
    pub fn die(defect: Defect) -> Self {
        Self::halt(Cause::die(defect))
    }

    /// Dies with a message.
    pub fn die_message(message: impl Into<String>) -> Self {
        Self::die(Defect::message(message))
    }

    /// Fails with `cause`.
    pub fn halt(cause: Cause<E>) -> Self {
        Self::from_instruction(Instruction::halt(erase_cause(&cause)))
    }

    /// Fails with a cause built when the effect runs.
    pub fn halt_with(f: impl Fn() -> Cause<E> + Send + Sync + 'static) -> Self {
        Self::from_instruction(Instruction::Fail(Arc::new(move || erase_cause(&f()))))
    }

    /// Completes like `exit`.
    pub fn from_exit(exit: Exit<E, A>) -> Self {
        Self::from_instruction(Instruction::done(erase_exit(&exit)))
    }

    /// Succeeds with `Ok` and fails with `Err`.
    pub fn from_result(result: Result<A, E>) -> Self {
        match result {
            Ok(value) => Self::succeed(value),
            Err(error) => Self::fail(error),
        }
    }

    /// Builds the effect when it runs.
    pub fn suspend(f: impl Fn() -> Self + Send + Sync + 'static) -> Self {
        Self::from_instruction(Instruction::Suspend(Arc::new(move |_, _| f().instruction)))
    }

    /// Builds the effect when it runs, from the platform and the running
    /// fiber's id.
    pub fn suspend_with(f: impl Fn(&Platform, FiberId) -> Self + Send + Sync + 'static) -> Self {
        Self::from_instruction(Instruction::Suspend(Arc::new(move |platform, fiber_id| {
            f(platform, fiber_id).instruction
        })))
    }
}

impl<R: Data, E: Data> Effect<R, E, ()> {
    /// Succeeds with `()`.
    pub fn unit() -> Self {
        Self::from_instruction(Instruction::unit())
    }
}

// =============================================================================
// Sequencing
// =============================================================================

impl<R: Data, E: Data, A: Data> Effect<R, E, A> {
    /// Transforms the value.
    pub fn map<B: Data>(self, f: impl Fn(A) -> B + Send + Sync + 'static) -> Effect<R, E, B> {
        Effect::from_instruction(
            self.instruction
                .flat_map(continuation(move |value| Instruction::Succeed(Erased::new(f(value))))),
        )
    }

    /// Continues with the effect built from the value.
    pub fn flat_map<B: Data>(
        self,
        f: impl Fn(A) -> Effect<R, E, B> + Send + Sync + 'static,
    ) -> Effect<R, E, B> {
        Effect::from_instruction(
            self.instruction
                .flat_map(continuation(move |value| f(value).instruction)),
        )
    }

    /// Alias for [`flat_map`](Self::flat_map).
    pub fn and_then<B: Data>(
        self,
        f: impl Fn(A) -> Effect<R, E, B> + Send + Sync + 'static,
    ) -> Effect<R, E, B> {
        self.flat_map(f)
    }

    /// Runs `self` then `that`, combining both values.
    pub fn zip_with<B: Data, C: Data>(
        self,
        that: Effect<R, E, B>,
        f: impl Fn(A, B) -> C + Send + Sync + 'static,
    ) -> Effect<R, E, C> {
        let f = Arc::new(f);
        self.flat_map(move |a| {
            let f = f.clone();
            that.clone().map(move |b| f(a.clone(), b))
        })
    }

    /// Runs `self` then `that`, keeping both values.
    pub fn zip<B: Data>(self, that: Effect<R, E, B>) -> Effect<R, E, (A, B)> {
        self.zip_with(that, |a, b| (a, b))
    }

    /// Runs `self` then `that`, keeping the value of `self`.
    pub fn zip_left<B: Data>(self, that: Effect<R, E, B>) -> Self {
        self.zip_with(that, |a, _| a)
    }

    /// Runs `self` then `that`, keeping the value of `that`.
    pub fn zip_right<B: Data>(self, that: Effect<R, E, B>) -> Effect<R, E, B> {
        self.flat_map(move |_| that.clone())
    }

    /// Replaces the value with `value`.
    pub fn as_value<B: Data>(self, value: B) -> Effect<R, E, B> {
        self.map(move |_| value.clone())
    }

    /// Discards the value.
    pub fn unit_value(self) -> Effect<R, E, ()> {
        self.map(|_| ())
    }
}

impl<R: Data, E: Data, B: Data> Effect<R, E, Vec<B>> {
    /// Runs `f` for every item in order, collecting the values.
    ///
    /// Stops at the first failure. The chain of steps is assembled each time
    /// the effect runs, so a traversal of any length can be rerun.
    pub fn foreach<T: Data>(
        items: impl IntoIterator<Item = T>,
        f: impl Fn(T) -> Effect<R, E, B> + Send + Sync + 'static,
    ) -> Self {
        let items: Vec<T> = items.into_iter().collect();
        let f = Arc::new(f);
        Self::suspend(move || {
            let collected = Arc::new(Mutex::new(Vec::with_capacity(items.len())));
            let finished = collected.clone();
            items
                .iter()
                .cloned()
                .fold(Effect::<R, E, ()>::unit(), |acc, item| {
                    let f = f.clone();
                    let collected = collected.clone();
                    acc.flat_map(move |()| {
                        let collected = collected.clone();
                        f(item.clone()).map(move |value| collected.lock().push(value))
                    })
                })
                .map(move |()| std::mem::take(&mut *finished.lock()))
        })
    }
}

// =============================================================================
// Environment
// =============================================================================

impl<R: Data, E: Data> Effect<R, E, R> {
    /// Reads the environment.
    pub fn environment() -> Self {
        Self::from_instruction(Instruction::Read(continuation(|environment: R| {
            Instruction::Succeed(Erased::new(environment))
        })))
    }
}

impl<R: Data, E: Data, A: Data> Effect<R, E, A> {
    /// Reads part of the environment.
    pub fn access(f: impl Fn(&R) -> A + Send + Sync + 'static) -> Self {
        Effect::<R, E, R>::environment().map(move |environment| f(&environment))
    }

    /// Builds an effect from the environment.
    pub fn access_m(f: impl Fn(R) -> Self + Send + Sync + 'static) -> Self {
        Effect::<R, E, R>::environment().flat_map(f)
    }

    /// Supplies the environment, so the effect runs in any other.
    pub fn provide<R0>(self, environment: R) -> Effect<R0, E, A> {
        Effect::from_instruction(Instruction::Provide {
            environment: Erased::new(environment),
            effect: Arc::new(self.instruction),
        })
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

impl<R, E, A> Clone for Effect<R, E, A> {
    fn clone(&self) -> Self {
        Self::from_instruction(self.instruction.clone())
    }
}

impl<R, E, A> fmt::Debug for Effect<R, E, A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Effect")
            .field("instruction", &self.instruction)
            .finish()
    }
}

static_assertions::assert_impl_all!(IO<String, u32>: Send, Sync, Clone);
