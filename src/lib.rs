//! # strand
//!
//! A fiber-based effect runtime for Rust.
//!
//! ## Overview
//!
//! Programs are built as immutable descriptions, [`Effect<R, E, A>`](effect::Effect)
//! values, and run by lightweight fibers multiplexed onto a host scheduler.
//! The crate provides:
//!
//! - **Effects**: typed descriptions with sequencing, error recovery,
//!   resource safety, and environment access.
//! - **Fibers**: cooperative threads of execution with preemption, structured
//!   interruption and fiber-local state.
//! - **Causes**: a failure algebra that keeps typed failures, defects and
//!   interruptions apart and records whether they happened in sequence or in
//!   parallel.
//! - **Scopes**: finalizer registries that tie the lifetime of child fibers
//!   to their parent.
//! - **Schedulers**: a tokio-backed scheduler and a deterministic manual one.
//!
//! ## Feature Flags
//!
//! - `tokio` (default): the tokio-backed scheduler and default runtime
//! - `serde`: `Serialize`/`Deserialize` for fiber ids and
//!   [`RuntimeConfig`](runtime::RuntimeConfig)
//! - `full`: enable all features
//!
//! ## Example
//!
//! ```rust
//! use strand::prelude::*;
//!
//! let program = IO::<String, u32>::succeed(20)
//!     .fork()
//!     .widen()
//!     .flat_map(|fiber| fiber.join())
//!     .zip_with_par(IO::succeed(22), |a, b| a + b);
//!
//! let exit = Runtime::default().run_blocking(program);
//! assert_eq!(exit.into_result().unwrap(), 42);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// Note: Disabling redundant_closure_for_method_calls due to clippy 0.1.92 panic bug
#![allow(clippy::redundant_closure_for_method_calls)]

/// Prelude module for convenient imports.
///
/// Re-exports commonly used types and traits.
///
/// # Usage
///
/// ```rust
/// use strand::prelude::*;
/// ```
pub mod prelude {
    pub use crate::cause::{Cause, Defect};
    pub use crate::effect::{Data, Effect, IO, UIO, URIO};
    pub use crate::exit::Exit;
    pub use crate::fiber::{Fiber, FiberId, FiberRef, InterruptStatus};
    pub use crate::runtime::{Platform, Runtime};
    pub use crate::scope::Scope;
}

pub mod cause;
pub mod effect;
pub mod error;
pub mod exit;
pub mod fiber;
pub mod runtime;
pub mod scheduler;
pub mod scope;

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use crate::scheduler::ManualScheduler;
    use std::sync::Arc;

    #[test]
    fn prelude_runs_a_program() {
        let scheduler = Arc::new(ManualScheduler::new());
        let runtime = Runtime::new(Platform::builder().scheduler(scheduler.clone()).build());
        let fiber = runtime.fork(UIO::succeed(1).flat_map(|n| UIO::succeed(n + 1)));
        scheduler.run_until_idle();
        assert_eq!(fiber.poll_now(), Some(Exit::succeed(2)));
    }
}
