//! Fibers: lightweight, cooperatively scheduled threads of execution.
//!
//! Each fiber interprets one [`Instruction`](crate::effect::Instruction)
//! tree on behalf of its [`Runtime`](crate::runtime::Runtime). Fibers are
//! multiplexed onto the platform's [`Scheduler`](crate::scheduler::Scheduler);
//! between suspension points a fiber runs alone and owns its stacks.
//!
//! # Lifecycle
//!
//! ```text
//! Running ──▶ Suspended ──▶ Running ──▶ Finishing ──▶ Done
//!    │                                      ▲
//!    └──────────────────────────────────────┘
//! ```
//!
//! A fiber whose instructions are exhausted becomes `Finishing` while its own
//! scope closes (interrupting the children it forked), and `Done` once the
//! scope is closed. Observers registered with [`Fiber::await_exit`] are
//! called in registration order.

mod context;
mod descriptor;
mod fiber_ref;
mod handle;
mod id;
mod stack;
mod state;
mod status;

pub(crate) use context::FiberContext;
pub use context::Resume;
pub use descriptor::Descriptor;
pub use fiber_ref::{ErasedFiberRef, FiberRef};
pub use handle::{Fiber, RuntimeFiber};
pub use id::FiberId;
pub use stack::Stack;
pub use status::{InterruptStatus, Status};
