//! Fibra: a cooperative fiber runtime with scope-based lifetimes.
//!
//! # Overview
//!
//! Fibra is the concurrency kernel an effect system sits on top of: fibers
//! (lightweight, independently schedulable computations), scopes (lifetime
//! containers with finalizers and interrupt-on-close), and a cooperative
//! scheduler that never preempts a fiber mid-step.
//!
//! # Core Guarantees
//!
//! - **Explicit lifetimes**: every fork picks one of four policies:
//!   supervised by the forker, daemon under the global scope, attached to
//!   the ambient scope, or attached to a named scope. Nothing is inferred.
//! - **No child outlives a `Done` parent**: automatic supervision sends an
//!   interrupt request to every live child when the parent completes.
//! - **Interrupt-correct teardown**: interruption is a cooperative protocol
//!   (request → checkpoint → unwind → `Done(Interrupted)`), never a silent
//!   drop; an interrupted fiber closes its own scopes before finishing.
//! - **Exactly-once finalization**: scope finalizers run once, in reverse
//!   registration order, with failures collected rather than fatal.
//! - **Deterministic fork ordering**: a freshly forked fiber never runs
//!   before its forker suspends, yields, or completes.
//!
//! # Quick Start
//!
//! ```ignore
//! use fibra::Executor;
//!
//! let mut exec = Executor::new();
//! let handle = exec.spawn(|cx| async move {
//!     let child = cx.fork(|cx| async move {
//!         cx.yield_now().await;
//!         Ok(2 + 2)
//!     })?;
//!     child.join().await.into_result()
//! })?;
//! exec.run_until_quiescent();
//! assert_eq!(handle.poll_outcome().unwrap().unwrap(), 4);
//! ```
//!
//! # Module Structure
//!
//! - [`types`]: identifiers, outcomes, interrupt causes, fork policies
//! - [`record`]: fiber and scope records with their state machines
//! - [`supervision`]: the parent-child registry
//! - [`runtime`]: queue, dispatch core, executor, threaded runtime
//! - [`cx`]: the capability context and scope API
//! - [`error`]: the error taxonomy

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod cx;
pub mod error;
pub mod record;
pub mod runtime;
pub mod supervision;
pub mod types;
pub mod util;

#[doc(hidden)]
pub mod test_utils;

pub use cx::{CloseScope, Cx, ScopeHandle};
pub use error::{Error, Result};
pub use runtime::{
    Executor, FiberHandle, Runtime, RuntimeBuilder, RuntimeConfig, RuntimeSnapshot,
};
pub use supervision::Supervisor;
pub use types::{
    FiberId, FiberOutcome, ForkPolicy, InterruptCause, InterruptKind, Outcome, ScopeId,
    SuspendReason, Time,
};
