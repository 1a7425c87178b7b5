//! Internal records for fibers and scopes.
//!
//! Records are the arena-stored bookkeeping behind the public handles. State
//! transitions live here as small, lock-free-of-context methods so the
//! runtime state can drive them under one lock and the invariants stay
//! testable in isolation.

pub mod fiber;
pub mod finalizer;
pub mod scope;

pub use fiber::{FiberRecord, FiberState, InterruptDisposition};
pub use finalizer::{Finalizer, FinalizerStack};
pub use scope::{ScopeRecord, ScopeRole, ScopeState};
