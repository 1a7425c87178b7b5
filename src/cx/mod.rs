//! The fiber context and scope API.
//!
//! [`Cx`] is the capability a fiber's computation receives: every fork entry
//! point, the cooperative primitives (yield, sleep, checkpoint), and ambient
//! scope capture flow through it explicitly. There is no hidden thread-local
//! context; whoever holds a `Cx` can be audited for what it can reach.

#[allow(clippy::module_inception)]
pub mod cx;
pub mod scope;

pub use cx::{Checkpoint, Cx, MaskGuard};
pub use scope::{CloseScope, ScopeHandle};
