//! Fork lifetime policies.
//!
//! Every fork chooses exactly one of four lifetime policies; nothing is
//! inferred. The policy decides who may end the fiber's life early:
//!
//! | Policy | Parent link | Scope attachment | Early termination by |
//! |---|---|---|---|
//! | `Supervised` | forking fiber | none | parent reaching `Done` |
//! | `Daemon` | none | global scope | runtime shutdown |
//! | `Scoped` | none | ambient local scope | that scope's close |
//! | `Into(scope)` | none | the named scope | that scope's close |

use super::id::{FiberId, ScopeId};
use core::fmt;

/// The lifetime policy chosen by a fork entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkPolicy {
    /// Default fork: the new fiber is supervised by the forking fiber and is
    /// interrupted when the parent reaches `Done`.
    Supervised,
    /// Daemon fork: attached to the global scope, independent of the forker.
    Daemon,
    /// Scoped fork: attached to the ambient scope captured at the call site.
    Scoped,
    /// Targeted fork: attached to an explicitly supplied scope.
    Into(ScopeId),
}

impl ForkPolicy {
    /// Returns true if this policy creates a supervision edge.
    #[must_use]
    pub const fn is_supervised(self) -> bool {
        matches!(self, Self::Supervised)
    }
}

impl fmt::Display for ForkPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Supervised => write!(f, "supervised"),
            Self::Daemon => write!(f, "daemon"),
            Self::Scoped => write!(f, "scoped"),
            Self::Into(scope) => write!(f, "into({scope})"),
        }
    }
}

/// The resolved wiring for a new fiber: its supervision parent (if any) and
/// the scope tracking it for interrupt-on-close (if any).
///
/// Exactly one of the two is populated for every policy except a supervised
/// fork from outside the runtime, which falls back to the global scope so
/// shutdown still bounds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkLinks {
    /// The supervising parent fiber.
    pub parent: Option<FiberId>,
    /// The scope the fiber is attached to.
    pub scope: Option<ScopeId>,
}
