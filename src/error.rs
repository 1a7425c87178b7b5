//! Error types.
//!
//! Errors are explicit and typed. A fiber's own failure never escapes its
//! outcome: nothing here is fatal to the process, and panics inside fiber
//! bodies are caught at the poll boundary and folded into `Failure` outcomes.

use crate::types::{FiberId, InterruptCause, PanicPayload, ScopeId};
use thiserror::Error;

/// Convenience result alias for fallible runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy of the runtime.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// The fiber was interrupted before natural completion.
    #[error("interrupted ({0})")]
    Interrupted(InterruptCause),

    /// An operation targeted a scope that has already begun closing.
    #[error("scope is already closed")]
    ScopeClosed,

    /// One or more finalizers failed while a scope closed.
    ///
    /// Closure still runs every remaining finalizer; the failures are
    /// collected here as a single composite cause.
    #[error("{} finalizer(s) failed during scope close", .0.len())]
    FinalizerFailure(Vec<Error>),

    /// The fiber body panicked.
    #[error("{0}")]
    Panicked(PanicPayload),

    /// An operation referenced a fiber unknown to this runtime.
    #[error("no such fiber: {0}")]
    NoSuchFiber(FiberId),

    /// An operation referenced a scope unknown to this runtime.
    #[error("no such scope: {0}")]
    NoSuchScope(ScopeId),

    /// The runtime is shutting down and no longer accepts work.
    #[error("runtime is shut down")]
    Shutdown,

    /// A user-supplied failure cause.
    #[error("{0}")]
    Message(&'static str),

    /// Runtime bookkeeping was inconsistent; indicates a bug in the runtime.
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl Error {
    /// Creates a failure from a caught panic payload.
    #[must_use]
    pub fn panicked(payload: PanicPayload) -> Self {
        Self::Panicked(payload)
    }

    /// Aggregates finalizer failures into a single composite error.
    ///
    /// Returns `None` when the list is empty (nothing failed).
    #[must_use]
    pub fn aggregate_finalizer_failures(errors: Vec<Error>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self::FinalizerFailure(errors))
        }
    }

    /// Returns true if this error records an interruption.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let err = Error::Interrupted(InterruptCause::shutdown());
        assert_eq!(err.to_string(), "interrupted (shutdown)");
        assert_eq!(Error::ScopeClosed.to_string(), "scope is already closed");
        assert_eq!(
            Error::Panicked(PanicPayload::new("boom")).to_string(),
            "panic: boom"
        );
    }

    #[test]
    fn aggregate_is_none_for_empty_list() {
        assert!(Error::aggregate_finalizer_failures(Vec::new()).is_none());

        let composite =
            Error::aggregate_finalizer_failures(vec![Error::Message("a"), Error::Message("b")])
                .expect("two failures should aggregate");
        assert_eq!(
            composite.to_string(),
            "2 finalizer(s) failed during scope close"
        );
        match composite {
            Error::FinalizerFailure(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected FinalizerFailure, got {other:?}"),
        }
    }

    #[test]
    fn is_interrupted_predicate() {
        assert!(Error::Interrupted(InterruptCause::default()).is_interrupted());
        assert!(!Error::ScopeClosed.is_interrupted());
    }
}
