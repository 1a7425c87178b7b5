//! Scope record and close protocol state.
//!
//! A scope is a lifetime container: it tracks attached fibers for
//! interrupt-on-close and holds a LIFO stack of finalizers. Closing walks a
//! one-way state machine, so a scope closes at most once and its finalizers
//! run at most once:
//!
//! ```text
//! Open → Draining → Finalizing → Closed
//! ```
//!
//! `Draining` interrupts and waits out attached fibers; `Finalizing` runs the
//! finalizer stack; `Closed` stores the aggregated outcome for late callers.

use crate::record::finalizer::{Finalizer, FinalizerStack};
use crate::types::{FiberId, FiberOutcome, InterruptCause, ScopeId};
use smallvec::SmallVec;
use std::task::Waker;

/// The role a scope was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeRole {
    /// The process-wide scope created at runtime start, closed at shutdown.
    Global,
    /// A scope created by a fiber for its own lexical region of work.
    Local,
    /// A scope created externally and passed around by handle.
    Explicit,
}

impl std::fmt::Display for ScopeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Local => write!(f, "local"),
            Self::Explicit => write!(f, "explicit"),
        }
    }
}

/// The close-protocol state of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    /// Accepting attachments and finalizers.
    Open,
    /// Close begun: attached fibers have been sent interrupt requests; the
    /// closer waits for all of them to reach `Done`.
    Draining,
    /// Attached fibers are gone; the finalizer stack is running.
    Finalizing,
    /// Terminal. The aggregated outcome is stored on the record.
    Closed,
}

impl ScopeState {
    /// Returns true if the scope still accepts attachments and finalizers.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns true if the scope reached its terminal state.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns true if close has begun (any of Draining/Finalizing/Closed).
    #[must_use]
    pub const fn is_closing(self) -> bool {
        !self.is_open()
    }
}

/// Internal record for a scope.
#[derive(Debug)]
pub struct ScopeRecord {
    /// Unique identifier.
    pub id: ScopeId,
    /// Role this scope was created with.
    pub role: ScopeRole,
    /// Explicitly linked parent scope, if nested.
    pub parent: Option<ScopeId>,
    /// The fiber that created this scope, if any. Owned scopes are closed
    /// during the owner's interrupt unwinding.
    pub owner: Option<FiberId>,
    /// Current close-protocol state.
    pub state: ScopeState,
    /// Fibers tracked for interrupt-on-close. Tracking only: a scope never
    /// keeps a fiber alive.
    pub attached: Vec<FiberId>,
    /// Pending finalizers, popped in reverse registration order.
    pub finalizers: FinalizerStack,
    /// Wakers of close callers parked on this scope's completion.
    pub close_wakers: SmallVec<[Waker; 2]>,
    /// Why attached fibers were interrupted, recorded when draining begins.
    pub close_cause: Option<InterruptCause>,
    /// Finalizer failures collected so far by the finalizing driver.
    pub close_errors: Vec<crate::error::Error>,
    /// The aggregated outcome, stored when the scope reaches `Closed`.
    pub close_outcome: Option<FiberOutcome>,
}

impl ScopeRecord {
    /// Creates an open scope record.
    #[must_use]
    pub fn new(
        id: ScopeId,
        role: ScopeRole,
        parent: Option<ScopeId>,
        owner: Option<FiberId>,
    ) -> Self {
        Self {
            id,
            role,
            parent,
            owner,
            state: ScopeState::Open,
            attached: Vec::new(),
            finalizers: FinalizerStack::new(),
            close_wakers: SmallVec::new(),
            close_cause: None,
            close_errors: Vec::new(),
            close_outcome: None,
        }
    }

    /// Attaches a fiber for interrupt-on-close tracking.
    ///
    /// Returns false if the scope is already closing; the fork that asked
    /// for the attachment must fail instead of creating an untracked fiber.
    pub fn attach(&mut self, fiber: FiberId) -> bool {
        if !self.state.is_open() {
            return false;
        }
        if !self.attached.contains(&fiber) {
            self.attached.push(fiber);
        }
        true
    }

    /// Detaches a fiber (normally because it reached `Done`).
    pub fn detach(&mut self, fiber: FiberId) {
        self.attached.retain(|&f| f != fiber);
    }

    /// Returns true if any attached fiber has not yet completed.
    #[must_use]
    pub fn has_attached(&self) -> bool {
        !self.attached.is_empty()
    }

    /// Registers a finalizer.
    ///
    /// Returns the finalizer back if the scope is already closing, so the
    /// caller can run it immediately ("always runs, even late").
    pub fn add_finalizer(&mut self, finalizer: Finalizer) -> Result<(), Finalizer> {
        if self.state.is_open() {
            self.finalizers.push(finalizer);
            Ok(())
        } else {
            Err(finalizer)
        }
    }

    /// Begins the close sequence: `Open → Draining`.
    ///
    /// Only the first caller wins; everyone else observes the transition
    /// already made. Returns the attached fibers to interrupt on success.
    pub fn begin_drain(&mut self, cause: InterruptCause) -> Option<Vec<FiberId>> {
        if self.state != ScopeState::Open {
            return None;
        }
        self.state = ScopeState::Draining;
        self.close_cause = Some(cause);
        Some(self.attached.clone())
    }

    /// Advances `Draining → Finalizing` once all attached fibers are done.
    ///
    /// Exactly one caller wins this transition and becomes the finalizing
    /// driver; the rest keep waiting for `Closed`.
    pub fn begin_finalize(&mut self) -> bool {
        if self.state == ScopeState::Draining && self.attached.is_empty() {
            self.state = ScopeState::Finalizing;
            true
        } else {
            false
        }
    }

    /// Reverts `Finalizing → Draining` after the finalizing driver was
    /// dropped mid-run, so another closer can win the transition again.
    pub fn abandon_finalize(&mut self) -> bool {
        if self.state == ScopeState::Finalizing {
            self.state = ScopeState::Draining;
            true
        } else {
            false
        }
    }

    /// Completes the close: `Finalizing → Closed`.
    ///
    /// Stores the aggregated outcome and hands back the parked close wakers.
    pub fn complete_close(&mut self, outcome: FiberOutcome) -> Option<SmallVec<[Waker; 2]>> {
        if self.state != ScopeState::Finalizing {
            return None;
        }
        self.state = ScopeState::Closed;
        self.close_outcome = Some(outcome);
        Some(std::mem::take(&mut self.close_wakers))
    }

    /// Parks a close caller until the scope reaches `Closed`.
    pub fn add_close_waker(&mut self, waker: &Waker) {
        if !self.close_wakers.iter().any(|w| w.will_wake(waker)) {
            self.close_wakers.push(waker.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Outcome;

    fn scope() -> ScopeRecord {
        ScopeRecord::new(ScopeId::new_for_test(0, 0), ScopeRole::Local, None, None)
    }

    fn fiber(n: u32) -> FiberId {
        FiberId::new_for_test(n, 0)
    }

    #[test]
    fn close_walks_one_way() {
        let mut s = scope();
        assert!(s.state.is_open());

        let drained = s.begin_drain(InterruptCause::scope_closed());
        assert_eq!(drained, Some(Vec::new()));
        assert_eq!(s.state, ScopeState::Draining);

        // Second drain attempt loses.
        assert!(s.begin_drain(InterruptCause::scope_closed()).is_none());

        assert!(s.begin_finalize());
        assert_eq!(s.state, ScopeState::Finalizing);
        assert!(!s.begin_finalize());

        assert!(s.complete_close(Outcome::Success(())).is_some());
        assert!(s.state.is_closed());
        assert!(s.complete_close(Outcome::Success(())).is_none());
    }

    #[test]
    fn drain_reports_attached_fibers() {
        let mut s = scope();
        assert!(s.attach(fiber(1)));
        assert!(s.attach(fiber(2)));
        assert!(s.attach(fiber(1)));
        assert_eq!(s.attached.len(), 2);

        let drained = s.begin_drain(InterruptCause::scope_closed()).unwrap();
        assert_eq!(drained, vec![fiber(1), fiber(2)]);
    }

    #[test]
    fn finalize_waits_for_detachment() {
        let mut s = scope();
        s.attach(fiber(1));
        s.begin_drain(InterruptCause::scope_closed());

        assert!(!s.begin_finalize());
        s.detach(fiber(1));
        assert!(!s.has_attached());
        assert!(s.begin_finalize());
    }

    #[test]
    fn attach_rejected_once_closing() {
        let mut s = scope();
        s.begin_drain(InterruptCause::scope_closed());
        assert!(!s.attach(fiber(1)));
        assert!(s.attached.is_empty());
    }

    #[test]
    fn late_finalizer_is_handed_back() {
        let mut s = scope();
        assert!(s.add_finalizer(Finalizer::sync(|| Ok(()))).is_ok());

        s.begin_drain(InterruptCause::scope_closed());
        let rejected = s.add_finalizer(Finalizer::sync(|| Ok(())));
        assert!(rejected.is_err());
        assert_eq!(s.finalizers.len(), 1);
    }

    #[test]
    fn closed_scope_stores_outcome() {
        let mut s = scope();
        s.begin_drain(InterruptCause::scope_closed());
        s.begin_finalize();
        s.complete_close(Outcome::Failure(crate::error::Error::FinalizerFailure(
            vec![crate::error::Error::Message("leak")],
        )));

        assert!(s.close_outcome.as_ref().is_some_and(Outcome::is_failure));
    }
}
