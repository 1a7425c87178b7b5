//! Fiber record and state machine.
//!
//! A fiber is a unit of cooperative execution. Its record tracks the state
//! machine, the interruption flag, supervision and scope links, and the
//! observers waiting on its outcome.
//!
//! State machine:
//!
//! ```text
//! Created → Running → Suspended → Running …
//!    │         │          │
//!    │         └────┐     │
//!    └──────────────┼─────┴──→ Interrupting → Done(Interrupted)
//!                   └────────────────────────→ Done(outcome)
//! ```
//!
//! Interruption never preempts a running continuation: the flag is observed
//! at dispatch boundaries (and explicit checkpoints), except that a suspended
//! fiber is woken immediately so it cannot stay parked forever.

use crate::types::{FiberId, FiberOutcome, InterruptCause, ScopeId, SuspendReason};
use smallvec::SmallVec;
use std::task::Waker;

/// The lifecycle state of a fiber.
#[derive(Debug, Clone)]
pub enum FiberState {
    /// Forked but not yet dispatched.
    Created,
    /// Admitted to a carrier; its continuation is being (or about to be)
    /// polled.
    Running,
    /// Parked off the ready queue until its wait condition resolves.
    Suspended {
        /// Why the fiber left the ready queue.
        reason: SuspendReason,
    },
    /// Interruption acknowledged; the fiber is unwinding its own scopes.
    Interrupting,
    /// Terminal state; immutable once reached.
    Done(FiberOutcome),
}

impl FiberState {
    /// Returns true if the fiber has reached `Done`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    /// Returns true if the fiber is unwinding after interruption.
    #[must_use]
    pub const fn is_interrupting(&self) -> bool {
        matches!(self, Self::Interrupting)
    }

    /// Returns true if the fiber is parked.
    #[must_use]
    pub const fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended { .. })
    }
}

/// What a `request_interrupt` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptDisposition {
    /// The fiber was already `Done`; the request is a no-op.
    AlreadyDone,
    /// The flag was set (or strengthened); the fiber will observe it at its
    /// next checkpoint.
    Flagged,
    /// The fiber was suspended and must be re-admitted (interrupt lane) to
    /// run its interruption finalization.
    Woken,
}

/// Internal record for a fiber.
#[derive(Debug)]
pub struct FiberRecord {
    /// Unique identifier.
    pub id: FiberId,
    /// Current state.
    pub state: FiberState,
    /// The interruption flag; `Some` once any interrupt was requested.
    pub interrupt: Option<InterruptCause>,
    /// Interrupt mask depth; checkpoints observe the flag only at depth 0.
    pub mask_depth: u32,
    /// Supervising parent, present only under automatic supervision.
    pub parent: Option<FiberId>,
    /// Governing scope tracking this fiber for interrupt-on-close.
    pub scope: Option<ScopeId>,
    /// Scopes created by this fiber, closed LIFO during interrupt unwinding.
    pub owned_scopes: Vec<ScopeId>,
    /// Observers waiting for the outcome; each is woken exactly once.
    pub observers: SmallVec<[Waker; 2]>,
    /// Suspension reason reported by the primitive about to return `Pending`.
    pub pending_reason: Option<SuspendReason>,
    /// Set when a wake arrived while the fiber was being polled; forces an
    /// immediate re-dispatch instead of parking.
    pub repoll: bool,
    /// Set once the interrupt-finalization continuation has replaced the
    /// user continuation.
    pub finalization_installed: bool,
    /// Number of dispatches, for diagnostics.
    pub polls: u64,
}

impl FiberRecord {
    /// Creates a record in the `Created` state with the given wiring.
    #[must_use]
    pub fn new(id: FiberId, parent: Option<FiberId>, scope: Option<ScopeId>) -> Self {
        Self {
            id,
            state: FiberState::Created,
            interrupt: None,
            mask_depth: 0,
            parent,
            scope,
            owned_scopes: Vec::new(),
            observers: SmallVec::new(),
            pending_reason: None,
            repoll: false,
            finalization_installed: false,
            polls: 0,
        }
    }

    /// Returns true if the fiber has reached `Done`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Returns the stored outcome once the fiber is `Done`.
    #[must_use]
    pub fn outcome(&self) -> Option<&FiberOutcome> {
        match &self.state {
            FiberState::Done(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Requests interruption.
    ///
    /// Sets (or strengthens) the flag. A suspended, unmasked fiber
    /// transitions to `Interrupting` immediately and must be re-admitted by
    /// the caller; anyone else observes the flag at their next checkpoint.
    /// Idempotent: repeated requests only merge causes.
    pub fn request_interrupt(&mut self, cause: InterruptCause) -> InterruptDisposition {
        if self.state.is_terminal() {
            return InterruptDisposition::AlreadyDone;
        }

        match &mut self.interrupt {
            Some(existing) => {
                existing.strengthen(&cause);
            }
            None => self.interrupt = Some(cause),
        }

        if self.state.is_suspended() && self.mask_depth == 0 {
            self.state = FiberState::Interrupting;
            InterruptDisposition::Woken
        } else {
            InterruptDisposition::Flagged
        }
    }

    /// Returns true if the next dispatch should divert into interruption
    /// finalization instead of polling the user continuation.
    #[must_use]
    pub fn wants_interrupt(&self) -> bool {
        self.interrupt.is_some()
            && self.mask_depth == 0
            && !self.finalization_installed
            && !self.state.is_terminal()
    }

    /// Acknowledges the pending interrupt at a dispatch checkpoint.
    ///
    /// Transitions to `Interrupting`, marks the finalization continuation as
    /// installed, and returns the cause. Returns `None` if there is nothing
    /// to acknowledge (no flag, masked, already installed, or `Done`).
    pub fn acknowledge_interrupt(&mut self) -> Option<InterruptCause> {
        if !self.wants_interrupt() {
            return None;
        }
        self.state = FiberState::Interrupting;
        self.finalization_installed = true;
        self.interrupt.clone()
    }

    /// Marks the fiber as running for a dispatch.
    ///
    /// `Interrupting` is sticky: an interrupted fiber stays in that state
    /// while its finalization continuation runs. Returns false for `Done`.
    pub fn begin_dispatch(&mut self) -> bool {
        match self.state {
            FiberState::Done(_) => false,
            FiberState::Interrupting => {
                self.polls += 1;
                true
            }
            _ => {
                self.polls += 1;
                self.state = FiberState::Running;
                true
            }
        }
    }

    /// Parks a running fiber with the given reason.
    ///
    /// Returns false (and leaves the state alone) if the fiber is
    /// `Interrupting` or `Done`.
    pub fn suspend(&mut self, reason: SuspendReason) -> bool {
        match self.state {
            FiberState::Running => {
                self.state = FiberState::Suspended { reason };
                true
            }
            _ => false,
        }
    }

    /// Completes the fiber.
    ///
    /// Returns true if the state changed; `Done` is absorbing.
    pub fn complete(&mut self, outcome: FiberOutcome) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = FiberState::Done(outcome);
        true
    }

    /// Registers an observer to be woken when the fiber completes.
    pub fn add_observer(&mut self, waker: &Waker) {
        if !self.observers.iter().any(|w| w.will_wake(waker)) {
            self.observers.push(waker.clone());
        }
    }

    /// Detaches all observers for notification; each is woken exactly once.
    pub fn take_observers(&mut self) -> SmallVec<[Waker; 2]> {
        std::mem::take(&mut self.observers)
    }

    /// Records the reason the current poll is about to suspend with.
    pub fn set_pending_reason(&mut self, reason: SuspendReason) {
        self.pending_reason = Some(reason);
    }

    /// Takes the reported suspension reason, defaulting to `External`.
    pub fn take_pending_reason(&mut self) -> SuspendReason {
        self.pending_reason.take().unwrap_or(SuspendReason::External)
    }

    /// Increments the interrupt mask depth, returning the new depth.
    pub fn increment_mask(&mut self) -> u32 {
        self.mask_depth += 1;
        self.mask_depth
    }

    /// Decrements the interrupt mask depth; `None` if already unmasked.
    pub fn decrement_mask(&mut self) -> Option<u32> {
        if self.mask_depth > 0 {
            self.mask_depth -= 1;
            Some(self.mask_depth)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InterruptKind, Outcome};

    fn record() -> FiberRecord {
        FiberRecord::new(FiberId::new_for_test(0, 0), None, None)
    }

    #[test]
    fn interrupt_before_first_dispatch_is_flagged() {
        let mut fiber = record();
        assert!(matches!(fiber.state, FiberState::Created));
        assert_eq!(
            fiber.request_interrupt(InterruptCause::explicit("stop")),
            InterruptDisposition::Flagged
        );
        assert!(fiber.wants_interrupt());
    }

    #[test]
    fn interrupting_a_suspended_fiber_wakes_it() {
        let mut fiber = record();
        fiber.begin_dispatch();
        assert!(fiber.suspend(SuspendReason::Yielded));

        assert_eq!(
            fiber.request_interrupt(InterruptCause::scope_closed()),
            InterruptDisposition::Woken
        );
        assert!(fiber.state.is_interrupting());
    }

    #[test]
    fn repeated_requests_merge_by_severity() {
        let mut fiber = record();
        fiber.request_interrupt(InterruptCause::explicit("stop"));
        fiber.request_interrupt(InterruptCause::shutdown());
        assert_eq!(
            fiber.interrupt.as_ref().map(|c| c.kind),
            Some(InterruptKind::Shutdown)
        );

        // Weaker follow-up does not downgrade.
        fiber.request_interrupt(InterruptCause::parent_done());
        assert_eq!(
            fiber.interrupt.as_ref().map(|c| c.kind),
            Some(InterruptKind::Shutdown)
        );
    }

    #[test]
    fn done_is_absorbing() {
        let mut fiber = record();
        assert!(fiber.complete(Outcome::Success(())));
        assert!(!fiber.complete(Outcome::Failure(crate::error::Error::ScopeClosed)));
        assert_eq!(
            fiber.request_interrupt(InterruptCause::default()),
            InterruptDisposition::AlreadyDone
        );
        assert!(fiber.outcome().is_some_and(Outcome::is_success));
    }

    #[test]
    fn acknowledge_installs_finalization_once() {
        let mut fiber = record();
        fiber.request_interrupt(InterruptCause::explicit("stop"));

        let cause = fiber.acknowledge_interrupt().expect("flag was set");
        assert_eq!(cause.kind, InterruptKind::Explicit);
        assert!(fiber.state.is_interrupting());
        assert!(fiber.finalization_installed);

        // Second acknowledgement is a no-op.
        assert!(fiber.acknowledge_interrupt().is_none());
    }

    #[test]
    fn mask_defers_acknowledgement() {
        let mut fiber = record();
        fiber.increment_mask();
        fiber.request_interrupt(InterruptCause::explicit("stop"));
        assert!(!fiber.wants_interrupt());
        assert!(fiber.acknowledge_interrupt().is_none());

        assert_eq!(fiber.decrement_mask(), Some(0));
        assert!(fiber.wants_interrupt());
        assert!(fiber.acknowledge_interrupt().is_some());
    }

    #[test]
    fn mask_defers_wake_of_suspended_fiber() {
        let mut fiber = record();
        fiber.begin_dispatch();
        fiber.increment_mask();
        fiber.suspend(SuspendReason::External);

        assert_eq!(
            fiber.request_interrupt(InterruptCause::default()),
            InterruptDisposition::Flagged
        );
        assert!(fiber.state.is_suspended());
    }

    #[test]
    fn suspend_only_from_running() {
        let mut fiber = record();
        assert!(!fiber.suspend(SuspendReason::Yielded));

        fiber.begin_dispatch();
        assert!(fiber.suspend(SuspendReason::Awaiting(FiberId::new_for_test(1, 0))));
        match fiber.state {
            FiberState::Suspended { reason } => {
                assert_eq!(reason, SuspendReason::Awaiting(FiberId::new_for_test(1, 0)));
            }
            ref other => panic!("expected Suspended, got {other:?}"),
        }
    }

    #[test]
    fn interrupting_state_survives_dispatch_and_suspend() {
        let mut fiber = record();
        fiber.request_interrupt(InterruptCause::default());
        fiber.acknowledge_interrupt();

        assert!(fiber.begin_dispatch());
        assert!(fiber.state.is_interrupting());
        assert!(!fiber.suspend(SuspendReason::External));
        assert!(fiber.state.is_interrupting());
    }

    #[test]
    fn pending_reason_defaults_to_external() {
        let mut fiber = record();
        assert_eq!(fiber.take_pending_reason(), SuspendReason::External);

        fiber.set_pending_reason(SuspendReason::Yielded);
        assert_eq!(fiber.take_pending_reason(), SuspendReason::Yielded);
        assert_eq!(fiber.take_pending_reason(), SuspendReason::External);
    }

    #[test]
    fn observers_deduplicate_by_will_wake() {
        use std::sync::Arc;
        use std::task::Wake;

        struct Noop;
        impl Wake for Noop {
            fn wake(self: Arc<Self>) {}
        }

        let mut fiber = record();
        let waker = std::task::Waker::from(Arc::new(Noop));
        fiber.add_observer(&waker);
        fiber.add_observer(&waker);
        assert_eq!(fiber.take_observers().len(), 1);
        assert!(fiber.take_observers().is_empty());
    }
}
