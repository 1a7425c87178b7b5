//! Shared runtime state.
//!
//! One `RuntimeState` holds the fiber and scope arenas, the supervision
//! registry, the stored continuations, and the clock. Carriers mutate it
//! under a single lock; every method here is a short critical section that
//! never calls user code.

use crate::error::Error;
use crate::record::{FiberRecord, FiberState, InterruptDisposition, ScopeRecord, ScopeRole, ScopeState};
use crate::runtime::stored::StoredFiber;
use crate::supervision::Supervisor;
use crate::types::{
    FiberId, FiberOutcome, ForkLinks, ForkPolicy, InterruptCause, Outcome, ScopeId, Time,
};
use crate::util::Arena;
use serde::Serialize;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::task::Waker;
use tracing::{debug, trace};

/// Deferred side effects of a fiber completing.
///
/// Collected under the state lock and applied after it is released: wakers
/// are woken and interrupted children are admitted to the interrupt lane.
#[derive(Debug, Default)]
pub(crate) struct CompletionEffects {
    /// Observers of the completed fiber.
    pub observers: SmallVec<[Waker; 2]>,
    /// Supervised children that transitioned to `Interrupting` and must be
    /// re-admitted.
    pub interrupts: Vec<FiberId>,
    /// Close callers parked on a scope this completion finished draining.
    pub scope_wakers: SmallVec<[Waker; 2]>,
    /// A continuation displaced by the completion, dropped outside the lock.
    pub dropped: Option<StoredFiber>,
}

/// Counts of fibers by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FiberTally {
    /// Forked but not yet dispatched.
    pub created: usize,
    /// Admitted to a carrier.
    pub running: usize,
    /// Parked off the ready queue.
    pub suspended: usize,
    /// Unwinding after interruption.
    pub interrupting: usize,
    /// Done with a success outcome.
    pub succeeded: usize,
    /// Done with a failure outcome.
    pub failed: usize,
    /// Done with an interrupted outcome.
    pub interrupted: usize,
}

impl FiberTally {
    /// Returns the number of fibers that have not reached `Done`.
    #[must_use]
    pub const fn live(&self) -> usize {
        self.created + self.running + self.suspended + self.interrupting
    }
}

/// Counts of scopes by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScopeTally {
    /// Accepting work.
    pub open: usize,
    /// Waiting out attached fibers.
    pub draining: usize,
    /// Running finalizers.
    pub finalizing: usize,
    /// Terminal.
    pub closed: usize,
}

/// A point-in-time view of the runtime, for diagnostics and tests.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeSnapshot {
    /// The clock at snapshot time, in nanoseconds.
    pub now_nanos: u64,
    /// Fiber counts by state.
    pub fibers: FiberTally,
    /// Scope counts by state.
    pub scopes: ScopeTally,
}

/// The record store behind one runtime instance.
#[derive(Debug)]
pub struct RuntimeState {
    fibers: Arena<FiberRecord>,
    scopes: Arena<ScopeRecord>,
    supervisor: Supervisor,
    stored: HashMap<FiberId, StoredFiber>,
    global_scope: ScopeId,
    /// The runtime clock. Virtual under the deterministic executor,
    /// monotonic-anchored under the threaded runtime.
    pub now: Time,
}

impl RuntimeState {
    /// Creates a fresh state with its global scope already open.
    ///
    /// The global scope exists for the whole life of the runtime; it is
    /// closed only by shutdown.
    #[must_use]
    pub fn new() -> Self {
        let mut scopes = Arena::new();
        let index = scopes
            .insert_with(|i| ScopeRecord::new(ScopeId::from_arena(i), ScopeRole::Global, None, None));
        Self {
            fibers: Arena::new(),
            scopes,
            supervisor: Supervisor::new(),
            stored: HashMap::new(),
            global_scope: ScopeId::from_arena(index),
            now: Time::ZERO,
        }
    }

    /// Returns the global scope id.
    #[must_use]
    pub fn global_scope(&self) -> ScopeId {
        self.global_scope
    }

    /// Returns the fiber record for `id`.
    #[must_use]
    pub fn fiber(&self, id: FiberId) -> Option<&FiberRecord> {
        self.fibers.get(id.arena_index())
    }

    /// Returns the fiber record for `id` mutably.
    pub fn fiber_mut(&mut self, id: FiberId) -> Option<&mut FiberRecord> {
        self.fibers.get_mut(id.arena_index())
    }

    /// Returns the scope record for `id`.
    #[must_use]
    pub fn scope(&self, id: ScopeId) -> Option<&ScopeRecord> {
        self.scopes.get(id.arena_index())
    }

    /// Returns the scope record for `id` mutably.
    pub fn scope_mut(&mut self, id: ScopeId) -> Option<&mut ScopeRecord> {
        self.scopes.get_mut(id.arena_index())
    }

    /// Returns the supervision registry.
    #[must_use]
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Resolves a fork call into parent/scope wiring.
    ///
    /// Resolution is a pure function of the entry point plus, for scoped
    /// forks, the ambient scope captured at the call site. A supervised fork
    /// from outside any fiber falls back to the global scope so shutdown
    /// still bounds it.
    #[must_use]
    pub fn resolve_fork(
        &self,
        policy: ForkPolicy,
        forker: Option<FiberId>,
        ambient: Option<ScopeId>,
    ) -> ForkLinks {
        match policy {
            ForkPolicy::Supervised => match forker {
                Some(parent) => ForkLinks {
                    parent: Some(parent),
                    scope: None,
                },
                None => ForkLinks {
                    parent: None,
                    scope: Some(self.global_scope),
                },
            },
            ForkPolicy::Daemon => ForkLinks {
                parent: None,
                scope: Some(self.global_scope),
            },
            ForkPolicy::Scoped => ForkLinks {
                parent: None,
                scope: Some(ambient.unwrap_or(self.global_scope)),
            },
            ForkPolicy::Into(scope) => ForkLinks {
                parent: None,
                scope: Some(scope),
            },
        }
    }

    /// Creates a fiber record wired per `links`.
    ///
    /// Attachment and supervision registration happen atomically with
    /// creation, under the same lock, so a closing scope can never race a
    /// fork into it.
    pub fn create_fiber(&mut self, policy: ForkPolicy, links: ForkLinks) -> Result<FiberId, Error> {
        if let Some(scope_id) = links.scope {
            let scope = self
                .scopes
                .get(scope_id.arena_index())
                .ok_or(Error::NoSuchScope(scope_id))?;
            if !scope.state.is_open() {
                return Err(Error::ScopeClosed);
            }
        }

        let index = self.fibers.insert_with(|i| {
            FiberRecord::new(FiberId::from_arena(i), links.parent, links.scope)
        });
        let id = FiberId::from_arena(index);

        if let Some(scope_id) = links.scope {
            if let Some(scope) = self.scopes.get_mut(scope_id.arena_index()) {
                scope.attach(id);
            }
        }
        if let Some(parent) = links.parent {
            self.supervisor.register_child(parent, id, policy);
        }

        debug!(fiber = %id, %policy, "fiber forked");
        Ok(id)
    }

    /// Creates a scope record.
    ///
    /// If `owner` is a live fiber, the scope joins its owned list and will
    /// be closed during the owner's interrupt unwinding.
    pub fn create_scope(
        &mut self,
        role: ScopeRole,
        parent: Option<ScopeId>,
        owner: Option<FiberId>,
    ) -> ScopeId {
        let index = self
            .scopes
            .insert_with(|i| ScopeRecord::new(ScopeId::from_arena(i), role, parent, owner));
        let id = ScopeId::from_arena(index);
        if let Some(owner_id) = owner {
            if let Some(fiber) = self.fibers.get_mut(owner_id.arena_index()) {
                fiber.owned_scopes.push(id);
            }
        }
        debug!(scope = %id, %role, "scope created");
        id
    }

    /// Stores a fiber's continuation.
    pub fn store_continuation(&mut self, id: FiberId, stored: StoredFiber) {
        self.stored.insert(id, stored);
    }

    /// Takes a fiber's continuation out for polling.
    ///
    /// Absence means the fiber is terminal or currently on another carrier.
    pub fn take_continuation(&mut self, id: FiberId) -> Option<StoredFiber> {
        self.stored.remove(&id)
    }

    /// Requests interruption of a fiber.
    ///
    /// Never blocks. Returns the record-level disposition, or `None` if the
    /// fiber is unknown.
    pub fn request_interrupt(
        &mut self,
        id: FiberId,
        cause: InterruptCause,
    ) -> Option<InterruptDisposition> {
        let fiber = self.fibers.get_mut(id.arena_index())?;
        let disposition = fiber.request_interrupt(cause);
        trace!(fiber = %id, ?disposition, "interrupt requested");
        Some(disposition)
    }

    /// Marks a fiber `Done` and collects the deferred side effects.
    ///
    /// Exactly-once: a second completion of the same fiber yields empty
    /// effects. The supervisor cascade only *requests* interruption of
    /// children; it never waits for them.
    pub(crate) fn fiber_completed(
        &mut self,
        id: FiberId,
        outcome: FiberOutcome,
    ) -> CompletionEffects {
        let mut effects = CompletionEffects::default();

        let Some(fiber) = self.fibers.get_mut(id.arena_index()) else {
            return effects;
        };
        if !fiber.complete(outcome) {
            return effects;
        }
        effects.observers = fiber.take_observers();
        let governing_scope = fiber.scope;
        effects.dropped = self.stored.remove(&id);

        debug!(fiber = %id, "fiber done");

        // Supervision cascade: children of a Done parent may not keep running.
        for child in self.supervisor.parent_done(id) {
            if let Some(record) = self.fibers.get_mut(child.arena_index()) {
                match record.request_interrupt(InterruptCause::parent_done()) {
                    InterruptDisposition::Woken => effects.interrupts.push(child),
                    InterruptDisposition::Flagged | InterruptDisposition::AlreadyDone => {}
                }
            }
        }
        self.supervisor.child_done(id);

        // Detach from the governing scope; a drained scope releases its
        // parked closers.
        if let Some(scope_id) = governing_scope {
            if let Some(scope) = self.scopes.get_mut(scope_id.arena_index()) {
                scope.detach(id);
                if scope.state == ScopeState::Draining && !scope.has_attached() {
                    effects.scope_wakers = std::mem::take(&mut scope.close_wakers);
                }
            }
        }

        effects
    }

    /// Returns true if every fiber has reached `Done`.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.fibers.iter().all(|(_, f)| f.is_terminal())
    }

    /// Returns the fibers that have not reached `Done`, for leak reporting.
    #[must_use]
    pub fn leaked_fibers(&self) -> Vec<FiberId> {
        self.fibers
            .iter()
            .filter(|(_, f)| !f.is_terminal())
            .map(|(_, f)| f.id)
            .collect()
    }

    /// Takes a point-in-time tally of fibers and scopes.
    #[must_use]
    pub fn snapshot(&self) -> RuntimeSnapshot {
        let mut fibers = FiberTally::default();
        for (_, fiber) in self.fibers.iter() {
            match &fiber.state {
                FiberState::Created => fibers.created += 1,
                FiberState::Running => fibers.running += 1,
                FiberState::Suspended { .. } => fibers.suspended += 1,
                FiberState::Interrupting => fibers.interrupting += 1,
                FiberState::Done(Outcome::Success(())) => fibers.succeeded += 1,
                FiberState::Done(Outcome::Failure(_)) => fibers.failed += 1,
                FiberState::Done(Outcome::Interrupted(_)) => fibers.interrupted += 1,
            }
        }

        let mut scopes = ScopeTally::default();
        for (_, scope) in self.scopes.iter() {
            match scope.state {
                ScopeState::Open => scopes.open += 1,
                ScopeState::Draining => scopes.draining += 1,
                ScopeState::Finalizing => scopes.finalizing += 1,
                ScopeState::Closed => scopes.closed += 1,
            }
        }

        RuntimeSnapshot {
            now_nanos: self.now.as_nanos(),
            fibers,
            scopes,
        }
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::task::Wake;

    struct NoopWaker;
    impl Wake for NoopWaker {
        fn wake(self: Arc<Self>) {}
    }

    fn waker() -> Waker {
        Waker::from(Arc::new(NoopWaker))
    }

    fn fork(state: &mut RuntimeState, policy: ForkPolicy, forker: Option<FiberId>) -> FiberId {
        let links = state.resolve_fork(policy, forker, None);
        state.create_fiber(policy, links).expect("fork failed")
    }

    #[test]
    fn new_state_has_open_global_scope() {
        let state = RuntimeState::new();
        let global = state.scope(state.global_scope()).expect("global scope");
        assert_eq!(global.role, ScopeRole::Global);
        assert!(global.state.is_open());
        assert!(state.is_quiescent());
    }

    #[test]
    fn resolution_follows_the_policy_table() {
        let mut state = RuntimeState::new();
        let parent = fork(&mut state, ForkPolicy::Daemon, None);
        let ambient = state.create_scope(ScopeRole::Local, None, None);

        let supervised = state.resolve_fork(ForkPolicy::Supervised, Some(parent), Some(ambient));
        assert_eq!(supervised.parent, Some(parent));
        assert_eq!(supervised.scope, None);

        let daemon = state.resolve_fork(ForkPolicy::Daemon, Some(parent), Some(ambient));
        assert_eq!(daemon.parent, None);
        assert_eq!(daemon.scope, Some(state.global_scope()));

        let scoped = state.resolve_fork(ForkPolicy::Scoped, Some(parent), Some(ambient));
        assert_eq!(scoped.scope, Some(ambient));

        let scoped_no_ambient = state.resolve_fork(ForkPolicy::Scoped, Some(parent), None);
        assert_eq!(scoped_no_ambient.scope, Some(state.global_scope()));

        let targeted = state.resolve_fork(ForkPolicy::Into(ambient), Some(parent), None);
        assert_eq!(targeted.parent, None);
        assert_eq!(targeted.scope, Some(ambient));
    }

    #[test]
    fn supervised_fork_outside_any_fiber_falls_back_to_global() {
        let state = RuntimeState::new();
        let links = state.resolve_fork(ForkPolicy::Supervised, None, None);
        assert_eq!(links.parent, None);
        assert_eq!(links.scope, Some(state.global_scope()));
    }

    #[test]
    fn fork_into_closing_scope_fails() {
        let mut state = RuntimeState::new();
        let scope = state.create_scope(ScopeRole::Explicit, None, None);
        state
            .scope_mut(scope)
            .unwrap()
            .begin_drain(InterruptCause::scope_closed());

        let links = state.resolve_fork(ForkPolicy::Into(scope), None, None);
        match state.create_fiber(ForkPolicy::Into(scope), links) {
            Err(Error::ScopeClosed) => {}
            other => panic!("expected ScopeClosed, got {other:?}"),
        }
    }

    #[test]
    fn completion_interrupts_supervised_children() {
        let mut state = RuntimeState::new();
        let parent = fork(&mut state, ForkPolicy::Daemon, None);
        let links = state.resolve_fork(ForkPolicy::Supervised, Some(parent), None);
        let child = state
            .create_fiber(ForkPolicy::Supervised, links)
            .expect("fork failed");

        // Park the child so the cascade has to wake it.
        let record = state.fiber_mut(child).unwrap();
        record.begin_dispatch();
        record.suspend(crate::types::SuspendReason::External);

        let effects = state.fiber_completed(parent, Outcome::Success(()));
        assert_eq!(effects.interrupts, vec![child]);
        assert!(state.fiber(child).unwrap().state.is_interrupting());
    }

    #[test]
    fn completion_does_not_touch_daemon_children() {
        let mut state = RuntimeState::new();
        let parent = fork(&mut state, ForkPolicy::Daemon, None);
        let daemon = fork(&mut state, ForkPolicy::Daemon, Some(parent));

        let effects = state.fiber_completed(parent, Outcome::Success(()));
        assert!(effects.interrupts.is_empty());
        assert!(state.fiber(daemon).unwrap().interrupt.is_none());
    }

    #[test]
    fn completion_is_exactly_once() {
        let mut state = RuntimeState::new();
        let fiber = fork(&mut state, ForkPolicy::Daemon, None);
        state.fiber_mut(fiber).unwrap().add_observer(&waker());

        let first = state.fiber_completed(fiber, Outcome::Success(()));
        assert_eq!(first.observers.len(), 1);

        let second = state.fiber_completed(fiber, Outcome::Success(()));
        assert!(second.observers.is_empty());
    }

    #[test]
    fn completion_releases_a_drained_scope() {
        let mut state = RuntimeState::new();
        let scope = state.create_scope(ScopeRole::Local, None, None);
        let links = state.resolve_fork(ForkPolicy::Into(scope), None, None);
        let fiber = state
            .create_fiber(ForkPolicy::Into(scope), links)
            .expect("fork failed");

        state
            .scope_mut(scope)
            .unwrap()
            .begin_drain(InterruptCause::scope_closed());
        state.scope_mut(scope).unwrap().add_close_waker(&waker());

        let effects = state.fiber_completed(fiber, Outcome::Success(()));
        assert_eq!(effects.scope_wakers.len(), 1);
        assert!(!state.scope(scope).unwrap().has_attached());
    }

    #[test]
    fn owned_scopes_register_on_their_owner() {
        let mut state = RuntimeState::new();
        let owner = fork(&mut state, ForkPolicy::Daemon, None);
        let a = state.create_scope(ScopeRole::Local, None, Some(owner));
        let b = state.create_scope(ScopeRole::Local, None, Some(owner));

        assert_eq!(state.fiber(owner).unwrap().owned_scopes, vec![a, b]);
    }

    #[test]
    fn snapshot_tallies_by_state() {
        let mut state = RuntimeState::new();
        let a = fork(&mut state, ForkPolicy::Daemon, None);
        let _b = fork(&mut state, ForkPolicy::Daemon, None);
        state.fiber_completed(a, Outcome::Success(()));

        let snapshot = state.snapshot();
        assert_eq!(snapshot.fibers.succeeded, 1);
        assert_eq!(snapshot.fibers.created, 1);
        assert_eq!(snapshot.fibers.live(), 1);
        assert_eq!(snapshot.scopes.open, 1);
        assert_eq!(state.leaked_fibers().len(), 1);
        assert!(!state.is_quiescent());
    }
}
