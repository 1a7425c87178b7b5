//! Scope handles and the close protocol.
//!
//! A [`ScopeHandle`] is the public face of a scope: finalizer registration,
//! closing, and targeted forks go through it. [`CloseScope`] drives the
//! close sequence as a future so it can be awaited from inside a fiber, from
//! `block_on`, or from an interrupted fiber's unwinding, all through the
//! same code path:
//!
//! 1. interrupt every still-attached fiber and wait for all of them,
//! 2. run finalizers in reverse registration order, collecting failures,
//! 3. mark the scope closed and store the aggregated outcome.
//!
//! Only the first closer executes the sequence; concurrent closers park and
//! receive the identical stored outcome. If the driving future is dropped
//! mid-protocol, recovery hands the remaining work to a daemon fiber so the
//! exactly-once finalizer guarantee survives the driver's death.

use crate::error::Error;
use crate::record::{Finalizer, InterruptDisposition, ScopeRole, ScopeState};
use crate::runtime::shared::Shared;
use crate::types::{FiberId, FiberOutcome, ForkPolicy, InterruptCause, Outcome, ScopeId};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use tracing::{debug, error, warn};

/// A handle to a scope.
///
/// Handles are cheap to clone and carry no ownership: a scope lives until
/// it is closed, regardless of how many handles exist.
#[derive(Clone)]
pub struct ScopeHandle {
    scope: ScopeId,
    shared: Arc<Shared>,
}

impl ScopeHandle {
    pub(crate) fn new(scope: ScopeId, shared: Arc<Shared>) -> Self {
        Self { scope, shared }
    }

    /// Returns the scope id.
    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.scope
    }

    /// Returns true if the scope has begun (or finished) closing.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.shared
            .state
            .lock()
            .scope(self.scope)
            .is_none_or(|s| s.state.is_closing())
    }

    /// Registers a finalizer to run when the scope closes.
    ///
    /// Finalizers run in reverse registration order. If the scope has
    /// already begun closing, the action runs immediately on the caller and
    /// `ScopeClosed` is returned: a finalizer always runs, even late.
    pub fn add_finalizer<F>(&self, f: F) -> Result<(), Error>
    where
        F: FnOnce() -> Result<(), Error> + Send + 'static,
    {
        let rejected = {
            let mut state = self.shared.state.lock();
            let Some(scope) = state.scope_mut(self.scope) else {
                return Err(Error::NoSuchScope(self.scope));
            };
            scope.add_finalizer(Finalizer::sync(f)).err()
        };
        match rejected {
            None => Ok(()),
            Some(Finalizer::Sync(f)) => {
                if let Err(e) = f() {
                    warn!(scope = %self.scope, error = %e, "late finalizer failed");
                }
                Err(Error::ScopeClosed)
            }
            Some(Finalizer::Async(_)) => unreachable!("registered a sync finalizer"),
        }
    }

    /// Registers an asynchronous finalizer to run when the scope closes.
    ///
    /// If the scope has already begun closing, the future is handed to a
    /// daemon fiber so it still runs, and `ScopeClosed` is returned.
    pub fn add_async_finalizer<Fut>(&self, future: Fut) -> Result<(), Error>
    where
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let rejected = {
            let mut state = self.shared.state.lock();
            let Some(scope) = state.scope_mut(self.scope) else {
                return Err(Error::NoSuchScope(self.scope));
            };
            scope.add_finalizer(Finalizer::asynchronous(future)).err()
        };
        match rejected {
            None => Ok(()),
            Some(Finalizer::Async(fut)) => {
                let spawned = self.shared.fork_with::<_, _, ()>(
                    ForkPolicy::Daemon,
                    None,
                    None,
                    move |_cx| async move {
                        fut.await?;
                        Ok(())
                    },
                );
                if spawned.is_err() {
                    warn!(scope = %self.scope, "late async finalizer dropped at shutdown");
                }
                Err(Error::ScopeClosed)
            }
            Some(Finalizer::Sync(_)) => unreachable!("registered an async finalizer"),
        }
    }

    /// Closes the scope.
    ///
    /// Idempotent: the first caller drives the close; later (or concurrent)
    /// callers wait for the same completion and receive the identical
    /// stored aggregated outcome.
    #[must_use]
    pub fn close(&self) -> CloseScope {
        CloseScope::new(self.shared.clone(), self.scope)
    }
}

impl std::fmt::Debug for ScopeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeHandle")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

type BoxedFinalizer = Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>;

enum ClosePhase {
    /// Not yet engaged with the scope.
    Start,
    /// Drain in progress (ours or another closer's); parked on the scope.
    Waiting,
    /// We won the finalizing transition and drive the finalizer stack.
    Finalizing { current: Option<BoxedFinalizer> },
    /// Outcome delivered.
    Complete,
}

enum Advance {
    Ready(FiberOutcome),
    Parked,
    Finalize,
}

/// Future driving a scope's close sequence. Created by [`ScopeHandle::close`].
pub struct CloseScope {
    shared: Arc<Shared>,
    scope: ScopeId,
    phase: ClosePhase,
    initiated: bool,
}

impl CloseScope {
    pub(crate) fn new(shared: Arc<Shared>, scope: ScopeId) -> Self {
        Self {
            shared,
            scope,
            phase: ClosePhase::Start,
            initiated: false,
        }
    }

    /// Engages the scope: initiates the drain if the scope is still open,
    /// then either parks, wins the finalizing transition, or observes the
    /// stored outcome.
    fn try_advance(&mut self, waker: &Waker) -> Advance {
        let mut to_wake: Vec<FiberId> = Vec::new();
        let advance = {
            let mut state = self.shared.state.lock();

            let drain = match state.scope_mut(self.scope) {
                None => return Advance::Ready(Outcome::Failure(Error::NoSuchScope(self.scope))),
                Some(scope) if scope.state == ScopeState::Open => {
                    let cause = if scope.role == ScopeRole::Global {
                        InterruptCause::shutdown()
                    } else {
                        InterruptCause::scope_closed()
                    };
                    scope.begin_drain(cause.clone()).map(|fibers| (cause, fibers))
                }
                Some(_) => None,
            };
            if let Some((cause, fibers)) = drain {
                self.initiated = true;
                debug!(scope = %self.scope, fibers = fibers.len(), "scope close begun");
                for fiber in fibers {
                    if state.request_interrupt(fiber, cause.clone())
                        == Some(InterruptDisposition::Woken)
                    {
                        to_wake.push(fiber);
                    }
                }
            }

            let Some(scope) = state.scope_mut(self.scope) else {
                return Advance::Ready(Outcome::Failure(Error::NoSuchScope(self.scope)));
            };
            match scope.state {
                ScopeState::Open => {
                    // Lost a race with scope creation bookkeeping; park.
                    scope.add_close_waker(waker);
                    Advance::Parked
                }
                ScopeState::Draining => {
                    if scope.begin_finalize() {
                        Advance::Finalize
                    } else {
                        scope.add_close_waker(waker);
                        Advance::Parked
                    }
                }
                ScopeState::Finalizing => {
                    scope.add_close_waker(waker);
                    Advance::Parked
                }
                ScopeState::Closed => {
                    Advance::Ready(scope.close_outcome.clone().unwrap_or(Outcome::Success(())))
                }
            }
        };
        for fiber in to_wake {
            self.shared.schedule_interrupt(fiber);
        }
        advance
    }

    /// Runs the finalizer stack: sync finalizers inline, async ones awaited,
    /// failures collected on the record. Returns the aggregated outcome once
    /// the stack is empty.
    fn drive_finalizers(&mut self, cx: &mut Context<'_>) -> Poll<FiberOutcome> {
        let ClosePhase::Finalizing { current } = &mut self.phase else {
            return Poll::Ready(Outcome::Failure(Error::Internal("not finalizing")));
        };

        loop {
            if let Some(fut) = current {
                match fut.as_mut().poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(result) => {
                        *current = None;
                        if let Err(e) = result {
                            record_finalizer_error(&self.shared, self.scope, e);
                        }
                    }
                }
            }

            let next = {
                let mut state = self.shared.state.lock();
                state
                    .scope_mut(self.scope)
                    .and_then(|s| s.finalizers.pop())
            };
            match next {
                Some(Finalizer::Sync(f)) => {
                    if let Err(e) = f() {
                        record_finalizer_error(&self.shared, self.scope, e);
                    }
                }
                Some(Finalizer::Async(fut)) => *current = Some(fut),
                None => break,
            }
        }

        let outcome = complete_scope(&self.shared, self.scope);
        self.phase = ClosePhase::Complete;
        Poll::Ready(outcome)
    }
}

impl Future for CloseScope {
    type Output = FiberOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match this.phase {
                ClosePhase::Start | ClosePhase::Waiting => match this.try_advance(cx.waker()) {
                    Advance::Ready(outcome) => {
                        this.phase = ClosePhase::Complete;
                        return Poll::Ready(outcome);
                    }
                    Advance::Parked => {
                        this.phase = ClosePhase::Waiting;
                        return Poll::Pending;
                    }
                    Advance::Finalize => {
                        this.phase = ClosePhase::Finalizing { current: None };
                    }
                },
                ClosePhase::Finalizing { .. } => return this.drive_finalizers(cx),
                ClosePhase::Complete => {
                    // Repolled after delivery: hand back the stored outcome.
                    let outcome = this
                        .shared
                        .state
                        .lock()
                        .scope(this.scope)
                        .and_then(|s| s.close_outcome.clone())
                        .unwrap_or(Outcome::Success(()));
                    return Poll::Ready(outcome);
                }
            }
        }
    }
}

impl Drop for CloseScope {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.phase, ClosePhase::Complete) {
            ClosePhase::Finalizing { current } => {
                // The driver died mid-finalize (typically: the closing fiber
                // was itself interrupted). The remaining finalizers must
                // still run exactly once, so the scope reverts to Draining
                // and the work is handed off.
                let waiters = {
                    let mut state = self.shared.state.lock();
                    let Some(scope) = state.scope_mut(self.scope) else {
                        return;
                    };
                    if let Some(fut) = current {
                        scope.finalizers.push(Finalizer::Async(fut));
                    }
                    scope.abandon_finalize();
                    std::mem::take(&mut scope.close_wakers)
                };
                if waiters.is_empty() {
                    spawn_recovery_closer(&self.shared, self.scope);
                } else {
                    for waker in waiters {
                        waker.wake();
                    }
                }
            }
            ClosePhase::Waiting if self.initiated => {
                // We started the drain but will not see it through; make
                // sure somebody does.
                spawn_recovery_closer(&self.shared, self.scope);
            }
            _ => {}
        }
    }
}

fn record_finalizer_error(shared: &Arc<Shared>, scope: ScopeId, error: Error) {
    warn!(scope = %scope, error = %error, "finalizer failed");
    if let Some(record) = shared.state.lock().scope_mut(scope) {
        record.close_errors.push(error);
    }
}

/// Aggregates collected failures, marks the scope closed, and wakes parked
/// closers.
fn complete_scope(shared: &Arc<Shared>, scope: ScopeId) -> FiberOutcome {
    let (outcome, wakers) = {
        let mut state = shared.state.lock();
        let Some(record) = state.scope_mut(scope) else {
            return Outcome::Failure(Error::NoSuchScope(scope));
        };
        let errors = std::mem::take(&mut record.close_errors);
        let outcome = match Error::aggregate_finalizer_failures(errors) {
            None => Outcome::Success(()),
            Some(composite) => Outcome::Failure(composite),
        };
        let wakers = record.complete_close(outcome.clone()).unwrap_or_default();
        (outcome, wakers)
    };
    debug!(scope = %scope, success = outcome.is_success(), "scope closed");
    for waker in wakers {
        waker.wake();
    }
    outcome
}

/// Hands an abandoned close to a daemon fiber; falls back to a bounded
/// inline recovery when the runtime no longer accepts daemons.
fn spawn_recovery_closer(shared: &Arc<Shared>, scope: ScopeId) {
    let shared_for_fiber = shared.clone();
    let spawned = shared.fork_with::<_, _, ()>(ForkPolicy::Daemon, None, None, move |_cx| {
        let close = CloseScope::new(shared_for_fiber, scope);
        async move {
            let _ = close.await;
            Ok(())
        }
    });
    if spawned.is_err() {
        inline_recover(shared, scope);
    }
}

/// Last-resort recovery when no daemon can be spawned: sync finalizers run
/// to completion, async finalizers get a single poll and are abandoned with
/// an error if still pending.
fn inline_recover(shared: &Arc<Shared>, scope: ScopeId) {
    struct NoopWake;
    impl std::task::Wake for NoopWake {
        fn wake(self: Arc<Self>) {}
    }

    let won = shared
        .state
        .lock()
        .scope_mut(scope)
        .is_some_and(|s| s.begin_finalize());
    if !won {
        return;
    }

    let waker = Waker::from(Arc::new(NoopWake));
    let mut cx = Context::from_waker(&waker);
    loop {
        let next = {
            let mut state = shared.state.lock();
            state.scope_mut(scope).and_then(|s| s.finalizers.pop())
        };
        match next {
            Some(Finalizer::Sync(f)) => {
                if let Err(e) = f() {
                    record_finalizer_error(shared, scope, e);
                }
            }
            Some(Finalizer::Async(mut fut)) => match fut.as_mut().poll(&mut cx) {
                Poll::Ready(Err(e)) => record_finalizer_error(shared, scope, e),
                Poll::Ready(Ok(())) => {}
                Poll::Pending => {
                    error!(scope = %scope, "async finalizer abandoned in bounded recovery");
                    record_finalizer_error(
                        shared,
                        scope,
                        Error::Internal("async finalizer abandoned"),
                    );
                }
            },
            None => break,
        }
    }
    let _ = complete_scope(shared, scope);
}
