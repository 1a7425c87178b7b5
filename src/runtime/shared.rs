//! The shared heart of the runtime.
//!
//! `Shared` bundles the record store, the ready queue, the timer heap, and
//! the clock behind one `Arc`. Both drivers (the deterministic executor and
//! the threaded runtime's workers) funnel every fiber step through
//! [`Shared::dispatch`], so the cooperative contract holds identically under
//! one carrier or many:
//!
//! - a continuation is polled by at most one carrier at a time,
//! - interruption is observed only at dispatch boundaries (checkpoints),
//! - a freshly forked fiber is enqueued, never run inline, so it cannot
//!   start before its forker suspends, yields, or completes.
//!
//! Lock order: `state` before `queue`; the timer heap is never held across
//! a wake.

use crate::cx::scope::CloseScope;
use crate::cx::Cx;
use crate::error::Error;
use crate::record::InterruptDisposition;
use crate::runtime::handle::FiberHandle;
use crate::runtime::queue::ReadyQueue;
use crate::runtime::state::{CompletionEffects, RuntimeState};
use crate::runtime::stored::{CatchUnwind, StoredFiber};
use crate::runtime::timer::TimerHeap;
use crate::runtime::waker::fiber_waker;
use crate::types::{FiberId, ForkPolicy, InterruptCause, Outcome, ScopeId, Time};
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tracing::{debug, trace};

/// Where the runtime clock comes from.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ClockSource {
    /// Virtual time, advanced explicitly by the deterministic executor.
    Virtual,
    /// Monotonic time anchored at runtime start.
    Monotonic(Instant),
}

/// Which lane a deferred re-admission should use.
enum Lane {
    Ready,
    Interrupt,
}

/// Shared runtime internals.
pub(crate) struct Shared {
    /// The record store. Short critical sections only.
    pub(crate) state: Mutex<RuntimeState>,
    /// The two-lane ready queue.
    pub(crate) queue: Mutex<ReadyQueue>,
    /// Worker parking, paired with `queue`.
    pub(crate) idle: Condvar,
    /// Sleep deadlines.
    pub(crate) timers: Mutex<TimerHeap>,
    /// Timer-driver parking, paired with `timers`.
    pub(crate) timer_idle: Condvar,
    /// Clock source for `now`.
    pub(crate) clock: ClockSource,
    /// Set once shutdown completed; new forks are refused.
    pub(crate) shutdown: AtomicBool,
}

impl Shared {
    /// Creates the shared internals with a fresh state.
    pub(crate) fn new(clock: ClockSource) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RuntimeState::new()),
            queue: Mutex::new(ReadyQueue::new()),
            idle: Condvar::new(),
            timers: Mutex::new(TimerHeap::new()),
            timer_idle: Condvar::new(),
            clock,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Returns the current runtime time.
    pub(crate) fn now(&self) -> Time {
        match self.clock {
            ClockSource::Virtual => self.state.lock().now,
            ClockSource::Monotonic(start) => {
                Time::from_nanos(u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX))
            }
        }
    }

    /// Returns the current time given an already-held state lock.
    pub(crate) fn now_with(&self, state: &RuntimeState) -> Time {
        match self.clock {
            ClockSource::Virtual => state.now,
            ClockSource::Monotonic(start) => {
                Time::from_nanos(u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX))
            }
        }
    }

    /// Returns the global scope id.
    pub(crate) fn global_scope(&self) -> ScopeId {
        self.state.lock().global_scope()
    }

    /// Admits a fiber to the ready queue (interrupt lane if it is
    /// unwinding). At most one admission per suspension: duplicates are
    /// dropped by the queue's membership set.
    pub(crate) fn schedule(&self, fiber: FiberId) {
        let interrupting = {
            let state = self.state.lock();
            state
                .fiber(fiber)
                .is_some_and(|f| f.state.is_interrupting() || f.finalization_installed)
        };
        let mut queue = self.queue.lock();
        let admitted = if interrupting {
            queue.push_interrupt(fiber)
        } else {
            queue.push(fiber)
        };
        if admitted {
            self.idle.notify_one();
        }
    }

    /// Admits a fiber directly to the interrupt lane.
    pub(crate) fn schedule_interrupt(&self, fiber: FiberId) {
        let mut queue = self.queue.lock();
        if queue.push_interrupt(fiber) {
            self.idle.notify_one();
        }
    }

    /// Requests interruption of a fiber, waking it if it was suspended.
    pub(crate) fn interrupt_fiber(&self, fiber: FiberId, cause: InterruptCause) {
        let woken = {
            let mut state = self.state.lock();
            state.request_interrupt(fiber, cause) == Some(InterruptDisposition::Woken)
        };
        if woken {
            self.schedule_interrupt(fiber);
        }
    }

    /// Marks a fiber `Done` and applies the deferred effects: observers are
    /// woken and freshly interrupted children are re-admitted.
    ///
    /// Called from inside wrapper continuations, so the caller holds no
    /// runtime lock.
    pub(crate) fn finish_fiber(&self, fiber: FiberId, outcome: crate::types::FiberOutcome) {
        let effects = self.state.lock().fiber_completed(fiber, outcome);
        self.apply_effects(effects);
    }

    pub(crate) fn apply_effects(&self, effects: CompletionEffects) {
        for child in effects.interrupts {
            self.schedule_interrupt(child);
        }
        for waker in effects.observers {
            waker.wake();
        }
        for waker in effects.scope_wakers {
            waker.wake();
        }
    }

    /// Registers a sleep deadline.
    pub(crate) fn register_timer(&self, at: Time, waker: std::task::Waker) {
        let mut timers = self.timers.lock();
        timers.register(at, waker);
        self.timer_idle.notify_one();
    }

    /// Fires every timer due at `now`. Wakes outside the timer lock.
    pub(crate) fn fire_due_timers(&self, now: Time) -> usize {
        let due = self.timers.lock().pop_due(now);
        let count = due.len();
        for waker in due {
            waker.wake();
        }
        count
    }

    /// Runs one dispatch of `fiber`: checkpoint, poll, park or requeue.
    ///
    /// The continuation is taken out of the store for the duration of the
    /// poll, which is what makes "at most one carrier per fiber" hold; a
    /// concurrent wake that finds the continuation missing leaves a repoll
    /// marker instead.
    pub(crate) fn dispatch(self: &Arc<Self>, fiber: FiberId) {
        // Displaced user continuations are dropped only after the state lock
        // is released: their drop glue (abandoned closers, mask guards) may
        // take the lock again.
        let mut displaced: Option<StoredFiber> = None;
        let mut stored = {
            let mut state = self.state.lock();
            if let ClockSource::Monotonic(start) = self.clock {
                state.now =
                    Time::from_nanos(u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX));
            }

            if state.fiber(fiber).is_none_or(|f| f.is_terminal()) {
                return;
            }

            // Possession of the continuation is the exclusion token: taking
            // it first means only one carrier can run the checkpoint below.
            let Some(taken) = state.take_continuation(fiber) else {
                // Another carrier is mid-poll on this fiber; let it requeue
                // when it parks.
                if let Some(record) = state.fiber_mut(fiber) {
                    record.repoll = true;
                }
                return;
            };

            // Checkpoint: a pending interrupt diverts this dispatch into the
            // finalization continuation. The user continuation is dropped
            // here; it never runs again.
            let acknowledged = state.fiber_mut(fiber).and_then(|record| {
                record
                    .acknowledge_interrupt()
                    .map(|cause| (cause, record.owned_scopes.clone()))
            });
            let taken = match acknowledged {
                Some((cause, owned)) => {
                    debug!(fiber = %fiber, %cause, "interrupt acknowledged");
                    displaced = Some(taken);
                    let continuation = finalize_interrupted(self.clone(), fiber, owned, cause);
                    StoredFiber::new(continuation, fiber)
                }
                None => taken,
            };

            if !state.fiber_mut(fiber).is_some_and(|f| f.begin_dispatch()) {
                drop(state);
                drop(taken);
                return;
            }
            taken
        };
        drop(displaced);

        let waker = fiber_waker(fiber, self.clone());
        let mut cx = Context::from_waker(&waker);
        match stored.poll(&mut cx) {
            Poll::Ready(()) => {
                // The wrapper continuation already ran the completion
                // bookkeeping from inside the poll; the continuation is
                // spent and simply dropped here.
                trace!(fiber = %fiber, "continuation finished");
            }
            Poll::Pending => {
                let requeue = {
                    let mut state = self.state.lock();
                    let Some(record) = state.fiber_mut(fiber) else {
                        return;
                    };
                    if record.is_terminal() {
                        return;
                    }
                    let repoll = std::mem::take(&mut record.repoll);
                    let reason = record.take_pending_reason();
                    if record.state.is_interrupting() {
                        // Finalization in progress: stays Interrupting.
                        state.store_continuation(fiber, stored);
                        repoll.then_some(Lane::Interrupt)
                    } else if record.wants_interrupt() {
                        // The interrupt arrived mid-poll; this suspension
                        // point is its checkpoint.
                        state.store_continuation(fiber, stored);
                        Some(Lane::Interrupt)
                    } else {
                        record.suspend(reason);
                        state.store_continuation(fiber, stored);
                        repoll.then_some(Lane::Ready)
                    }
                };
                match requeue {
                    Some(Lane::Interrupt) => self.schedule_interrupt(fiber),
                    Some(Lane::Ready) => self.schedule(fiber),
                    None => {}
                }
            }
        }
    }

    /// Forks a new fiber under `policy` and enqueues it.
    ///
    /// The new fiber is admitted to the back of the ready lane and will not
    /// execute before the forking fiber's current synchronous segment ends.
    pub(crate) fn fork_with<F, Fut, T>(
        self: &Arc<Self>,
        policy: ForkPolicy,
        forker: Option<FiberId>,
        ambient: Option<ScopeId>,
        f: F,
    ) -> Result<FiberHandle<T>, Error>
    where
        F: FnOnce(Cx) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
        T: Send + 'static,
    {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }

        let slot = Arc::new(Mutex::new(None));
        let id = {
            let mut state = self.state.lock();
            let links = state.resolve_fork(policy, forker, ambient);
            let id = state.create_fiber(policy, links)?;

            let child_cx = Cx::new(id, links.scope.or(ambient), self.clone());
            let shared = self.clone();
            let result_slot = slot.clone();
            let wrapper = async move {
                let result = CatchUnwind::new(async move { f(child_cx).await }).await;
                let typed = match result {
                    Ok(r) => Outcome::from(r),
                    Err(payload) => Outcome::Failure(Error::panicked(payload)),
                };
                let erased = typed.erased();
                *result_slot.lock() = Some(typed);
                shared.finish_fiber(id, erased);
            };
            state.store_continuation(id, StoredFiber::new(wrapper, id));
            id
        };

        self.schedule(id);
        Ok(FiberHandle::new(id, slot, self.clone()))
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("clock", &self.clock)
            .field("shutdown", &self.shutdown.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// The interruption finalization continuation.
///
/// Runs as the interrupted fiber itself: closes the fiber's owned scopes in
/// reverse creation order (running their finalizers, interrupting their
/// attached fibers) and only then marks the fiber `Done(Interrupted)`. An
/// `interrupt()` caller awaiting the outcome therefore returns only after
/// the target's own finalizers have fully run.
async fn finalize_interrupted(
    shared: Arc<Shared>,
    fiber: FiberId,
    owned: Vec<ScopeId>,
    cause: InterruptCause,
) {
    for scope in owned.into_iter().rev() {
        let _ = CloseScope::new(shared.clone(), scope).await;
    }
    shared.finish_fiber(fiber, Outcome::Interrupted(cause));
}
