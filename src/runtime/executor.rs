//! Deterministic single-threaded executor.
//!
//! The executor drives the shared dispatch core on the current thread with
//! virtual time: dispatch order is the queue order, and the clock only
//! advances when no fiber is ready. The same program produces the same
//! interleaving, so the scheduling properties of this runtime can be
//! asserted in tests.

use crate::cx::ScopeHandle;
use crate::error::Error;
use crate::record::ScopeRole;
use crate::runtime::config::RuntimeConfig;
use crate::runtime::handle::FiberHandle;
use crate::runtime::shared::{ClockSource, Shared};
use crate::runtime::state::RuntimeSnapshot;
use crate::types::{FiberId, FiberOutcome, ForkPolicy, Time};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use tracing::debug;

struct FlagWaker(Arc<AtomicBool>);

impl Wake for FlagWaker {
    fn wake(self: Arc<Self>) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// The deterministic executor.
pub struct Executor {
    shared: Arc<Shared>,
    steps: u64,
    max_steps: Option<u64>,
}

impl Executor {
    /// Creates an executor with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&RuntimeConfig::default())
    }

    /// Creates an executor honoring `max_steps` from the configuration.
    #[must_use]
    pub fn with_config(config: &RuntimeConfig) -> Self {
        Self {
            shared: Shared::new(ClockSource::Virtual),
            steps: 0,
            max_steps: config.max_steps,
        }
    }

    /// Forks a root fiber.
    ///
    /// Root fibers are daemons: they attach to the global scope, so shutdown
    /// bounds them like everything else.
    pub fn spawn<F, Fut, T>(&self, f: F) -> Result<FiberHandle<T>, Error>
    where
        F: FnOnce(crate::cx::Cx) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
        T: Send + 'static,
    {
        self.shared.fork_with(ForkPolicy::Daemon, None, None, f)
    }

    /// Creates an explicit scope not owned by any fiber.
    #[must_use]
    pub fn make_scope(&self) -> ScopeHandle {
        let scope = self
            .shared
            .state
            .lock()
            .create_scope(ScopeRole::Explicit, None, None);
        ScopeHandle::new(scope, self.shared.clone())
    }

    /// Returns a handle to the global scope.
    #[must_use]
    pub fn global_scope(&self) -> ScopeHandle {
        ScopeHandle::new(self.shared.global_scope(), self.shared.clone())
    }

    /// Dispatches the next ready fiber. Returns false if none is ready.
    pub fn step(&mut self) -> bool {
        let Some(fiber) = self.shared.queue.lock().pop() else {
            return false;
        };
        self.steps += 1;
        self.shared.dispatch(fiber);
        true
    }

    /// Advances virtual time to the earliest pending deadline and fires the
    /// timers due there. Returns false if no timer is pending.
    pub fn advance_to_next_timer(&mut self) -> bool {
        let Some(at) = self.shared.timers.lock().next_deadline() else {
            return false;
        };
        self.shared.state.lock().now = at;
        self.shared.fire_due_timers(at);
        true
    }

    /// Advances virtual time by `duration`, firing any timers that fall due.
    pub fn advance_time(&mut self, duration: std::time::Duration) {
        let now = {
            let mut state = self.shared.state.lock();
            state.now = state.now + duration;
            state.now
        };
        self.shared.fire_due_timers(now);
    }

    /// Runs dispatches (advancing time over idle gaps) until no fiber is
    /// ready and no timer is pending. Returns the number of steps taken.
    ///
    /// Fibers parked on external wakeups stay parked; they are visible
    /// afterwards through [`Executor::leaked_fibers`].
    pub fn run_until_quiescent(&mut self) -> u64 {
        let start = self.steps;
        loop {
            if let Some(max) = self.max_steps {
                if self.steps >= max {
                    debug!(steps = self.steps, "step ceiling reached");
                    break;
                }
            }
            if self.step() {
                continue;
            }
            if self.advance_to_next_timer() {
                continue;
            }
            break;
        }
        self.steps - start
    }

    /// Runs at most `n` dispatches without advancing time.
    pub fn run_steps(&mut self, n: u64) -> u64 {
        let start = self.steps;
        for _ in 0..n {
            if !self.step() {
                break;
            }
        }
        self.steps - start
    }

    /// Drives `future` to completion, interleaving fiber dispatches.
    ///
    /// # Panics
    ///
    /// Panics if the future is pending while no fiber is ready, no timer is
    /// pending, and no wake has arrived: a deadlock under virtual time.
    pub fn block_on<F: Future>(&mut self, future: F) -> F::Output {
        let flag = Arc::new(AtomicBool::new(true));
        let waker = Waker::from(Arc::new(FlagWaker(flag.clone())));
        let mut cx = Context::from_waker(&waker);
        let mut future = std::pin::pin!(future);

        loop {
            if flag.swap(false, Ordering::SeqCst) {
                if let Poll::Ready(value) = future.as_mut().poll(&mut cx) {
                    return value;
                }
            }
            if self.step() {
                continue;
            }
            if self.advance_to_next_timer() {
                continue;
            }
            if flag.load(Ordering::SeqCst) {
                continue;
            }
            panic!(
                "block_on stalled: awaited future is pending with no runnable fibers or timers"
            );
        }
    }

    /// Closes the global scope and refuses further forks.
    ///
    /// Every fiber still attached to the global scope (daemons, scoped
    /// fallbacks) is interrupted and awaited; global finalizers run last.
    pub fn shutdown(&mut self) -> FiberOutcome {
        let outcome = self.block_on(self.global_scope().close());
        self.shared.shutdown.store(true, Ordering::SeqCst);
        outcome
    }

    /// Returns the current virtual time.
    #[must_use]
    pub fn now(&self) -> Time {
        self.shared.now()
    }

    /// Returns the number of dispatches so far.
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Returns true if every fiber has reached `Done`.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.shared.state.lock().is_quiescent()
    }

    /// Returns the fibers that have not reached `Done`.
    #[must_use]
    pub fn leaked_fibers(&self) -> Vec<FiberId> {
        self.shared.state.lock().leaked_fibers()
    }

    /// Takes a point-in-time tally of the runtime.
    #[must_use]
    pub fn snapshot(&self) -> RuntimeSnapshot {
        self.shared.state.lock().snapshot()
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("steps", &self.steps)
            .field("max_steps", &self.max_steps)
            .finish_non_exhaustive()
    }
}
