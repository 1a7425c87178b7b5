//! Threaded runtime and its builder.
//!
//! The threaded runtime drives the same shared dispatch core as the
//! deterministic executor, but over N parked worker threads plus one timer
//! thread against the monotonic clock. The cooperative contract (one
//! carrier per fiber at a time, checkpoint-only interruption, fork-then-run
//! ordering) is carried entirely by [`Shared::dispatch`], so it holds here
//! unchanged.

use crate::cx::ScopeHandle;
use crate::error::Error;
use crate::record::ScopeRole;
use crate::runtime::config::RuntimeConfig;
use crate::runtime::handle::FiberHandle;
use crate::runtime::shared::{ClockSource, Shared};
use crate::runtime::state::RuntimeSnapshot;
use crate::types::{FiberOutcome, ForkPolicy};
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::{Duration, Instant};
use tracing::debug;

/// Fluent, move-based builder for [`Runtime`].
#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder from an explicit configuration.
    #[must_use]
    pub fn from_config(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Sets the number of worker threads (clamped to at least 1).
    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.config.worker_threads = n.max(1);
        self
    }

    /// Sets the thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Builds the runtime, spawning worker and timer threads.
    pub fn build(self) -> Result<Runtime, Error> {
        let shared = Shared::new(ClockSource::Monotonic(Instant::now()));
        let prefix = &self.config.thread_name_prefix;

        let mut workers = Vec::with_capacity(self.config.worker_threads.max(1));
        for i in 0..self.config.worker_threads.max(1) {
            let shared = shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{prefix}-{i}"))
                .spawn(move || worker_loop(&shared))
                .map_err(|_| Error::Internal("failed to spawn worker thread"))?;
            workers.push(handle);
        }

        let timer = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name(format!("{prefix}-timer"))
                .spawn(move || timer_loop(&shared))
                .map_err(|_| Error::Internal("failed to spawn timer thread"))?
        };

        debug!(workers = workers.len(), "runtime started");
        Ok(Runtime {
            shared,
            workers,
            timer: Some(timer),
        })
    }
}

/// A multi-threaded fiber runtime.
pub struct Runtime {
    shared: Arc<Shared>,
    workers: Vec<std::thread::JoinHandle<()>>,
    timer: Option<std::thread::JoinHandle<()>>,
}

impl Runtime {
    /// Builds a runtime with default configuration.
    pub fn new() -> Result<Self, Error> {
        RuntimeBuilder::new().build()
    }

    /// Forks a root fiber (daemon: attached to the global scope).
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

    /// Drives `future` to completion on the caller's thread while the
    /// workers run fibers.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        let park = Arc::new(ParkWaker {
            ready: Mutex::new(true),
            signal: Condvar::new(),
        });
        let waker = Waker::from(park.clone());
        let mut cx = Context::from_waker(&waker);
        let mut future = std::pin::pin!(future);

        loop {
            {
                let mut ready = park.ready.lock();
                while !*ready {
                    park.signal.wait(&mut ready);
                }
                *ready = false;
            }
            if let Poll::Ready(value) = future.as_mut().poll(&mut cx) {
                return value;
            }
        }
    }

    /// Takes a point-in-time tally of the runtime.
    #[must_use]
    pub fn snapshot(&self) -> RuntimeSnapshot {
        self.shared.state.lock().snapshot()
    }

    /// Closes the global scope, waits for its fibers, and stops the worker
    /// and timer threads.
    pub fn shutdown(mut self) -> FiberOutcome {
        let outcome = self.block_on(self.global_scope().close());
        self.stop_threads();
        debug!("runtime shut down");
        outcome
    }

    fn stop_threads(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        {
            let _queue = self.shared.queue.lock();
            self.shared.idle.notify_all();
        }
        {
            let _timers = self.shared.timers.lock();
            self.shared.timer_idle.notify_all();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        if let Some(timer) = self.timer.take() {
            let _ = timer.join();
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // Dropping without shutdown stops the carriers but closes nothing;
        // use `shutdown()` for an orderly close of the global scope.
        if !self.workers.is_empty() {
            self.stop_threads();
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

struct ParkWaker {
    ready: Mutex<bool>,
    signal: Condvar,
}

impl Wake for ParkWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        *self.ready.lock() = true;
        self.signal.notify_one();
    }
}

fn worker_loop(shared: &Arc<Shared>) {
    loop {
        let fiber = {
            let mut queue = shared.queue.lock();
            loop {
                if shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(fiber) = queue.pop() {
                    break fiber;
                }
                shared.idle.wait(&mut queue);
            }
        };
        shared.dispatch(fiber);
    }
}

fn timer_loop(shared: &Arc<Shared>) {
    loop {
        let due = {
            let mut timers = shared.timers.lock();
            if shared.shutdown.load(Ordering::SeqCst) {
                return;
            }
            match timers.next_deadline() {
                None => {
                    shared.timer_idle.wait(&mut timers);
                    continue;
                }
                Some(at) => {
                    let now = shared.now();
                    if at <= now {
                        timers.pop_due(now)
                    } else {
                        let wait = Duration::from_nanos(at.duration_since(now));
                        let _ = shared.timer_idle.wait_for(&mut timers, wait);
                        continue;
                    }
                }
            }
        };
        for waker in due {
            waker.wake();
        }
    }
}
