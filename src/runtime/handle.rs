//! Fiber handles.
//!
//! A `FiberHandle<T>` is the observer side of a fiber: it can await the
//! outcome, request interruption, or read the outcome without waiting. The
//! handle does not own the fiber: dropping it detaches nothing and stops
//! nothing.

use crate::error::Error;
use crate::runtime::shared::Shared;
use crate::types::{FiberId, InterruptCause, Outcome};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// A handle to a forked fiber.
///
/// The typed outcome is written into a shared slot when the fiber completes
/// naturally; interruption and failure outcomes are reconstructed from the
/// fiber record. Reading the outcome is idempotent: every call after `Done`
/// returns the identical stored value.
pub struct FiberHandle<T> {
    fiber: FiberId,
    slot: Arc<Mutex<Option<Outcome<T>>>>,
    shared: Arc<Shared>,
}

impl<T> FiberHandle<T> {
    pub(crate) fn new(
        fiber: FiberId,
        slot: Arc<Mutex<Option<Outcome<T>>>>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            fiber,
            slot,
            shared,
        }
    }

    /// Returns the fiber id.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.fiber
    }

    /// Returns true if the fiber has reached `Done`.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.shared
            .state
            .lock()
            .fiber(self.fiber)
            .is_none_or(|f| f.is_terminal())
    }

    /// Requests interruption without waiting for it to take effect.
    ///
    /// Never blocks; idempotent. A suspended fiber is woken to unwind, a
    /// running one observes the flag at its next checkpoint, a `Done` one is
    /// left alone.
    pub fn request_interrupt(&self) {
        self.shared
            .interrupt_fiber(self.fiber, InterruptCause::explicit("handle interrupt"));
    }
}

impl<T: Clone> FiberHandle<T> {
    /// Waits for the fiber's outcome.
    ///
    /// Resolves immediately if the fiber is already `Done`, and can be
    /// awaited repeatedly; every await returns the same stored outcome.
    pub fn join(&self) -> Join<'_, T> {
        Join { handle: self }
    }

    /// Requests interruption and waits for the fiber to finish unwinding.
    ///
    /// The returned outcome is `Interrupted` unless the fiber won the race
    /// and completed naturally first. Resolution waits for the target's own
    /// finalizers to have fully run.
    pub fn interrupt(&self) -> Interrupt<'_, T> {
        Interrupt {
            handle: self,
            requested: false,
        }
    }

    /// Reads the outcome without waiting.
    ///
    /// Returns `None` while the fiber is still running.
    #[must_use]
    pub fn poll_outcome(&self) -> Option<Outcome<T>> {
        let terminal = {
            let state = self.shared.state.lock();
            state.fiber(self.fiber).map(|f| f.is_terminal())
        };
        match terminal {
            Some(false) => None,
            _ => Some(self.stored_outcome()),
        }
    }

    /// Reconstructs the typed outcome once the fiber is `Done`.
    ///
    /// Natural completions live in the slot; interruption and failure come
    /// from the record. Must only be called once the fiber is terminal.
    fn stored_outcome(&self) -> Outcome<T> {
        if let Some(outcome) = self.slot.lock().clone() {
            return outcome;
        }
        let state = self.shared.state.lock();
        match state.fiber(self.fiber).and_then(|f| f.outcome().cloned()) {
            Some(Outcome::Interrupted(cause)) => Outcome::Interrupted(cause),
            Some(Outcome::Failure(error)) => Outcome::Failure(error),
            Some(Outcome::Success(())) => {
                Outcome::Failure(Error::Internal("fiber succeeded without a result"))
            }
            None => Outcome::Failure(Error::NoSuchFiber(self.fiber)),
        }
    }
}

impl<T> Clone for FiberHandle<T> {
    fn clone(&self) -> Self {
        Self {
            fiber: self.fiber,
            slot: self.slot.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<T> std::fmt::Debug for FiberHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiberHandle")
            .field("fiber", &self.fiber)
            .finish_non_exhaustive()
    }
}

/// Future returned by [`FiberHandle::join`].
pub struct Join<'a, T> {
    handle: &'a FiberHandle<T>,
}

impl<T: Clone> Future for Join<'_, T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let handle = self.handle;
        {
            let mut state = handle.shared.state.lock();
            match state.fiber_mut(handle.fiber) {
                Some(record) if !record.is_terminal() => {
                    record.add_observer(cx.waker());
                    return Poll::Pending;
                }
                _ => {}
            }
        }
        Poll::Ready(handle.stored_outcome())
    }
}

/// Future returned by [`FiberHandle::interrupt`].
pub struct Interrupt<'a, T> {
    handle: &'a FiberHandle<T>,
    requested: bool,
}

impl<T: Clone> Future for Interrupt<'_, T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if !self.requested {
            self.requested = true;
            self.handle.request_interrupt();
        }
        Pin::new(&mut Join {
            handle: self.handle,
        })
        .poll(cx)
    }
}
