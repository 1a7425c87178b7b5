//! Type-erased fiber continuations.
//!
//! The runtime stores each fiber's remaining computation as a boxed future
//! whose output has been erased; the typed result travels through the
//! handle's slot instead. Panics are caught per poll so a crashing fiber
//! never takes its carrier thread down.

use crate::types::{FiberId, PanicPayload};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::trace;

/// A stored, type-erased fiber continuation.
pub struct StoredFiber {
    future: Pin<Box<dyn Future<Output = ()> + Send>>,
    fiber: FiberId,
    polls: u64,
}

impl StoredFiber {
    /// Wraps a future as the continuation of `fiber`.
    pub fn new<F>(future: F, fiber: FiberId) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            future: Box::pin(future),
            fiber,
            polls: 0,
        }
    }

    /// Returns the owning fiber id.
    #[must_use]
    pub fn fiber(&self) -> FiberId {
        self.fiber
    }

    /// Returns how many times this continuation has been polled.
    #[must_use]
    pub fn polls(&self) -> u64 {
        self.polls
    }

    /// Polls the continuation one step.
    pub fn poll(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        self.polls += 1;
        trace!(fiber = %self.fiber, poll = self.polls, "fiber step");
        self.future.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for StoredFiber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredFiber")
            .field("fiber", &self.fiber)
            .field("polls", &self.polls)
            .finish_non_exhaustive()
    }
}

/// A future adapter that catches panics at each poll.
///
/// Resolves to `Err(payload)` if the inner future panicked, so the carrier
/// thread survives and the panic becomes a `Failure` outcome.
pub(crate) struct CatchUnwind<F> {
    inner: Pin<Box<F>>,
}

impl<F: Future> CatchUnwind<F> {
    pub(crate) fn new(inner: F) -> Self {
        Self {
            inner: Box::pin(inner),
        }
    }
}

impl<F: Future> Future for CatchUnwind<F> {
    type Output = Result<F::Output, PanicPayload>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.inner.as_mut();
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| inner.poll(cx))) {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(value)) => Poll::Ready(Ok(value)),
            Err(payload) => Poll::Ready(Err(PanicPayload::from_any(&payload))),
        }
    }
}
