//! Finalizers and their LIFO stack.
//!
//! Finalizers run when their owning scope closes, in reverse registration
//! order, after every attached fiber has completed. A finalizer failure is
//! collected, never fatal to the remaining finalizers.

use crate::error::Error;
use std::future::Future;
use std::pin::Pin;

/// A cleanup action registered on a scope.
pub enum Finalizer {
    /// Synchronous finalizer, run directly by whichever carrier drives the
    /// close.
    Sync(Box<dyn FnOnce() -> Result<(), Error> + Send>),
    /// Asynchronous finalizer, awaited during the close sequence.
    Async(Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>),
}

impl Finalizer {
    /// Wraps a synchronous closure.
    pub fn sync<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<(), Error> + Send + 'static,
    {
        Self::Sync(Box::new(f))
    }

    /// Wraps a future.
    pub fn asynchronous<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        Self::Async(Box::pin(future))
    }
}

impl std::fmt::Debug for Finalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync(_) => f.debug_tuple("Sync").field(&"<closure>").finish(),
            Self::Async(_) => f.debug_tuple("Async").field(&"<future>").finish(),
        }
    }
}

/// A stack of finalizers, popped in LIFO order during scope close.
#[derive(Debug, Default)]
pub struct FinalizerStack {
    items: Vec<Finalizer>,
}

impl FinalizerStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a finalizer.
    pub fn push(&mut self, finalizer: Finalizer) {
        self.items.push(finalizer);
    }

    /// Pops the next finalizer to run (reverse registration order).
    pub fn pop(&mut self) -> Option<Finalizer> {
        self.items.pop()
    }

    /// Drains all remaining finalizers, newest first.
    pub fn drain(&mut self) -> Vec<Finalizer> {
        let mut items = std::mem::take(&mut self.items);
        items.reverse();
        items
    }

    /// Returns the number of pending finalizers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if no finalizers are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
