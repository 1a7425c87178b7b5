//! The fiber capability context.

use crate::cx::scope::ScopeHandle;
use crate::error::Error;
use crate::record::ScopeRole;
use crate::runtime::handle::FiberHandle;
use crate::runtime::shared::Shared;
use crate::runtime::timer::Sleep;
use crate::runtime::yield_now::YieldNow;
use crate::types::{FiberId, ForkPolicy, InterruptCause};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

/// The context threaded through every fiber computation.
///
/// A `Cx` identifies the running fiber, carries the ambient scope captured
/// at its fork site, and grants access to the runtime: forking, yielding,
/// sleeping, checkpoints, masking, and scope creation all go through it.
///
/// `Cx` is cheap to clone. Scope resolution is a function of the values
/// in hand, never of hidden carrier-local state.
#[derive(Clone)]
pub struct Cx {
    fiber: FiberId,
    scope: Option<crate::types::ScopeId>,
    shared: Arc<Shared>,
}

impl Cx {
    pub(crate) fn new(
        fiber: FiberId,
        scope: Option<crate::types::ScopeId>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            fiber,
            scope,
            shared,
        }
    }

    /// Returns the id of the fiber this context belongs to.
    #[must_use]
    pub fn fiber_id(&self) -> FiberId {
        self.fiber
    }

    /// Returns the ambient scope captured at this call site, if any.
    #[must_use]
    pub fn current_scope(&self) -> Option<ScopeHandle> {
        self.scope
            .map(|scope| ScopeHandle::new(scope, self.shared.clone()))
    }

    /// Returns a context whose ambient scope is `scope`.
    ///
    /// Scoped forks made through the returned context attach to `scope`.
    #[must_use]
    pub fn in_scope(&self, scope: &ScopeHandle) -> Self {
        Self {
            fiber: self.fiber,
            scope: Some(scope.id()),
            shared: self.shared.clone(),
        }
    }

    /// Creates a local scope owned by this fiber.
    ///
    /// The scope is closed explicitly via [`ScopeHandle::close`]; if this
    /// fiber is interrupted first, its unfinished owned scopes are closed
    /// LIFO during unwinding.
    #[must_use]
    pub fn make_scope(&self) -> ScopeHandle {
        let scope =
            self.shared
                .state
                .lock()
                .create_scope(ScopeRole::Local, self.scope, Some(self.fiber));
        ScopeHandle::new(scope, self.shared.clone())
    }

    /// Forks a fiber under automatic supervision.
    ///
    /// The child is linked to this fiber; when this fiber reaches `Done`,
    /// the child receives an interrupt request. The child is enqueued but
    /// does not run until this fiber suspends, yields, or completes.
    pub fn fork<F, Fut, T>(&self, f: F) -> Result<FiberHandle<T>, Error>
    where
        F: FnOnce(Cx) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
        T: Send + 'static,
    {
        self.shared
            .fork_with(ForkPolicy::Supervised, Some(self.fiber), self.scope, f)
    }

    /// Forks a daemon fiber attached to the global scope.
    ///
    /// Daemon fibers outlive their forker; only runtime shutdown (or
    /// natural completion) ends them.
    pub fn fork_daemon<F, Fut, T>(&self, f: F) -> Result<FiberHandle<T>, Error>
    where
        F: FnOnce(Cx) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
        T: Send + 'static,
    {
        self.shared
            .fork_with(ForkPolicy::Daemon, Some(self.fiber), self.scope, f)
    }

    /// Forks a fiber attached to the ambient scope.
    ///
    /// Falls back to the global scope when no local scope is ambient. The
    /// forker's termination has no effect on the child; only the scope's
    /// close (or natural completion) does.
    pub fn fork_scoped<F, Fut, T>(&self, f: F) -> Result<FiberHandle<T>, Error>
    where
        F: FnOnce(Cx) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
        T: Send + 'static,
    {
        self.shared
            .fork_with(ForkPolicy::Scoped, Some(self.fiber), self.scope, f)
    }

    /// Forks a fiber attached to an explicitly supplied scope.
    ///
    /// Fails with `ScopeClosed` if the scope has already begun closing.
    pub fn fork_in<F, Fut, T>(&self, scope: &ScopeHandle, f: F) -> Result<FiberHandle<T>, Error>
    where
        F: FnOnce(Cx) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
        T: Send + 'static,
    {
        self.shared
            .fork_with(ForkPolicy::Into(scope.id()), Some(self.fiber), self.scope, f)
    }

    /// Yields to the scheduler, re-enqueueing this fiber at the back of the
    /// ready lane.
    #[must_use]
    pub fn yield_now(&self) -> YieldNow {
        YieldNow {
            shared: self.shared.clone(),
            fiber: self.fiber,
            yielded: false,
        }
    }

    /// Sleeps for `duration` of runtime time.
    #[must_use]
    pub fn sleep(&self, duration: Duration) -> Sleep {
        Sleep {
            shared: self.shared.clone(),
            fiber: self.fiber,
            duration,
            deadline: None,
        }
    }

    /// A cooperative interruption checkpoint.
    ///
    /// If an unmasked interrupt is pending, the fiber suspends here and
    /// unwinds on its next dispatch; otherwise this resolves immediately.
    /// Long synchronous segments should checkpoint periodically.
    #[must_use]
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            shared: self.shared.clone(),
            fiber: self.fiber,
        }
    }

    /// Returns true if an interrupt has been requested for this fiber.
    #[must_use]
    pub fn is_interrupt_requested(&self) -> bool {
        self.shared
            .state
            .lock()
            .fiber(self.fiber)
            .is_some_and(|f| f.interrupt.is_some())
    }

    /// Masks interruption until the returned guard drops.
    ///
    /// Checkpoints inside a masked section do not observe the flag; use this
    /// around cleanup that must not be torn mid-way. Nesting is counted.
    #[must_use]
    pub fn mask(&self) -> MaskGuard {
        if let Some(record) = self.shared.state.lock().fiber_mut(self.fiber) {
            record.increment_mask();
        }
        MaskGuard {
            shared: self.shared.clone(),
            fiber: self.fiber,
        }
    }

    /// Runs `f` with interruption masked.
    pub fn masked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.mask();
        f()
    }

    /// Requests interruption of this fiber itself.
    ///
    /// Observed at the next checkpoint like any other request.
    pub fn interrupt_self(&self, message: &'static str) {
        self.shared
            .interrupt_fiber(self.fiber, InterruptCause::explicit(message));
    }
}

impl std::fmt::Debug for Cx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cx")
            .field("fiber", &self.fiber)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Future returned by [`Cx::checkpoint`].
pub struct Checkpoint {
    shared: Arc<Shared>,
    fiber: FiberId,
}

impl Future for Checkpoint {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let pending = self
            .shared
            .state
            .lock()
            .fiber(self.fiber)
            .is_some_and(|f| f.wants_interrupt());
        if pending {
            // Hand control back; the next dispatch acknowledges the flag.
            cx.waker().wake_by_ref();
            Poll::Pending
        } else {
            Poll::Ready(())
        }
    }
}

/// Guard returned by [`Cx::mask`]; unmasks on drop.
pub struct MaskGuard {
    shared: Arc<Shared>,
    fiber: FiberId,
}

impl Drop for MaskGuard {
    fn drop(&mut self) {
        if let Some(record) = self.shared.state.lock().fiber_mut(self.fiber) {
            record.decrement_mask();
        }
    }
}
