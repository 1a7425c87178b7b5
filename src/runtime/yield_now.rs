//! Voluntary cooperative yield.

use crate::runtime::shared::Shared;
use crate::types::{FiberId, SuspendReason};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Future returned by `Cx::yield_now`.
///
/// The first poll re-enqueues the fiber at the back of the ready lane and
/// suspends, giving every other ready fiber (including freshly forked ones)
/// a chance to run before this one resumes.
pub struct YieldNow {
    pub(crate) shared: Arc<Shared>,
    pub(crate) fiber: FiberId,
    pub(crate) yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        if let Some(record) = self.shared.state.lock().fiber_mut(self.fiber) {
            record.set_pending_reason(SuspendReason::Yielded);
        }
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
