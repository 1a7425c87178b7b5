//! Waker wiring for fibers.
//!
//! Waking a fiber means re-admitting it to the ready queue; the queue's
//! membership set makes this idempotent, so any number of wakers can fire
//! for one suspension without double-admitting the fiber.

use crate::runtime::shared::Shared;
use crate::types::FiberId;
use std::sync::Arc;
use std::task::{Wake, Waker};

struct FiberWaker {
    fiber: FiberId,
    shared: Arc<Shared>,
}

impl Wake for FiberWaker {
    fn wake(self: Arc<Self>) {
        self.shared.schedule(self.fiber);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.shared.schedule(self.fiber);
    }
}

/// Builds the waker handed to a fiber's continuation for one dispatch.
pub(crate) fn fiber_waker(fiber: FiberId, shared: Arc<Shared>) -> Waker {
    Waker::from(Arc::new(FiberWaker { fiber, shared }))
}
