//! Timer heap for sleeping fibers.
//!
//! Sleeping is a suspension reason, not a timeout policy: a fiber that goes
//! to sleep parks itself here and is woken when the runtime's clock passes
//! its deadline. The deterministic executor advances virtual time to the
//! next deadline when no fiber is ready; the threaded runtime drives the
//! heap from a timer thread against the monotonic clock.

use crate::types::Time;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::task::Waker;

struct TimerEntry {
    at: Time,
    seq: u64,
    waker: Waker,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

/// A min-heap of sleep deadlines.
#[derive(Default)]
pub struct TimerHeap {
    entries: BinaryHeap<Reverse<TimerEntry>>,
    seq: u64,
}

impl TimerHeap {
    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waker to fire once the clock reaches `at`.
    pub fn register(&mut self, at: Time, waker: Waker) {
        let seq = self.seq;
        self.seq += 1;
        self.entries.push(Reverse(TimerEntry { at, seq, waker }));
    }

    /// Returns the earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Time> {
        self.entries.peek().map(|Reverse(e)| e.at)
    }

    /// Pops every waker whose deadline is at or before `now`.
    pub fn pop_due(&mut self, now: Time) -> Vec<Waker> {
        let mut due = Vec::new();
        while let Some(Reverse(head)) = self.entries.peek() {
            if head.at > now {
                break;
            }
            let Some(Reverse(entry)) = self.entries.pop() else {
                break;
            };
            due.push(entry.waker);
        }
        due
    }

    /// Returns the number of pending timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no timers are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Future returned by `Cx::sleep`.
///
/// Suspends the fiber with reason `Sleeping(deadline)` until the runtime
/// clock passes the deadline. Sleeping is wake-correct under interruption:
/// an interrupt request re-admits the fiber immediately and the stale timer
/// entry later fires as a harmless no-op.
pub struct Sleep {
    pub(crate) shared: std::sync::Arc<crate::runtime::shared::Shared>,
    pub(crate) fiber: crate::types::FiberId,
    pub(crate) duration: std::time::Duration,
    pub(crate) deadline: Option<Time>,
}

impl std::future::Future for Sleep {
    type Output = ();

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        let this = self.get_mut();

        let deadline = match this.deadline {
            Some(deadline) => deadline,
            None => {
                let state = this.shared.state.lock();
                let deadline = this.shared.now_with(&state) + this.duration;
                drop(state);
                this.deadline = Some(deadline);
                deadline
            }
        };

        if this.shared.now() >= deadline {
            return std::task::Poll::Ready(());
        }

        if let Some(record) = this.shared.state.lock().fiber_mut(this.fiber) {
            record.set_pending_reason(crate::types::SuspendReason::Sleeping(deadline));
        }
        this.shared.register_timer(deadline, cx.waker().clone());
        std::task::Poll::Pending
    }
}

impl std::fmt::Debug for TimerHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHeap")
            .field("pending", &self.entries.len())
            .field("next", &self.next_deadline())
            .finish()
    }
}
