//! Suspension reasons.

use super::id::{FiberId, Time};
use core::fmt;

/// Why a fiber left the ready queue.
///
/// Recorded for diagnostics when a continuation returns control to the
/// scheduler without completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    /// The fiber yielded voluntarily and re-enqueued itself.
    Yielded,
    /// The fiber is waiting for another fiber's outcome.
    Awaiting(FiberId),
    /// The fiber is sleeping until the given instant.
    Sleeping(Time),
    /// The fiber is parked on an external wakeup (channel, I/O adapter, ...).
    External,
}

impl fmt::Display for SuspendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yielded => write!(f, "yielded"),
            Self::Awaiting(fiber) => write!(f, "awaiting {fiber}"),
            Self::Sleeping(until) => write!(f, "sleeping until {until}"),
            Self::External => write!(f, "external"),
        }
    }
}
