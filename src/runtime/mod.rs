//! Runtime machinery: state, scheduling, and the two drivers.
//!
//! - [`state`]: the record store (fibers, scopes, supervision, clock)
//! - [`queue`]: the two-lane ready queue with per-suspension dedup
//! - `shared`: the dispatch core both drivers funnel through
//! - [`stored`]: type-erased continuations with panic capture
//! - [`handle`]: fiber handles (join/interrupt/poll)
//! - [`timer`]: sleep deadlines
//! - [`executor`]: deterministic single-threaded driver (virtual time)
//! - [`builder`]: threaded driver (workers + timer thread)
//! - [`config`]: configuration shared by both drivers

pub mod builder;
pub mod config;
pub mod executor;
pub mod handle;
pub mod queue;
pub(crate) mod shared;
pub mod state;
pub mod stored;
pub mod timer;
pub(crate) mod waker;
pub mod yield_now;

pub use builder::{Runtime, RuntimeBuilder};
pub use config::RuntimeConfig;
pub use executor::Executor;
pub use handle::{FiberHandle, Interrupt, Join};
pub use state::{FiberTally, RuntimeSnapshot, RuntimeState, ScopeTally};
pub use stored::StoredFiber;
pub use timer::{Sleep, TimerHeap};
pub use yield_now::YieldNow;
