//! Runtime configuration.

use serde::{Deserialize, Serialize};

/// Configuration shared by the deterministic executor and the threaded
/// runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker threads for the threaded runtime. Ignored by the
    /// deterministic executor, which is single-threaded by construction.
    pub worker_threads: usize,
    /// Name prefix for worker and timer threads.
    pub thread_name_prefix: String,
    /// Step ceiling for `Executor::run_until_quiescent`, as a safety valve
    /// against runaway fibers in tests. `None` means unbounded.
    pub max_steps: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism().map_or(1, usize::from),
            thread_name_prefix: "fibra-worker".to_string(),
            max_steps: None,
        }
    }
}
