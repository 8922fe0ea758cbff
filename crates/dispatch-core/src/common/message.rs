//! Result message variants flowing from worker processes back to the
//! controller's result monitor.
//!
//! Mirrors the Python original's `protocol.py` dataclasses one-to-one:
//! `TaskStarted`, `TaskSuccess`, `TaskError`, `TaskTimeout`, `SetupFailed`,
//! `CleanupFailed`. Every field needed to reconstruct the tagged outcome on
//! the controller side is carried in the variant itself - this type is the
//! unit of transport across the worker's stdout pipe.

use serde::{Deserialize, Serialize};

/// A tagged outcome sent from a worker process to the controller's result
/// monitor.
///
/// `O` is the worker's output type. Every variant except `SetupFailed` and
/// `CleanupFailed` carries the `worker_id` that produced it, since results
/// from multiple workers are multiplexed onto a single channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResultMessage<O> {
    /// The worker has dequeued `task_id` and is about to call `process`.
    TaskStarted { task_id: u64, worker_id: usize },

    /// `process` returned successfully.
    TaskSuccess {
        task_id: u64,
        data: O,
        worker_id: usize,
    },

    /// `process` raised a non-timeout error. `error_text` is a captured
    /// trace/message, not a typed error (the worker process's error type
    /// does not need to cross the process boundary).
    TaskError {
        task_id: u64,
        error_text: String,
        worker_id: usize,
    },

    /// `process` exceeded the configured wall-clock budget.
    TaskTimeout {
        task_id: u64,
        timeout_seconds: f64,
        worker_id: usize,
    },

    /// `setup` raised. The worker that sent this message emits no further
    /// messages and is about to exit.
    SetupFailed { worker_id: usize, error_text: String },

    /// `cleanup` raised. Non-fatal; the task stream is unaffected since
    /// this only happens after the worker has already stopped accepting
    /// tasks.
    CleanupFailed { worker_id: usize, error_text: String },
}

/// Controller-side lifecycle state of a single worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// The process has been spawned but hasn't reported in yet.
    Spawning,
    /// `setup` succeeded; the worker is waiting on the task channel.
    Ready,
    /// The worker is currently inside a `process` call.
    Running,
    /// The worker observed shutdown or the stop sentinel and exited its
    /// loop normally, including a best-effort `cleanup`.
    Drained,
    /// `setup` raised; the worker exited without processing any tasks.
    SetupFailed,
    /// The controller sent the stop sentinel and the process exited within
    /// the graceful join window.
    Terminated,
    /// The controller had to escalate to `SIGTERM`/`SIGKILL` to reclaim the
    /// process.
    Killed,
    /// A write to the worker's stdin pipe failed outside the normal
    /// shutdown path (broken pipe). The process is presumed dead; no more
    /// tasks are routed to it.
    Crashed,
}
