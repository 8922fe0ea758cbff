//! The user-supplied worker capability interface and the child-process
//! entrypoint that drives it.
//!
//! Grounded in the Python original's `BaseWorker`/`_worker_main`
//! (`gpu_dispatch/worker.py`): a three-method contract (`setup`, `process`,
//! `cleanup`) run inside a process dedicated to one device, looping until a
//! stop sentinel or a read error (peer hung up) ends it.

mod runtime;

pub use runtime::worker_main;

use dispatch_core::ConfigMap;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// The capability interface a caller's task body must implement.
///
/// Each worker process constructs exactly one `Self` (via [`Default`]),
/// calls [`setup`](Worker::setup) once, then calls
/// [`process`](Worker::process) once per dequeued task until the worker is
/// told to stop, then calls [`cleanup`](Worker::cleanup) once before
/// exiting.
///
/// `Worker` values never cross a process boundary - only `Payload` and
/// `Output` values do, which is why those (and not `Self`) carry the
/// `Serialize`/`DeserializeOwned` bounds.
///
/// `setup`/`process`/`cleanup` run in a process whose stdout carries the
/// length-prefixed result stream back to the controller - writing to
/// stdout directly (rather than through the returned `Output`) corrupts
/// that stream. Use stderr, or a logging crate configured to target it,
/// for diagnostics.
pub trait Worker: Default + Send + 'static {
    /// The type of a single unit of work.
    type Payload: DeserializeOwned + Send + 'static;
    /// The type returned by a successful [`process`](Worker::process) call.
    type Output: Serialize + Send + 'static;

    /// One-time initialization: model load, device selection, seeding.
    /// Raising here reports `SetupFailed` and the worker exits without
    /// processing any tasks.
    fn setup(&mut self, device_id: usize, seed: u64, config: &ConfigMap) -> anyhow::Result<()>;

    /// Processes a single task. Raising here reports `TaskError`; the
    /// worker remains alive and keeps dequeuing subsequent tasks.
    fn process(&mut self, payload: Self::Payload) -> anyhow::Result<Self::Output>;

    /// Best-effort teardown. Raising here reports `CleanupFailed` but does
    /// not affect the task stream, which has already stopped by the time
    /// `cleanup` runs.
    fn cleanup(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
