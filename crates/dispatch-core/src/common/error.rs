//! Error types for the dispatch worker-pool engine.
//!
//! This module defines the central `Error` enum returned by
//! `Controller::run`. Per-task failures (a single `process()` call raising,
//! or timing out) are never represented here — they are delivered to the
//! caller through result callbacks and do not abort the run. Only
//! configuration mistakes and the fatal "every worker failed setup"
//! condition surface as an `Error`.

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the dispatch worker-pool engine.
#[derive(Clone, thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A precondition of `Controller::new`/`run` was violated (empty device
    /// list, zero queue size, wrong worker type).
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Every worker process failed during `setup`; there is no one left to
    /// dispatch tasks to.
    #[error("all workers failed during setup")]
    AllWorkersSetupFailed,

    /// A channel between the controller and a background task was closed
    /// unexpectedly.
    #[error("channel error: {context}")]
    ChannelClosed { context: String },

    /// Spawning, writing to, or reading from a worker process failed.
    #[error("worker process error: {context}")]
    Process { context: String },

    /// A frame read from or written to a worker's stdio pipe was malformed.
    #[error("wire protocol error: {context}")]
    Wire { context: String },
}
