//! Controller construction parameters.
//!
//! Grounded in `ferroid-tonic-server::server::config::ServerConfig`'s
//! validate-at-construction style, minus the CLI parsing - `Controller` is
//! a library type, not a binary's entrypoint, so validation happens in
//! [`ControllerConfig::validate`] rather than via `TryFrom<CliArgs>`.

use dispatch_core::Error;

/// Parameters fixed for the lifetime of a [`crate::Controller`], independent
/// of any single `run()` call's stream or callbacks.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// One worker process is spawned per entry; `worker_id` is the entry's
    /// index, `device_id` is its value.
    pub device_ids: Vec<usize>,
    /// Bounded capacity of the task channel between the feeder and the
    /// worker pool.
    pub queue_size: usize,
    /// Redirects worker stderr to `/dev/null` instead of inheriting it.
    pub suppress_worker_output: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            device_ids: vec![0],
            queue_size: 1024,
            suppress_worker_output: false,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.device_ids.is_empty() {
            return Err(Error::InvalidConfig {
                reason: "device_ids must not be empty".to_string(),
            });
        }
        if self.queue_size == 0 {
            return Err(Error::InvalidConfig {
                reason: "queue_size must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
