//! Shared types for the dispatch worker-pool engine.
//!
//! - [`error`] - the unified [`error::Error`] type returned by `Controller::run`.
//! - [`message`] - tagged result variants flowing worker -> controller.
//! - [`config`] - the typed key/value map forwarded to `Worker::setup`.
//! - [`wire`] - the length-prefixed framing used over a worker's stdio pipes.

mod config;
mod error;
mod message;
mod wire;

pub use config::ConfigMap;
pub use error::{Error, Result};
pub use message::{ResultMessage, WorkerState};
pub use wire::{WireTask, read_frame, write_frame};
