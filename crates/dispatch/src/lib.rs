#![doc = include_str!("../README.md")]

mod callbacks;
mod config;
mod controller;
mod feeder;
mod monitor;
mod pool;
#[cfg(feature = "stats")]
mod stats;
mod task;
mod worker;

pub use callbacks::{Callbacks, CallbacksBuilder};
pub use config::ControllerConfig;
pub use controller::{Controller, RunParams};
pub use dispatch_core::{ConfigMap, Error, ResultMessage, WorkerState};
pub use task::Task;
pub use worker::{Worker, worker_main};

#[cfg(feature = "stats")]
pub use stats::{Stats, StatsOverlay, WorkerStats, WorkerStatus};
