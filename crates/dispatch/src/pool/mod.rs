//! Spawns and owns the worker processes. Every worker pulls its own tasks
//! from one shared queue rather than having work pushed to it.
//!
//! Grounded in `ferroid-tonic-server::server::pool::{manager,worker}` for
//! the process lifecycle and phased shutdown, generalized from an
//! in-process `mpsc::Sender<WorkRequest>` to a real child process's stdin
//! pipe, since each worker here is a full OS process rather than a task on
//! the same runtime. The pull-based dispatch itself mirrors the Python
//! original's workers sharing one `multiprocessing.Queue`.

mod manager;

pub use manager::WorkerPool;
