//! Drains the result channel, invokes user callbacks in arrival order, and
//! detects the two ways a run ends: every task terminal-reported, or every
//! worker failing setup.
//!
//! Runs as a loop on the controller's own future (`ferroid-tonic-server`'s
//! single-future async model), not a dedicated OS thread.

use crate::callbacks::Callbacks;
use dispatch_core::{Error, ResultMessage};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Runs until either every task has been terminal-reported and the feeder
/// is done, every worker has failed setup, or `shutdown` fires.
///
/// On the fatal "every worker failed setup" path, this returns
/// [`Error::AllWorkersSetupFailed`]. Results still buffered in the channel
/// when `shutdown` fires are dropped, not delivered.
pub async fn run_monitor<O>(
    mut result_rx: UnboundedReceiver<ResultMessage<O>>,
    mut callbacks: Callbacks<O>,
    worker_count: usize,
    task_count: Arc<AtomicU64>,
    feeder_done: Arc<AtomicBool>,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    let mut active_workers = worker_count;
    let mut terminal_count: u64 = 0;

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            res = tokio::time::timeout(POLL_TIMEOUT, result_rx.recv()) => {
                match res {
                    Ok(Some(msg)) => {
                        if dispatch(msg, &mut callbacks, &mut active_workers) {
                            terminal_count += 1;
                        }
                        if active_workers == 0 {
                            return Err(Error::AllWorkersSetupFailed);
                        }
                    }
                    Ok(None) => break,
                    Err(_elapsed) => {}
                }
            }
        }

        if feeder_done.load(Ordering::Acquire) && terminal_count >= task_count.load(Ordering::Acquire) {
            break;
        }
    }

    Ok(())
}

/// Applies one message to `callbacks`, returning `true` if it was a
/// terminal (success/error/timeout) message.
fn dispatch<O>(msg: ResultMessage<O>, callbacks: &mut Callbacks<O>, active_workers: &mut usize) -> bool {
    match msg {
        ResultMessage::TaskStarted { task_id, worker_id } => {
            if let Some(cb) = callbacks.on_task_start.as_mut() {
                cb(task_id, worker_id);
            }
            false
        }
        ResultMessage::TaskSuccess {
            task_id,
            data,
            worker_id,
        } => {
            (callbacks.on_success)(task_id, data, worker_id);
            true
        }
        ResultMessage::TaskError {
            task_id,
            error_text,
            worker_id,
        } => {
            if let Some(cb) = callbacks.on_error.as_mut() {
                cb(task_id, error_text, worker_id);
            }
            true
        }
        ResultMessage::TaskTimeout {
            task_id,
            timeout_seconds,
            worker_id,
        } => {
            if let Some(cb) = callbacks.on_timeout.as_mut() {
                cb(task_id, timeout_seconds, worker_id);
            }
            true
        }
        ResultMessage::SetupFailed {
            worker_id,
            error_text,
        } => {
            if let Some(cb) = callbacks.on_setup_fail.as_mut() {
                cb(worker_id, error_text);
            }
            *active_workers -= 1;
            false
        }
        ResultMessage::CleanupFailed {
            worker_id: _worker_id,
            error_text: _error_text,
        } => {
            #[cfg(feature = "tracing")]
            tracing::warn!("worker {_worker_id} cleanup failed: {_error_text}");
            false
        }
    }
}
