//! The child-process side of a worker: reads `WireTask` frames from its
//! inherited stdin, drives a `W: Worker` through its lifecycle, and writes
//! `ResultMessage` frames to its inherited stdout.
//!
//! Grounded in `gpu_dispatch/worker.py`'s `_worker_main` loop, with the
//! `SIGALRM`-based timeout replaced by a `spawn_blocking` race (see the
//! module-level note on why: `signal::alarm` is UB across threads and has
//! no portable equivalent outside Unix).

use super::Worker;
use dispatch_core::{ConfigMap, ResultMessage, WireTask, read_frame, write_frame};
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::io::{Stdout, stdin, stdout};

const DEVICE_ID_VAR: &str = "DISPATCH_WORKER_DEVICE_ID";
const WORKER_ID_VAR: &str = "DISPATCH_WORKER_ID";
const SEED_VAR: &str = "DISPATCH_WORKER_SEED";
const CONFIG_VAR: &str = "DISPATCH_WORKER_CONFIG";
const TASK_TIMEOUT_VAR: &str = "DISPATCH_WORKER_TASK_TIMEOUT_SECS";

struct WorkerParams {
    worker_id: usize,
    device_id: usize,
    seed: u64,
    config: ConfigMap,
    task_timeout: Option<Duration>,
}

impl WorkerParams {
    /// Reads the env vars the controller sets before spawning this process.
    /// Returns `None` when they're absent, meaning this invocation is the
    /// ordinary (controller) entrypoint, not a worker re-exec.
    fn from_env() -> Option<Self> {
        let worker_id = std::env::var(WORKER_ID_VAR).ok()?.parse().ok()?;
        let device_id = std::env::var(DEVICE_ID_VAR).ok()?.parse().ok()?;
        let seed = std::env::var(SEED_VAR).ok()?.parse().ok()?;
        let config = std::env::var(CONFIG_VAR)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        let task_timeout = std::env::var(TASK_TIMEOUT_VAR)
            .ok()
            .and_then(|raw| raw.parse::<f64>().ok())
            .map(Duration::from_secs_f64);
        Some(Self {
            worker_id,
            device_id,
            seed,
            config,
            task_timeout,
        })
    }
}

/// Entrypoint a binary embedding this crate must call first thing in its
/// own `main`, before any other setup.
///
/// If the current process was re-exec'd by a [`crate::Controller`] as a
/// worker, this runs the worker's entire lifecycle to completion and then
/// terminates the process - it never returns in that case. Otherwise it
/// returns immediately and the caller's `main` proceeds as the controller.
pub fn worker_main<W: Worker>() -> anyhow::Result<()> {
    let Some(params) = WorkerParams::from_env() else {
        return Ok(());
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run::<W>(params));
    std::process::exit(0);
}

async fn run<W: Worker>(params: WorkerParams) {
    let WorkerParams {
        worker_id,
        device_id,
        seed,
        config,
        task_timeout,
    } = params;

    let mut stdin = stdin();
    let mut stdout = stdout();

    let mut worker = W::default();
    if let Err(e) = worker.setup(device_id, seed, &config) {
        let _ = write_frame(
            &mut stdout,
            &ResultMessage::<W::Output>::SetupFailed {
                worker_id,
                error_text: format!("{e:#}"),
            },
        )
        .await;
        return;
    }

    loop {
        let frame = match read_frame::<_, WireTask<W::Payload>>(&mut stdin).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(_) => break,
        };
        match frame {
            WireTask::Stop => break,
            WireTask::Task { task_id, payload } => {
                worker = run_task(
                    worker_id,
                    task_id,
                    payload,
                    worker,
                    task_timeout,
                    &mut stdout,
                )
                .await;
            }
        }
    }

    if let Err(e) = worker.cleanup() {
        let _ = write_frame(
            &mut stdout,
            &ResultMessage::<W::Output>::CleanupFailed {
                worker_id,
                error_text: format!("{e:#}"),
            },
        )
        .await;
    }
}

/// Runs one `process()` call for `worker`, reporting `TaskStarted` then a
/// terminal message, and returns the (possibly reclaimed-after-timeout)
/// worker so the caller can keep dequeuing.
async fn run_task<W: Worker>(
    worker_id: usize,
    task_id: u64,
    payload: W::Payload,
    worker: W,
    task_timeout: Option<Duration>,
    stdout: &mut Stdout,
) -> W {
    let _ = write_frame(
        stdout,
        &ResultMessage::<W::Output>::TaskStarted { task_id, worker_id },
    )
    .await;

    let mut handle = tokio::task::spawn_blocking(move || run_blocking(worker, payload));

    let (worker, outcome) = match task_timeout {
        None => match handle.await {
            Ok(pair) => pair,
            Err(e) => return panicked_worker::<W>(worker_id, task_id, e, stdout).await,
        },
        Some(dur) => {
            match tokio::time::timeout(dur, &mut handle).await {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => return panicked_worker::<W>(worker_id, task_id, e, stdout).await,
                Err(_elapsed) => {
                    let _ = write_frame(
                        stdout,
                        &ResultMessage::<W::Output>::TaskTimeout {
                            task_id,
                            timeout_seconds: dur.as_secs_f64(),
                            worker_id,
                        },
                    )
                    .await;
                    // The blocking call cannot be preempted; wait for it to
                    // finish naturally so `worker` can be reclaimed before
                    // the next dequeue.
                    match handle.await {
                        Ok((worker, _discarded)) => (worker, None),
                        Err(e) => return panicked_worker::<W>(worker_id, task_id, e, stdout).await,
                    }
                }
            }
        }
    };

    if let Some(result) = outcome {
        let msg = match result {
            Ok(data) => ResultMessage::TaskSuccess {
                task_id,
                data,
                worker_id,
            },
            Err(e) => ResultMessage::TaskError {
                task_id,
                error_text: format!("{e:#}"),
                worker_id,
            },
        };
        let _ = write_frame(stdout, &msg).await;
    }

    worker
}

type BlockingOutcome<W> = (W, Option<anyhow::Result<<W as Worker>::Output>>);

fn run_blocking<W: Worker>(mut worker: W, payload: W::Payload) -> BlockingOutcome<W> {
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| worker.process(payload)))
        .unwrap_or_else(|payload| Err(anyhow::anyhow!(panic_message(payload))));
    (worker, Some(result))
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker process() panicked".to_string()
    }
}

/// The blocking pool itself was torn down mid-call (e.g. the runtime is
/// shutting down). There's no `worker` to reclaim; report the failure as a
/// task error and let the caller's dequeue loop observe stdin EOF next.
async fn panicked_worker<W: Worker>(
    worker_id: usize,
    task_id: u64,
    err: tokio::task::JoinError,
    stdout: &mut Stdout,
) -> W {
    let _ = write_frame(
        stdout,
        &ResultMessage::<W::Output>::TaskError {
            task_id,
            error_text: format!("worker task was lost: {err}"),
            worker_id,
        },
    )
    .await;
    std::process::exit(1);
}
