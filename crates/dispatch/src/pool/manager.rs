//! Worker process pool: spawns one re-exec'd child per device id and
//! forwards its stdout frames onto the shared result channel.
//!
//! Tasks are *pulled*, not pushed: every worker runs its own loop racing
//! the single shared task channel, the same shape as the Python original's
//! workers all calling `ctx.Queue.get()` on one `multiprocessing.Queue`.
//! Each worker holds at most one task in flight at a time - it only pulls
//! its next task after the previous one's terminal result is observed -
//! which keeps total in-flight work bounded by the channel's own capacity
//! plus one per live worker, and means a worker that dies (setup failure
//! or a broken pipe) simply stops pulling; the tasks it never got to stay
//! in the shared channel for a surviving worker to pick up.

use crate::task::Task;
use dispatch_core::{ConfigMap, Error, ResultMessage, WireTask, WorkerState, read_frame, write_frame};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc::{Receiver, Sender, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const DEVICE_ID_VAR: &str = "DISPATCH_WORKER_DEVICE_ID";
const WORKER_ID_VAR: &str = "DISPATCH_WORKER_ID";
const SEED_VAR: &str = "DISPATCH_WORKER_SEED";
const CONFIG_VAR: &str = "DISPATCH_WORKER_CONFIG";
const TASK_TIMEOUT_VAR: &str = "DISPATCH_WORKER_TASK_TIMEOUT_SECS";

const GRACEFUL_JOIN: Duration = Duration::from_secs(3);
const TERMINATE_WAIT: Duration = Duration::from_millis(1_000);
const KILL_WAIT: Duration = Duration::from_millis(500);
const STOP_FRAME_WAIT: Duration = Duration::from_millis(500);

/// What a worker's result reader observed happen to its current task, fed
/// back to that worker's pull loop so it knows whether to pull the next
/// task or give up.
enum WorkerEvent {
    /// A terminal (success/error/timeout) message arrived; the worker is
    /// free to take another task.
    TaskDone,
    /// The worker failed `setup` - whatever task it was just handed, if
    /// any, will never be acknowledged.
    SetupFailed,
}

struct WorkerHandle {
    worker_id: usize,
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: tokio::sync::Mutex<Child>,
    state: Arc<Mutex<WorkerState>>,
    events: tokio::sync::Mutex<UnboundedReceiver<WorkerEvent>>,
}

/// Owns the worker processes for one `run()`. `P` is the task payload type,
/// `O` the worker's output type.
pub struct WorkerPool<P, O> {
    workers: Vec<WorkerHandle>,
    _marker: PhantomData<fn() -> (P, O)>,
}

impl<P, O> WorkerPool<P, O>
where
    P: Serialize + Send + 'static,
    O: DeserializeOwned + Send + 'static,
{
    /// Spawns `device_ids.len()` worker processes, each a re-exec of the
    /// current binary with a hidden marker env var set, and starts a reader
    /// task per worker forwarding its stdout frames onto `result_tx`.
    ///
    /// `worker_id` is set equal to `device_id` (the glossary's "1:1
    /// mapping"), not the position in `device_ids` - so callbacks and
    /// per-worker stats key on the same id a caller passed in, even for a
    /// non-contiguous device list.
    pub async fn spawn(
        device_ids: &[usize],
        base_seed: u64,
        config: &ConfigMap,
        task_timeout: Option<Duration>,
        suppress_output: bool,
        result_tx: UnboundedSender<ResultMessage<O>>,
    ) -> Result<Self, Error> {
        let current_exe = std::env::current_exe().map_err(|e| Error::Process {
            context: format!("failed to resolve current executable: {e}"),
        })?;
        let config_json = serde_json::to_string(config).map_err(|e| Error::Wire {
            context: format!("failed to encode worker config: {e}"),
        })?;

        let mut workers = Vec::with_capacity(device_ids.len());
        for &device_id in device_ids {
            let worker_id = device_id;
            let seed = base_seed.wrapping_add(device_id as u64);

            let mut command = Command::new(&current_exe);
            command
                .env(WORKER_ID_VAR, worker_id.to_string())
                .env(DEVICE_ID_VAR, device_id.to_string())
                .env(SEED_VAR, seed.to_string())
                .env(CONFIG_VAR, &config_json)
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped());
            if let Some(dur) = task_timeout {
                command.env(TASK_TIMEOUT_VAR, dur.as_secs_f64().to_string());
            }
            if suppress_output {
                command.stderr(std::process::Stdio::null());
            }

            let mut child = command.spawn().map_err(|e| Error::Process {
                context: format!("failed to spawn worker {worker_id} (device {device_id}): {e}"),
            })?;
            let stdin = child.stdin.take().ok_or_else(|| Error::Process {
                context: format!("worker {worker_id} missing stdin pipe"),
            })?;
            let stdout = child.stdout.take().ok_or_else(|| Error::Process {
                context: format!("worker {worker_id} missing stdout pipe"),
            })?;

            #[cfg(feature = "tracing")]
            tracing::debug!("spawned worker {worker_id} for device {device_id}, seed {seed}");

            let state = Arc::new(Mutex::new(WorkerState::Spawning));
            let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
            tokio::spawn(read_results(worker_id, stdout, state.clone(), result_tx.clone(), event_tx));

            workers.push(WorkerHandle {
                worker_id,
                stdin: tokio::sync::Mutex::new(stdin),
                child: tokio::sync::Mutex::new(child),
                state,
                events: tokio::sync::Mutex::new(event_rx),
            });
        }

        Ok(Self {
            workers,
            _marker: PhantomData,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn any_worker_usable(&self) -> bool {
        self.workers.iter().any(|w| is_usable(&w.state))
    }

    /// Writes `task` to worker `idx`'s stdin. On failure the task is
    /// handed back to the caller (nothing was lost) and the worker is
    /// marked [`WorkerState::Crashed`].
    async fn write_task(&self, idx: usize, task: Task<P>) -> Result<(), Task<P>> {
        let worker = &self.workers[idx];
        let wire = WireTask::Task {
            task_id: task.task_id,
            payload: task.payload,
        };
        let mut stdin = worker.stdin.lock().await;
        match write_frame(&mut *stdin, &wire).await {
            Ok(()) => Ok(()),
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("worker {} stdin write failed, marking crashed: {_e}", worker.worker_id);
                set_state(&worker.state, WorkerState::Crashed);
                let WireTask::Task { task_id, payload } = wire else {
                    unreachable!("constructed as Task above")
                };
                Err(Task { task_id, payload })
            }
        }
    }

    /// Sends `task` back onto the shared channel for another worker to
    /// pick up, unless no worker remains that could ever claim it.
    async fn requeue_or_drop(&self, task: Task<P>, requeue_tx: &Sender<Task<P>>, shutdown: &CancellationToken) {
        if !self.any_worker_usable() {
            #[cfg(feature = "tracing")]
            tracing::error!("dropping task {}, no live worker remains to requeue it to", task.task_id);
            return;
        }
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {}
            _ = requeue_tx.send(task) => {}
        }
    }

    /// Runs one worker's pull loop: take a task off the shared channel,
    /// write it to this worker's stdin, then wait for that worker's
    /// result reader to report the task done (or the worker to have
    /// failed setup) before pulling the next one.
    async fn worker_pull_loop(
        self: Arc<Self>,
        idx: usize,
        shared_rx: Arc<tokio::sync::Mutex<Receiver<Task<P>>>>,
        requeue_tx: Sender<Task<P>>,
        shutdown: CancellationToken,
    ) {
        loop {
            if !is_usable(&self.workers[idx].state) {
                break;
            }

            let task = {
                let mut rx = shared_rx.lock().await;
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => None,
                    maybe = rx.recv() => maybe,
                }
            };
            let Some(task) = task else { break };

            if let Err(task) = self.write_task(idx, task).await {
                self.requeue_or_drop(task, &requeue_tx, &shutdown).await;
                break;
            }

            let event = {
                let mut events = self.workers[idx].events.lock().await;
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => None,
                    e = events.recv() => e,
                }
            };
            match event {
                Some(WorkerEvent::TaskDone) => {}
                Some(WorkerEvent::SetupFailed) | None => break,
            }
        }
    }

    /// Consumes tasks off the bounded task channel, racing one pull loop
    /// per worker against it, until the channel closes or shutdown fires.
    ///
    /// `requeue_tx` must be a clone of the same sender the feeder holds -
    /// it is how a worker that dies mid-task hands its task back for a
    /// surviving worker to claim.
    ///
    /// Which worker actually ends up processing a given task is not
    /// meaningful beyond "it was idle first" - there is no round-robin
    /// assignment, so a fast worker naturally pulls more than a slow one.
    pub async fn run_dispatch_loop(
        self: Arc<Self>,
        task_rx: Receiver<Task<P>>,
        requeue_tx: Sender<Task<P>>,
        shutdown: CancellationToken,
    ) {
        let shared_rx = Arc::new(tokio::sync::Mutex::new(task_rx));

        let handles: Vec<_> = (0..self.workers.len())
            .map(|idx| {
                tokio::spawn(self.clone().worker_pull_loop(
                    idx,
                    shared_rx.clone(),
                    requeue_tx.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Full shutdown escalation: one `Stop` frame per worker (tolerating a
    /// full pipe rather than blocking forever), then a 3s graceful wait,
    /// then `SIGTERM` + 1s, then `SIGKILL` + 0.5s.
    ///
    /// Grounded in `WorkerPool::shutdown`'s phased teardown, generalized
    /// from "wait for an in-process ack" to "wait for a real OS process to
    /// exit and escalate signals if it doesn't".
    pub async fn shutdown(&self) -> Result<(), Error> {
        for worker in &self.workers {
            let mut stdin = worker.stdin.lock().await;
            match timeout(STOP_FRAME_WAIT, write_frame(&mut *stdin, &WireTask::<P>::Stop)).await {
                Ok(Err(_e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("worker {} did not accept stop frame: {_e}", worker.worker_id);
                }
                Err(_elapsed) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("worker {} stop frame timed out, escalating", worker.worker_id);
                }
                Ok(Ok(())) => {}
            }
        }

        for worker in &self.workers {
            reclaim_worker(worker).await;
        }

        Ok(())
    }
}

fn is_usable(state: &Mutex<WorkerState>) -> bool {
    !matches!(
        *state.lock().expect("worker state mutex poisoned"),
        WorkerState::SetupFailed | WorkerState::Terminated | WorkerState::Killed | WorkerState::Crashed | WorkerState::Drained
    )
}

async fn reclaim_worker(worker: &WorkerHandle) {
    let mut child = worker.child.lock().await;

    if timeout(GRACEFUL_JOIN, child.wait()).await.is_ok() {
        set_state(&worker.state, WorkerState::Terminated);
        return;
    }

    #[cfg(feature = "tracing")]
    tracing::warn!(
        "worker {} did not exit within {:?}, sending SIGTERM",
        worker.worker_id,
        GRACEFUL_JOIN
    );
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        );
    }
    if timeout(TERMINATE_WAIT, child.wait()).await.is_ok() {
        set_state(&worker.state, WorkerState::Terminated);
        return;
    }

    #[cfg(feature = "tracing")]
    tracing::error!(
        "worker {} ignored SIGTERM, sending SIGKILL",
        worker.worker_id
    );
    let _ = child.start_kill();
    let _ = timeout(KILL_WAIT, child.wait()).await;
    set_state(&worker.state, WorkerState::Killed);
}

fn set_state(state: &Mutex<WorkerState>, value: WorkerState) {
    let mut guard = state.lock().expect("worker state mutex poisoned");
    *guard = value;
}

async fn read_results<O>(
    worker_id: usize,
    mut stdout: tokio::process::ChildStdout,
    state: Arc<Mutex<WorkerState>>,
    result_tx: UnboundedSender<ResultMessage<O>>,
    event_tx: UnboundedSender<WorkerEvent>,
) where
    O: DeserializeOwned + Send + 'static,
{
    loop {
        let msg = match read_frame::<_, ResultMessage<O>>(&mut stdout).await {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("worker {worker_id} stdout read failed: {_e}");
                break;
            }
        };

        match &msg {
            ResultMessage::TaskStarted { .. } => set_state(&state, WorkerState::Running),
            ResultMessage::TaskSuccess { .. }
            | ResultMessage::TaskError { .. }
            | ResultMessage::TaskTimeout { .. } => {
                set_state(&state, WorkerState::Ready);
                let _ = event_tx.send(WorkerEvent::TaskDone);
            }
            ResultMessage::SetupFailed { .. } => {
                set_state(&state, WorkerState::SetupFailed);
                let _ = event_tx.send(WorkerEvent::SetupFailed);
            }
            ResultMessage::CleanupFailed { .. } => {}
        }

        let is_setup_failed = matches!(msg, ResultMessage::SetupFailed { .. });
        if result_tx.send(msg).is_err() {
            break;
        }
        if is_setup_failed {
            break;
        }
    }

    if !matches!(
        *state.lock().expect("worker state mutex poisoned"),
        WorkerState::SetupFailed | WorkerState::Terminated | WorkerState::Killed | WorkerState::Crashed
    ) {
        set_state(&state, WorkerState::Drained);
    }
}
