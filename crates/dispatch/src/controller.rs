//! The top-level entrypoint: wires the feeder, worker pool, and monitor
//! together and drives one `run()` from start to a fully shut-down finish.
//!
//! Grounded in `ferroid-tonic-server::main`'s `shutdown_signal` (raced
//! `ctrl_c`/`SIGTERM` futures) and `WorkerPool::shutdown`'s phased teardown
//! (`=== Phase 0/1/2/3 ===`), generalized from "one gRPC server" to "one
//! dispatcher run".

use crate::callbacks::Callbacks;
use crate::config::ControllerConfig;
use crate::feeder::run_feeder;
use crate::monitor::run_monitor;
use crate::pool::WorkerPool;
use crate::worker::Worker;
use dispatch_core::{ConfigMap, Error};
use futures::Stream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-`run()` parameters that vary independently of [`ControllerConfig`].
#[derive(Debug, Clone)]
pub struct RunParams {
    pub base_seed: u64,
    pub task_timeout: Option<Duration>,
    pub config: ConfigMap,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            base_seed: 42,
            task_timeout: None,
            config: ConfigMap::default(),
        }
    }
}

/// Coordinates one or more dispatcher runs against a fixed
/// [`ControllerConfig`].
pub struct Controller {
    config: ControllerConfig,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Runs `stream` through a fresh pool of `W` workers to completion.
    ///
    /// Returns `Ok(())` on a normal finish (every task terminal-reported)
    /// or a caller interrupt (`SIGINT`/`SIGTERM`), and
    /// `Err(Error::AllWorkersSetupFailed)` if every worker fails `setup`.
    pub async fn run<W: Worker>(
        &self,
        stream: impl Stream<Item = W::Payload> + Send + 'static,
        callbacks: Callbacks<W::Output>,
        params: RunParams,
    ) -> Result<(), Error> {
        let shutdown = CancellationToken::new();
        let task_count = Arc::new(AtomicU64::new(0));
        let feeder_done = Arc::new(AtomicBool::new(false));

        let (task_tx, task_rx) = tokio::sync::mpsc::channel(self.config.queue_size);
        let (result_tx, result_rx) = tokio::sync::mpsc::unbounded_channel();

        let signal_task = install_signal_handlers(shutdown.clone());

        let pool = Arc::new(
            WorkerPool::<W::Payload, W::Output>::spawn(
                &self.config.device_ids,
                params.base_seed,
                &params.config,
                params.task_timeout,
                self.config.suppress_worker_output,
                result_tx,
            )
            .await?,
        );

        // Cloned before the feeder takes ownership of the original sender:
        // this is the same channel the feeder pushes onto, so a worker that
        // dies mid-task can hand its task back for a surviving worker to
        // pick up.
        let requeue_tx = task_tx.clone();

        let feeder_handle = tokio::spawn(run_feeder(
            Box::pin(stream),
            task_tx,
            shutdown.clone(),
            task_count.clone(),
            feeder_done.clone(),
        ));

        let dispatch_pool = pool.clone();
        let dispatch_shutdown = shutdown.clone();
        let dispatch_handle = tokio::spawn(async move {
            dispatch_pool
                .run_dispatch_loop(task_rx, requeue_tx, dispatch_shutdown)
                .await
        });

        let Callbacks {
            on_success,
            on_error,
            on_timeout,
            on_setup_fail,
            on_task_start,
            on_exit,
        } = callbacks;
        let monitor_callbacks = Callbacks {
            on_success,
            on_error,
            on_timeout,
            on_setup_fail,
            on_task_start,
            on_exit: None,
        };

        let monitor_result = run_monitor(
            result_rx,
            monitor_callbacks,
            pool.worker_count(),
            task_count,
            feeder_done,
            shutdown.clone(),
        )
        .await;

        // Shutdown order mirrors WorkerPool::shutdown's phases: stop
        // accepting new work, run on_exit, then reclaim worker processes.
        shutdown.cancel();
        signal_task.abort();

        if let Some(on_exit) = on_exit {
            on_exit();
        }

        let _ = feeder_handle.await;
        let _ = dispatch_handle.await;
        pool.shutdown().await?;

        monitor_result
    }
}

/// Races `SIGINT`/`SIGTERM` and cancels `shutdown` on either, the same
/// two-future `select!` `main.rs::shutdown_signal` uses, generalized into
/// a background task the controller owns for the lifetime of one `run()`.
fn install_signal_handlers(shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(_) => std::future::pending::<()>().await,
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };

        tokio::select! {
            () = ctrl_c => {
                #[cfg(feature = "tracing")]
                tracing::info!("received Ctrl+C, shutting down");
            }
            () = terminate => {
                #[cfg(feature = "tracing")]
                tracing::info!("received SIGTERM, shutting down");
            }
        }
        shutdown.cancel();
    })
}
