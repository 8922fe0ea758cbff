mod config;
mod worker;

use clap::Parser;
use config::{CliArgs, CliConfig};
use dispatch::{Callbacks, CallbacksBuilder, Controller, ControllerConfig, RunParams, StatsOverlay};
use std::time::{Duration, Instant};
use worker::DoublingWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Needs to run before anything else: if this process was re-exec'd as a
    // worker, this drives its whole lifecycle and never returns.
    dispatch::worker_main::<DoublingWorker>()?;

    let _ = dotenvy::dotenv();
    init_tracing();

    let args = CliArgs::parse();
    let config = CliConfig::try_from(args)?;

    let controller = Controller::new(ControllerConfig {
        device_ids: config.device_ids.clone(),
        queue_size: config.queue_size,
        suppress_worker_output: config.suppress_worker_output,
    })?;

    let stream = Box::pin(tokio_stream::iter(0..config.task_count));

    let callbacks: Callbacks<i64> = CallbacksBuilder::new()
        .on_success(|task_id, data, worker_id| {
            tracing::info!(task_id, data, worker_id, "task succeeded");
        })
        .on_error(|task_id, error_text, worker_id| {
            tracing::warn!(task_id, error_text, worker_id, "task failed");
        })
        .on_timeout(|task_id, timeout_seconds, worker_id| {
            tracing::warn!(task_id, timeout_seconds, worker_id, "task timed out");
        })
        .on_setup_fail(|worker_id, error_text| {
            tracing::error!(worker_id, error_text, "worker setup failed");
        })
        .build();

    let (overlay, callbacks) = StatsOverlay::install(&config.device_ids, Instant::now(), callbacks);

    let run_params = RunParams {
        base_seed: config.base_seed,
        task_timeout: config.task_timeout_secs.map(Duration::from_secs_f64),
        config: dispatch_core::ConfigMap::new(),
    };

    controller.run::<DoublingWorker>(stream, callbacks, run_params).await?;

    let stats = overlay.snapshot();
    tracing::info!(
        total = stats.total,
        completed = stats.completed,
        failed = stats.failed,
        timeouts = stats.timeouts,
        setup_failures = stats.setup_failures,
        "run finished"
    );

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
