use anyhow::bail;
use clap::Parser;

/// Runs the demo dispatcher: doubles a range of integers across a pool of
/// worker processes.
#[derive(Parser, Debug, Clone)]
#[command(name = "dispatch-cli", version, about = "Demo binary for the dispatch worker-pool engine")]
pub struct CliArgs {
    /// Comma-separated device ids, one worker process per id.
    ///
    /// Environment variable: `DEVICE_IDS`
    #[arg(long, env = "DEVICE_IDS", default_value = "0", value_delimiter = ',')]
    pub device_ids: Vec<usize>,

    /// Number of items to feed through the dispatcher.
    ///
    /// Environment variable: `TASK_COUNT`
    #[arg(long, env = "TASK_COUNT", default_value_t = 100)]
    pub task_count: i64,

    /// Bounded capacity of the task channel.
    ///
    /// Environment variable: `QUEUE_SIZE`
    #[arg(long, env = "QUEUE_SIZE", default_value_t = 1024)]
    pub queue_size: usize,

    /// Base seed; each worker's seed is `base_seed + device_id`.
    ///
    /// Environment variable: `BASE_SEED`
    #[arg(long, env = "BASE_SEED", default_value_t = 42)]
    pub base_seed: u64,

    /// Per-task wall-clock timeout, in seconds. Absent means no timeout.
    ///
    /// Environment variable: `TASK_TIMEOUT_SECS`
    #[arg(long, env = "TASK_TIMEOUT_SECS")]
    pub task_timeout_secs: Option<f64>,

    /// Redirect worker stderr to `/dev/null`.
    ///
    /// Environment variable: `SUPPRESS_WORKER_OUTPUT`
    #[arg(long, env = "SUPPRESS_WORKER_OUTPUT", default_value_t = false)]
    pub suppress_worker_output: bool,
}

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub device_ids: Vec<usize>,
    pub task_count: i64,
    pub queue_size: usize,
    pub base_seed: u64,
    pub task_timeout_secs: Option<f64>,
    pub suppress_worker_output: bool,
}

impl TryFrom<CliArgs> for CliConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.device_ids.is_empty() {
            bail!("DEVICE_IDS must name at least one device");
        }
        if args.queue_size == 0 {
            bail!("QUEUE_SIZE must be greater than 0");
        }

        Ok(Self {
            device_ids: args.device_ids,
            task_count: args.task_count,
            queue_size: args.queue_size,
            base_seed: args.base_seed,
            task_timeout_secs: args.task_timeout_secs,
            suppress_worker_output: args.suppress_worker_output,
        })
    }
}
