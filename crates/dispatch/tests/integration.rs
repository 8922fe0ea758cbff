//! End-to-end scenarios against real worker processes.
//!
//! This binary is its own worker: `harness = false` (see `Cargo.toml`) so
//! we control `main`, calling `dispatch::worker_main::<TestWorker>()`
//! first, exactly as any binary embedding this crate must. When
//! `Controller::run` re-execs this same test binary as a worker, that call
//! drives the whole worker lifecycle and the process exits without ever
//! reaching the scenario runner below.
//!
//! Named and shaped after the original Python suite's `test_basic.py` /
//! `test_integration.py` fixtures (`SimpleWorker`, `SlowWorker`,
//! `FailingSetupWorker`, `FailingProcessWorker`), reimplemented here as one
//! configurable `TestWorker` since a single process can only embed one
//! `Worker` type per `worker_main` call.

use dispatch::{CallbacksBuilder, ConfigMap, Controller, ControllerConfig, RunParams, Worker};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
enum TestKind {
    #[default]
    Simple,
    Slow,
    FailingProcess,
    /// Sleeps for a duration carried in the payload itself (milliseconds),
    /// rather than a fixed one - used to drive a mix of timeouts and
    /// successes out of a single worker pool.
    Variable,
}

#[derive(Default)]
struct TestWorker {
    kind: TestKind,
    multiplier: i64,
}

impl Worker for TestWorker {
    type Payload = i64;
    type Output = i64;

    fn setup(&mut self, device_id: usize, _seed: u64, config: &ConfigMap) -> anyhow::Result<()> {
        let kind: String = config.get_as("test_kind").unwrap_or_else(|| "simple".to_string());
        if kind == "failing_setup" {
            anyhow::bail!("injected setup failure");
        }
        if kind == "failing_setup_odd_device" && device_id % 2 == 1 {
            anyhow::bail!("injected setup failure for odd device {device_id}");
        }
        self.kind = match kind.as_str() {
            "slow" => TestKind::Slow,
            "failing_process" => TestKind::FailingProcess,
            "variable" => TestKind::Variable,
            _ => TestKind::Simple,
        };
        self.multiplier = config.get_as("multiplier").unwrap_or(2);
        Ok(())
    }

    fn process(&mut self, payload: i64) -> anyhow::Result<i64> {
        match self.kind {
            TestKind::Simple => Ok(payload * self.multiplier),
            TestKind::Slow => {
                std::thread::sleep(Duration::from_secs_f64(1.0));
                Ok(payload * self.multiplier)
            }
            TestKind::FailingProcess => {
                if payload % 10 == 0 {
                    anyhow::bail!("injected failure for task {payload}");
                }
                Ok(payload * self.multiplier)
            }
            TestKind::Variable => {
                std::thread::sleep(Duration::from_millis(payload as u64));
                Ok(payload)
            }
        }
    }
}

fn main() {
    if let Err(e) = dispatch::worker_main::<TestWorker>() {
        eprintln!("worker_main failed: {e:#}");
        std::process::exit(1);
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build test runtime");

    let scenarios: Vec<(&str, fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>>>>)> = vec![
        ("s1_basic_doubling", || Box::pin(s1_basic_doubling())),
        ("s2_multi_device_spread", || Box::pin(s2_multi_device_spread())),
        ("s3_error_recovery", || Box::pin(s3_error_recovery())),
        ("s4_setup_failure_is_fatal", || Box::pin(s4_setup_failure_is_fatal())),
        ("s5_timeout", || Box::pin(s5_timeout())),
        ("s6_mixed_timeouts", || Box::pin(s6_mixed_timeouts())),
        (
            "s7_partial_setup_failure_drains_via_surviving_workers",
            || Box::pin(s7_partial_setup_failure_drains_via_surviving_workers()),
        ),
    ];

    let mut failed = false;
    for (name, f) in scenarios {
        print!("test {name} ... ");
        match rt.block_on(f()) {
            Ok(()) => println!("ok"),
            Err(e) => {
                println!("FAILED: {e:#}");
                failed = true;
            }
        }
    }

    std::process::exit(if failed { 1 } else { 0 });
}

type Successes = Arc<Mutex<Vec<(u64, i64, usize)>>>;
type Errors = Arc<Mutex<Vec<(u64, String, usize)>>>;
type Timeouts = Arc<Mutex<Vec<(u64, f64, usize)>>>;

fn shared<T: Default>() -> Arc<Mutex<T>> {
    Arc::new(Mutex::new(T::default()))
}

async fn s1_basic_doubling() -> anyhow::Result<()> {
    let controller = Controller::new(ControllerConfig {
        device_ids: vec![0],
        queue_size: 16,
        suppress_worker_output: true,
    })?;

    let successes: Successes = shared();
    let s = successes.clone();
    let callbacks = CallbacksBuilder::new()
        .on_success(move |task_id, data, worker_id| s.lock().unwrap().push((task_id, data, worker_id)))
        .build();

    controller
        .run::<TestWorker>(
            tokio_stream::iter(0_i64..10),
            callbacks,
            RunParams {
                base_seed: 42,
                task_timeout: None,
                config: ConfigMap::new(),
            },
        )
        .await?;

    let results = successes.lock().unwrap();
    anyhow::ensure!(results.len() == 10, "expected 10 successes, got {}", results.len());
    for (task_id, data, worker_id) in results.iter() {
        anyhow::ensure!(*data == (*task_id as i64) * 2, "task {task_id} expected doubled value");
        anyhow::ensure!(*worker_id == 0, "expected worker_id 0, got {worker_id}");
    }
    Ok(())
}

async fn s2_multi_device_spread() -> anyhow::Result<()> {
    let controller = Controller::new(ControllerConfig {
        device_ids: vec![0, 1, 2, 3],
        queue_size: 64,
        suppress_worker_output: true,
    })?;

    let successes: Successes = shared();
    let s = successes.clone();
    let callbacks = CallbacksBuilder::new()
        .on_success(move |task_id, data, worker_id| s.lock().unwrap().push((task_id, data, worker_id)))
        .build();

    controller
        .run::<TestWorker>(
            tokio_stream::iter(0_i64..1000),
            callbacks,
            RunParams {
                base_seed: 42,
                task_timeout: None,
                config: ConfigMap::new(),
            },
        )
        .await?;

    let results = successes.lock().unwrap();
    anyhow::ensure!(results.len() == 1000, "expected 1000 successes, got {}", results.len());

    let mut per_device: HashMap<usize, usize> = HashMap::new();
    for (_, _, worker_id) in results.iter() {
        *per_device.entry(*worker_id).or_default() += 1;
    }
    anyhow::ensure!(per_device.len() == 4, "expected all 4 devices to handle work");
    for (&worker_id, &count) in &per_device {
        anyhow::ensure!(
            count >= 175,
            "device {worker_id} handled only {count} tasks, expected within 30% of 250"
        );
    }
    Ok(())
}

async fn s3_error_recovery() -> anyhow::Result<()> {
    let controller = Controller::new(ControllerConfig {
        device_ids: vec![0, 1],
        queue_size: 32,
        suppress_worker_output: true,
    })?;

    let successes: Successes = shared();
    let errors: Errors = shared();
    let s = successes.clone();
    let e = errors.clone();
    let callbacks = CallbacksBuilder::new()
        .on_success(move |task_id, data, worker_id| s.lock().unwrap().push((task_id, data, worker_id)))
        .on_error(move |task_id, error_text, worker_id| e.lock().unwrap().push((task_id, error_text, worker_id)))
        .build();

    let mut config = ConfigMap::new();
    config.insert("test_kind", "failing_process");

    controller
        .run::<TestWorker>(
            tokio_stream::iter(0_i64..100),
            callbacks,
            RunParams {
                base_seed: 42,
                task_timeout: None,
                config,
            },
        )
        .await?;

    let successes = successes.lock().unwrap();
    let errors = errors.lock().unwrap();
    anyhow::ensure!(successes.len() == 90, "expected 90 successes, got {}", successes.len());
    anyhow::ensure!(errors.len() == 10, "expected 10 errors, got {}", errors.len());

    let mut error_ids: Vec<u64> = errors.iter().map(|(id, _, _)| *id).collect();
    error_ids.sort_unstable();
    let expected: Vec<u64> = (0..10).map(|i| i * 10).collect();
    anyhow::ensure!(error_ids == expected, "expected error ids {expected:?}, got {error_ids:?}");
    Ok(())
}

async fn s4_setup_failure_is_fatal() -> anyhow::Result<()> {
    let controller = Controller::new(ControllerConfig {
        device_ids: vec![0],
        queue_size: 16,
        suppress_worker_output: true,
    })?;

    let successes: Successes = shared();
    let setup_fails = Arc::new(AtomicUsize::new(0));
    let s = successes.clone();
    let sf = setup_fails.clone();
    let callbacks = CallbacksBuilder::new()
        .on_success(move |task_id, data, worker_id| s.lock().unwrap().push((task_id, data, worker_id)))
        .on_setup_fail(move |_worker_id, _error_text| {
            sf.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    let mut config = ConfigMap::new();
    config.insert("test_kind", "failing_setup");

    let result = controller
        .run::<TestWorker>(
            tokio_stream::iter(0_i64..10),
            callbacks,
            RunParams {
                base_seed: 42,
                task_timeout: None,
                config,
            },
        )
        .await;

    anyhow::ensure!(result.is_err(), "expected all_workers_setup_failed error");
    anyhow::ensure!(setup_fails.load(Ordering::SeqCst) == 1, "expected on_setup_fail to fire once");
    anyhow::ensure!(successes.lock().unwrap().is_empty(), "expected no successes delivered");
    Ok(())
}

async fn s5_timeout() -> anyhow::Result<()> {
    let controller = Controller::new(ControllerConfig {
        device_ids: vec![0],
        queue_size: 16,
        suppress_worker_output: true,
    })?;

    let successes: Successes = shared();
    let timeouts: Timeouts = shared();
    let s = successes.clone();
    let t = timeouts.clone();
    let callbacks = CallbacksBuilder::new()
        .on_success(move |task_id, data, worker_id| s.lock().unwrap().push((task_id, data, worker_id)))
        .on_timeout(move |task_id, timeout_seconds, worker_id| {
            t.lock().unwrap().push((task_id, timeout_seconds, worker_id))
        })
        .build();

    let mut config = ConfigMap::new();
    config.insert("test_kind", "slow");

    let start = std::time::Instant::now();
    controller
        .run::<TestWorker>(
            tokio_stream::iter(0_i64..5),
            callbacks,
            RunParams {
                base_seed: 42,
                task_timeout: Some(Duration::from_secs_f64(0.5)),
                config,
            },
        )
        .await?;
    let elapsed = start.elapsed();

    anyhow::ensure!(successes.lock().unwrap().is_empty(), "expected 0 successes");
    anyhow::ensure!(timeouts.lock().unwrap().len() == 5, "expected 5 timeouts");
    anyhow::ensure!(elapsed <= Duration::from_secs(10), "expected run to finish within 10s, took {elapsed:?}");
    Ok(())
}

async fn s6_mixed_timeouts() -> anyhow::Result<()> {
    let controller = Controller::new(ControllerConfig {
        device_ids: vec![0],
        queue_size: 16,
        suppress_worker_output: true,
    })?;

    let successes: Successes = shared();
    let timeouts: Timeouts = shared();
    let s = successes.clone();
    let t = timeouts.clone();
    let callbacks = CallbacksBuilder::new()
        .on_success(move |task_id, data, worker_id| s.lock().unwrap().push((task_id, data, worker_id)))
        .on_timeout(move |task_id, timeout_seconds, worker_id| {
            t.lock().unwrap().push((task_id, timeout_seconds, worker_id))
        })
        .build();

    let mut config = ConfigMap::new();
    config.insert("test_kind", "variable");

    let durations_ms = vec![100_i64, 100, 2000, 100, 3000, 100, 100];

    controller
        .run::<TestWorker>(
            tokio_stream::iter(durations_ms),
            callbacks,
            RunParams {
                base_seed: 42,
                task_timeout: Some(Duration::from_secs_f64(1.0)),
                config,
            },
        )
        .await?;

    let mut success_ids: Vec<u64> = successes.lock().unwrap().iter().map(|(id, _, _)| *id).collect();
    success_ids.sort_unstable();
    let mut timeout_ids: Vec<u64> = timeouts.lock().unwrap().iter().map(|(id, _, _)| *id).collect();
    timeout_ids.sort_unstable();

    anyhow::ensure!(success_ids == vec![0, 1, 3, 5, 6], "unexpected success ids: {success_ids:?}");
    anyhow::ensure!(timeout_ids == vec![2, 4], "unexpected timeout ids: {timeout_ids:?}");
    Ok(())
}

/// Some-but-not-all workers fail `setup` (devices 1 and 3, of 0..3): the
/// run must still complete every task through the surviving workers
/// rather than hanging. Regression scenario for a deadlock where a dead
/// worker's share of a round-robin fan-out was silently dropped, so
/// `terminal_count` never reached `task_count`.
async fn s7_partial_setup_failure_drains_via_surviving_workers() -> anyhow::Result<()> {
    let controller = Controller::new(ControllerConfig {
        device_ids: vec![0, 1, 2, 3],
        queue_size: 8,
        suppress_worker_output: true,
    })?;

    let successes: Successes = shared();
    let setup_fails = Arc::new(AtomicUsize::new(0));
    let s = successes.clone();
    let sf = setup_fails.clone();
    let callbacks = CallbacksBuilder::new()
        .on_success(move |task_id, data, worker_id| s.lock().unwrap().push((task_id, data, worker_id)))
        .on_setup_fail(move |_worker_id, _error_text| {
            sf.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    let mut config = ConfigMap::new();
    config.insert("test_kind", "failing_setup_odd_device");

    let start = std::time::Instant::now();
    controller
        .run::<TestWorker>(
            tokio_stream::iter(0_i64..200),
            callbacks,
            RunParams {
                base_seed: 42,
                task_timeout: None,
                config,
            },
        )
        .await?;
    let elapsed = start.elapsed();

    anyhow::ensure!(elapsed <= Duration::from_secs(30), "run did not finish promptly, took {elapsed:?}");
    anyhow::ensure!(setup_fails.load(Ordering::SeqCst) == 2, "expected 2 setup failures, got {}", setup_fails.load(Ordering::SeqCst));

    let results = successes.lock().unwrap();
    anyhow::ensure!(results.len() == 200, "expected all 200 tasks to complete, got {}", results.len());
    for (_, _, worker_id) in results.iter() {
        anyhow::ensure!(worker_id % 2 == 0, "task delivered to failed-setup worker {worker_id}");
    }
    Ok(())
}
