//! Statistics overlay (`stats` feature): wraps a [`Callbacks`] so every
//! result updates an in-memory record a caller can poll with
//! [`StatsOverlay::snapshot`].
//!
//! Grounded directly in the Python original's `RichDispatcher`
//! (`ui/rich_dispatcher.py`): `_reset_stats` becomes [`Stats::new`],
//! `_wrap_*_callback` becomes the closures built in
//! [`StatsOverlay::install`], and `_snapshot`'s `deepcopy` under a lock
//! becomes a `Mutex::lock` + `Clone` here. No periodic renderer is built -
//! that's the out-of-scope terminal-painting layer; this module only
//! maintains the record.

use crate::callbacks::Callbacks;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Per-worker lifecycle status, mirroring `WorkerStatus` in the Python
/// original's status table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Initializing,
    Processing,
    Idle,
    Finished,
    Error,
}

#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub status: WorkerStatus,
    pub current_task: Option<u64>,
    pub task_start_time: Option<Instant>,
    pub last_duration: Option<Duration>,
    pub completed: u64,
    pub failed: u64,
    pub timeouts: u64,
}

impl WorkerStats {
    fn new() -> Self {
        Self {
            status: WorkerStatus::Initializing,
            current_task: None,
            task_start_time: None,
            last_duration: None,
            completed: 0,
            failed: 0,
            timeouts: 0,
        }
    }
}

/// A point-in-time snapshot of the whole run's progress.
#[derive(Debug, Clone)]
pub struct Stats {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub setup_failures: u64,
    pub start_time: Instant,
    pub end_time: Option<Instant>,
    pub per_worker: HashMap<usize, WorkerStats>,
}

impl Stats {
    fn new(device_ids: &[usize], start_time: Instant) -> Self {
        let per_worker = device_ids.iter().map(|&id| (id, WorkerStats::new())).collect();
        Self {
            total: 0,
            completed: 0,
            failed: 0,
            timeouts: 0,
            setup_failures: 0,
            start_time,
            end_time: None,
            per_worker,
        }
    }
}

/// Maintains a [`Stats`] record alongside a caller's [`Callbacks`].
///
/// Construct with [`StatsOverlay::install`], hand the returned `Callbacks`
/// to [`crate::Controller::run`], and poll [`StatsOverlay::snapshot`] from
/// any other task (e.g. a periodic renderer the caller owns) for the
/// current picture.
pub struct StatsOverlay {
    stats: Arc<Mutex<Stats>>,
}

impl StatsOverlay {
    /// Wraps `inner` so every message that reaches it first updates the
    /// stats record. `start_time` is captured immediately, matching
    /// `_reset_stats`'s behavior of starting the clock at dispatcher
    /// construction rather than at the first task.
    pub fn install<O: Send + 'static>(
        device_ids: &[usize],
        start_time: Instant,
        inner: Callbacks<O>,
    ) -> (Self, Callbacks<O>) {
        let stats = Arc::new(Mutex::new(Stats::new(device_ids, start_time)));

        let Callbacks {
            mut on_success,
            mut on_error,
            mut on_timeout,
            mut on_setup_fail,
            mut on_task_start,
            on_exit,
        } = inner;

        let s = stats.clone();
        let wrapped_task_start = move |task_id: u64, worker_id: usize| {
            let mut guard = s.lock().expect("stats mutex poisoned");
            let entry = guard.per_worker.entry(worker_id).or_insert_with(WorkerStats::new);
            entry.status = WorkerStatus::Processing;
            entry.current_task = Some(task_id);
            entry.task_start_time = Some(Instant::now());
            drop(guard);
            if let Some(cb) = on_task_start.as_mut() {
                cb(task_id, worker_id);
            }
        };

        let s = stats.clone();
        let wrapped_success = move |task_id: u64, data: O, worker_id: usize| {
            finish_task(&s, worker_id, |w| w.completed += 1);
            {
                let mut guard = s.lock().expect("stats mutex poisoned");
                guard.total += 1;
                guard.completed += 1;
            }
            on_success(task_id, data, worker_id);
        };

        let s = stats.clone();
        let wrapped_error = move |task_id: u64, error_text: String, worker_id: usize| {
            finish_task(&s, worker_id, |w| w.failed += 1);
            {
                let mut guard = s.lock().expect("stats mutex poisoned");
                guard.total += 1;
                guard.failed += 1;
            }
            if let Some(cb) = on_error.as_mut() {
                cb(task_id, error_text, worker_id);
            }
        };

        let s = stats.clone();
        let wrapped_timeout = move |task_id: u64, timeout_seconds: f64, worker_id: usize| {
            finish_task(&s, worker_id, |w| w.timeouts += 1);
            {
                let mut guard = s.lock().expect("stats mutex poisoned");
                guard.total += 1;
                guard.timeouts += 1;
            }
            if let Some(cb) = on_timeout.as_mut() {
                cb(task_id, timeout_seconds, worker_id);
            }
        };

        let s = stats.clone();
        let wrapped_setup_fail = move |worker_id: usize, error_text: String| {
            {
                let mut guard = s.lock().expect("stats mutex poisoned");
                guard.setup_failures += 1;
                let entry = guard.per_worker.entry(worker_id).or_insert_with(WorkerStats::new);
                entry.status = WorkerStatus::Error;
                entry.current_task = None;
            }
            if let Some(cb) = on_setup_fail.as_mut() {
                cb(worker_id, error_text);
            }
        };

        let s = stats.clone();
        let wrapped_exit = move || {
            {
                let mut guard = s.lock().expect("stats mutex poisoned");
                guard.end_time = Some(Instant::now());
                for worker in guard.per_worker.values_mut() {
                    if worker.status != WorkerStatus::Error {
                        worker.status = WorkerStatus::Finished;
                    }
                }
            }
            if let Some(cb) = on_exit {
                cb();
            }
        };

        let wrapped = Callbacks {
            on_success: Box::new(wrapped_success),
            on_error: Some(Box::new(wrapped_error)),
            on_timeout: Some(Box::new(wrapped_timeout)),
            on_setup_fail: Some(Box::new(wrapped_setup_fail)),
            on_task_start: Some(Box::new(wrapped_task_start)),
            on_exit: Some(Box::new(wrapped_exit)),
        };

        (Self { stats }, wrapped)
    }

    /// Takes the lock and clones the current record.
    pub fn snapshot(&self) -> Stats {
        self.stats.lock().expect("stats mutex poisoned").clone()
    }
}

fn finish_task(stats: &Arc<Mutex<Stats>>, worker_id: usize, bump: impl FnOnce(&mut WorkerStats)) {
    let mut guard = stats.lock().expect("stats mutex poisoned");
    let entry = guard.per_worker.entry(worker_id).or_insert_with(WorkerStats::new);
    entry.status = WorkerStatus::Idle;
    entry.last_duration = entry.task_start_time.map(|t| t.elapsed());
    entry.current_task = None;
    bump(entry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::CallbacksBuilder;

    #[test]
    fn counts_success_error_and_timeout_into_totals() {
        let inner: Callbacks<i64> = CallbacksBuilder::new().on_success(|_, _, _| {}).build();
        let (overlay, mut callbacks) = StatsOverlay::install(&[0, 1], Instant::now(), inner);

        (callbacks.on_success)(0, 10, 0);
        callbacks.on_error.as_mut().unwrap()(1, "boom".to_string(), 0);
        callbacks.on_timeout.as_mut().unwrap()(2, 1.0, 1);

        let stats = overlay.snapshot();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.per_worker[&0].completed, 1);
        assert_eq!(stats.per_worker[&0].failed, 1);
        assert_eq!(stats.per_worker[&1].timeouts, 1);
    }

    #[test]
    fn setup_fail_marks_worker_as_error_and_survives_on_exit() {
        let inner: Callbacks<i64> = CallbacksBuilder::new().on_success(|_, _, _| {}).build();
        let (overlay, mut callbacks) = StatsOverlay::install(&[0], Instant::now(), inner);

        callbacks.on_setup_fail.as_mut().unwrap()(0, "setup exploded".to_string());
        if let Some(on_exit) = callbacks.on_exit.take() {
            on_exit();
        }

        let stats = overlay.snapshot();
        assert_eq!(stats.setup_failures, 1);
        assert_eq!(stats.per_worker[&0].status, WorkerStatus::Error);
        assert!(stats.end_time.is_some());
    }

    #[test]
    fn on_exit_finishes_workers_that_did_not_error() {
        let inner: Callbacks<i64> = CallbacksBuilder::new().on_success(|_, _, _| {}).build();
        let (overlay, callbacks) = StatsOverlay::install(&[0], Instant::now(), inner);

        if let Some(on_exit) = callbacks.on_exit {
            on_exit();
        }

        let stats = overlay.snapshot();
        assert_eq!(stats.per_worker[&0].status, WorkerStatus::Finished);
    }
}
