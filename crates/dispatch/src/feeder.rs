//! Pulls payloads off the caller's stream, assigns monotonically increasing
//! `task_id`s, and pushes them onto the bounded task channel.
//!
//! Runs as a `tokio::spawn`ed task on the same runtime as everything else
//! (not an OS thread), publishing its progress through `AtomicBool`/
//! `AtomicU64` instances owned by the run rather than process-wide statics.

use crate::task::Task;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

/// Reads `stream` to exhaustion, sending each item as a [`Task`] on
/// `task_tx`. Stops early if `shutdown` is cancelled while blocked on a full
/// channel. Always marks `feeder_done` before returning, so the monitor can
/// tell "no more tasks are coming" apart from "still reading the stream".
pub async fn run_feeder<P>(
    mut stream: std::pin::Pin<Box<dyn Stream<Item = P> + Send>>,
    task_tx: Sender<Task<P>>,
    shutdown: CancellationToken,
    task_count: Arc<AtomicU64>,
    feeder_done: Arc<AtomicBool>,
) {
    let mut next_id = 0_u64;

    while let Some(payload) = stream.next().await {
        let task = Task {
            task_id: next_id,
            payload,
        };

        let sent = tokio::select! {
            biased;
            () = shutdown.cancelled() => false,
            res = task_tx.send(task) => res.is_ok(),
        };
        if !sent {
            break;
        }

        next_id += 1;
        task_count.store(next_id, Ordering::Release);
    }

    feeder_done.store(true, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn assigns_monotonic_task_ids_and_marks_done() {
        let (task_tx, mut task_rx) = tokio::sync::mpsc::channel(16);
        let task_count = Arc::new(AtomicU64::new(0));
        let feeder_done = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();

        run_feeder(
            Box::pin(futures::stream::iter(vec!["a", "b", "c"])),
            task_tx,
            shutdown,
            task_count.clone(),
            feeder_done.clone(),
        )
        .await;

        let mut received = Vec::new();
        while let Ok(task) = task_rx.try_recv() {
            received.push(task);
        }

        assert_eq!(received.len(), 3);
        assert_eq!(received[0].task_id, 0);
        assert_eq!(received[1].task_id, 1);
        assert_eq!(received[2].task_id, 2);
        assert!(feeder_done.load(Ordering::Acquire));
        assert_eq!(task_count.load(Ordering::Acquire), 3);
    }

    #[tokio::test]
    async fn stops_early_and_marks_done_when_shutdown_fires_on_a_full_channel() {
        let (task_tx, task_rx) = tokio::sync::mpsc::channel(1);
        let task_count = Arc::new(AtomicU64::new(0));
        let feeder_done = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        // Fill the channel first so the feeder's send would otherwise block,
        // forcing it down the shutdown-cancelled branch of the select.
        task_tx
            .send(Task { task_id: 999, payload: "prefill" })
            .await
            .unwrap();

        run_feeder(
            Box::pin(futures::stream::iter(vec!["a", "b"])),
            task_tx,
            shutdown,
            task_count.clone(),
            feeder_done.clone(),
        )
        .await;

        assert!(feeder_done.load(Ordering::Acquire));
        drop(task_rx);
    }

    #[tokio::test]
    async fn empty_stream_still_marks_done() {
        let (task_tx, _task_rx) = tokio::sync::mpsc::channel::<Task<i64>>(4);
        let task_count = Arc::new(AtomicU64::new(0));
        let feeder_done = Arc::new(AtomicBool::new(false));

        run_feeder(
            Box::pin(futures::stream::iter(Vec::<i64>::new())),
            task_tx,
            CancellationToken::new(),
            task_count.clone(),
            feeder_done.clone(),
        )
        .await;

        assert!(feeder_done.load(Ordering::Acquire));
        assert_eq!(task_count.load(Ordering::Acquire), 0);
    }
}
