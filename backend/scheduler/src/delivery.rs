//! Outbound delivery queue.
//!
//! A single worker drains send-tasks in FIFO order, one at a time, and waits a
//! fixed spacing after each task (successful or not) before starting the next.
//! This keeps the notification channel under the platform's rate limits.
//! Enqueueing never blocks. Queued tasks cannot be cancelled or reordered.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Spacing the watchdog uses between consecutive sends.
pub const DEFAULT_SPACING: Duration = Duration::from_millis(500);

struct DeliveryTask {
    label: String,
    work: BoxFuture<'static, Result<()>>,
}

/// Producer side of the queue. Cheap to clone.
#[derive(Clone)]
pub struct DeliveryQueue {
    tx: mpsc::UnboundedSender<DeliveryTask>,
    pending: Arc<AtomicUsize>,
}

impl DeliveryQueue {
    /// Spawn the worker on the current runtime.
    pub fn spawn(spacing: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        tokio::spawn(run_worker(rx, Arc::clone(&pending), spacing));
        info!(spacing_ms = spacing.as_millis() as u64, "Delivery queue started");
        Self { tx, pending }
    }

    /// Append a task. Returns `false` if the worker is gone.
    pub fn enqueue<F>(&self, label: impl Into<String>, work: F) -> bool
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let task = DeliveryTask {
            label: label.into(),
            work: Box::pin(work),
        };
        self.pending.fetch_add(1, Ordering::SeqCst);
        match self.tx.send(task) {
            Ok(()) => true,
            Err(rejected) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                warn!(task = %rejected.0.label, "Delivery queue closed, dropping task");
                false
            }
        }
    }

    /// Append a task once `delay` has elapsed (used for message cleanup).
    pub fn enqueue_after<F>(&self, delay: Duration, label: impl Into<String>, work: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let queue = self.clone();
        let label = label.into();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(label, work);
        });
    }

    /// Tasks enqueued but not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<DeliveryTask>,
    pending: Arc<AtomicUsize>,
    spacing: Duration,
) {
    while let Some(task) = rx.recv().await {
        debug!(task = %task.label, "Delivering");
        // A panicking task counts as failed; the worker keeps draining.
        match AssertUnwindSafe(task.work).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(task = %task.label, error = %format!("{e:#}"), "Delivery task failed");
            }
            Err(panic) => {
                error!(task = %task.label, panic = %panic_message(&*panic), "Delivery task panicked");
            }
        }
        pending.fetch_sub(1, Ordering::SeqCst);
        tokio::time::sleep(spacing).await;
    }
    info!("Delivery queue closed, worker exiting");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn runs_in_order_with_spacing_even_when_tasks_fail() {
        let queue = DeliveryQueue::spawn(DEFAULT_SPACING);
        let starts: Arc<Mutex<Vec<(usize, Instant)>>> = Arc::new(Mutex::new(Vec::new()));

        for i in 0..6 {
            let starts = Arc::clone(&starts);
            queue.enqueue(format!("task-{i}"), async move {
                starts.lock().unwrap().push((i, Instant::now()));
                if i % 2 == 1 {
                    anyhow::bail!("simulated send failure");
                }
                Ok(())
            });
        }

        tokio::time::sleep(Duration::from_secs(10)).await;

        let starts = starts.lock().unwrap();
        let order: Vec<usize> = starts.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
        for pair in starts.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= DEFAULT_SPACING);
        }
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn spacing_includes_task_duration_gap() {
        let queue = DeliveryQueue::spawn(Duration::from_millis(500));
        let starts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..2 {
            let starts = Arc::clone(&starts);
            queue.enqueue("slow", async move {
                starts.lock().unwrap().push(Instant::now());
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(())
            });
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
        let starts = starts.lock().unwrap();
        assert_eq!(starts.len(), 2);
        assert!(starts[1] - starts[0] >= Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_after_waits_for_delay() {
        let queue = DeliveryQueue::spawn(DEFAULT_SPACING);
        let ran = Arc::new(Mutex::new(None));
        let started = Instant::now();

        let slot = Arc::clone(&ran);
        queue.enqueue_after(Duration::from_secs(5), "cleanup", async move {
            *slot.lock().unwrap() = Some(Instant::now());
            Ok(())
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(ran.lock().unwrap().is_none());

        tokio::time::sleep(Duration::from_secs(10)).await;
        let at = ran.lock().unwrap().expect("cleanup ran");
        assert!(at - started >= Duration::from_secs(5));
    }

    async fn explode() -> Result<()> {
        panic!("send task blew up")
    }

    #[tokio::test(start_paused = true)]
    async fn worker_survives_a_panicking_task() {
        let queue = DeliveryQueue::spawn(DEFAULT_SPACING);
        let ran = Arc::new(Mutex::new(false));

        assert!(queue.enqueue("boom", explode()));
        let slot = Arc::clone(&ran);
        assert!(queue.enqueue("after", async move {
            *slot.lock().unwrap() = true;
            Ok(())
        }));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(*ran.lock().unwrap());
        assert_eq!(queue.pending(), 0);
        assert!(queue.enqueue("still open", async { Ok(()) }));
    }

    #[tokio::test(start_paused = true)]
    async fn pending_counts_unfinished_tasks() {
        let queue = DeliveryQueue::spawn(DEFAULT_SPACING);
        for _ in 0..3 {
            queue.enqueue("noop", async { Ok(()) });
        }
        assert_eq!(queue.pending(), 3);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(queue.pending(), 0);
    }
}
