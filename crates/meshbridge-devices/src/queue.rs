//! Radio operation queue.
//!
//! Concurrent transmissions into the mesh raise loss and retransmissions, so
//! every radio call goes through this queue: a FIFO drained by a single task
//! that runs one operation at a time. Callers keep enqueueing while earlier
//! operations are outstanding and get the result through a oneshot channel.
//!
//! An operation that fails, times out or panics completes with an error and
//! the drain moves on to the next item.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, trace, warn};

use crate::radio::{RadioError, RadioResult};

/// Default upper bound on a single operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

struct QueuedOperation {
    id: u64,
    label: String,
    job: BoxFuture<'static, ()>,
}

struct QueueInner {
    tx: mpsc::UnboundedSender<QueuedOperation>,
    running: watch::Sender<bool>,
    pending: Arc<AtomicUsize>,
    executed: Arc<AtomicU64>,
    next_id: AtomicU64,
    operation_timeout: Duration,
}

/// Single-concurrency FIFO executor for radio calls.
///
/// Cloning the queue yields another handle to the same FIFO. The drain task
/// ends once every handle is dropped.
#[derive(Clone)]
pub struct RadioQueue {
    inner: Arc<QueueInner>,
}

impl RadioQueue {
    /// Create the queue and spawn its drain task. Must be called inside a
    /// tokio runtime.
    pub fn new(operation_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (running, running_rx) = watch::channel(true);
        let pending = Arc::new(AtomicUsize::new(0));
        let executed = Arc::new(AtomicU64::new(0));

        tokio::spawn(drain(rx, running_rx, pending.clone(), executed.clone()));

        Self {
            inner: Arc::new(QueueInner {
                tx,
                running,
                pending,
                executed,
                next_id: AtomicU64::new(1),
                operation_timeout,
            }),
        }
    }

    /// Append an operation. The returned receiver resolves once the
    /// operation ran; it is dropped unresolved only if the queue shut down.
    pub fn enqueue<F, T>(
        &self,
        label: impl Into<String>,
        operation: F,
    ) -> oneshot::Receiver<RadioResult<T>>
    where
        F: Future<Output = RadioResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let label = label.into();
        let timeout = self.inner.operation_timeout;

        let job_label = label.clone();
        let job = async move {
            let outcome =
                tokio::time::timeout(timeout, AssertUnwindSafe(operation).catch_unwind()).await;
            let result = match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => {
                    error!(operation = %job_label, "Radio operation panicked");
                    Err(RadioError::Aborted(job_label.clone()))
                }
                Err(_) => Err(RadioError::Timeout(timeout.as_millis() as u64)),
            };
            if let Err(e) = &result {
                debug!(operation = %job_label, "Radio operation failed: {}", e);
            }
            // The caller may have stopped waiting; the result is dropped then.
            let _ = done_tx.send(result);
        }
        .boxed();

        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        if self.inner.tx.send(QueuedOperation { id, label, job }).is_err() {
            self.inner.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("Radio queue drain task is gone, dropping operation {}", id);
        }
        done_rx
    }

    /// Enqueue an operation and wait for its result.
    pub async fn run<F, T>(&self, label: impl Into<String>, operation: F) -> RadioResult<T>
    where
        F: Future<Output = RadioResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue(label, operation)
            .await
            .unwrap_or_else(|_| Err(RadioError::QueueClosed))
    }

    /// Halt draining after the current operation. Queued items are kept.
    pub fn stop(&self) {
        self.inner.running.send_replace(false);
    }

    /// Resume draining.
    pub fn start(&self) {
        self.inner.running.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    /// Operations queued but not yet started.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Operations run to completion since the queue was created.
    pub fn executed(&self) -> u64 {
        self.inner.executed.load(Ordering::SeqCst)
    }
}

impl Default for RadioQueue {
    fn default() -> Self {
        Self::new(DEFAULT_OPERATION_TIMEOUT)
    }
}

async fn drain(
    mut rx: mpsc::UnboundedReceiver<QueuedOperation>,
    mut running: watch::Receiver<bool>,
    pending: Arc<AtomicUsize>,
    executed: Arc<AtomicU64>,
) {
    loop {
        if !*running.borrow_and_update() {
            if running.changed().await.is_err() {
                return;
            }
            continue;
        }

        tokio::select! {
            biased;
            changed = running.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            next = rx.recv() => {
                let Some(operation) = next else {
                    break;
                };
                pending.fetch_sub(1, Ordering::SeqCst);
                trace!(
                    id = operation.id,
                    operation = %operation.label,
                    "Executing radio operation"
                );
                operation.job.await;
                executed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
    debug!("Radio queue drained and closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn test_run_returns_operation_result() {
        let queue = RadioQueue::default();
        let value = queue.run("answer", async { Ok(42) }).await;
        assert_eq!(value, Ok(42));
    }

    #[tokio::test]
    async fn test_panicking_operation_does_not_stall() {
        let queue = RadioQueue::default();
        let failed = queue.enqueue("boom", async {
            if true {
                panic!("driver bug");
            }
            Ok(())
        });
        let next = queue.enqueue("next", async { Ok("still running") });

        assert!(matches!(failed.await.unwrap(), Err(RadioError::Aborted(_))));
        assert_eq!(next.await.unwrap(), Ok("still running"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_run_one_at_a_time_in_order() {
        let queue = RadioQueue::default();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(parking_lot::Mutex::new(Vec::new()));

        // Earlier operations take longer, so any overlap would reorder them.
        let receivers: Vec<_> = (0..5u64)
            .map(|i| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                let finished = finished.clone();
                queue.enqueue(format!("op {}", i), async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50 * (5 - i))).await;
                    finished.lock().push(i);
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(i)
                })
            })
            .collect();

        for (i, rx) in receivers.into_iter().enumerate() {
            assert_eq!(rx.await.unwrap(), Ok(i as u64));
        }
        assert_eq!(*finished.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(queue.executed(), 5);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_operation_times_out() {
        let queue = RadioQueue::new(Duration::from_millis(500));
        let result: RadioResult<()> = queue
            .run("hang", futures::future::pending::<RadioResult<()>>())
            .await;
        assert_eq!(result, Err(RadioError::Timeout(500)));
        assert_eq!(queue.run("after", async { Ok(1) }).await, Ok(1));
    }

    #[tokio::test]
    async fn test_stop_keeps_items_until_start() {
        let queue = RadioQueue::default();
        queue.stop();
        assert!(!queue.is_running());

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let rx = queue.enqueue("held", async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(queue.pending(), 1);

        queue.start();
        assert_eq!(rx.await.unwrap(), Ok(()));
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(queue.pending(), 0);
    }
}
