//! Bounded hand-off between the ingestion gate and the worker pool.

use crate::metrics_defs::QUEUE_DEPTH;
use crate::model::EventPayload;
use chrono::{DateTime, Utc};
use directory::ProjectId;
use shared::gauge;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// An accepted event waiting to be persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkItem {
    pub project_id: ProjectId,
    /// When the gate accepted the event. The store stamps its own time on
    /// write; this only measures queueing delay.
    pub received_at: DateTime<Utc>,
    pub payload: EventPayload,
}

#[derive(Error, Debug, PartialEq)]
pub enum EnqueueError {
    #[error("ingest queue is full")]
    Full,
    #[error("ingest queue is closed")]
    Closed,
}

pub fn channel(capacity: usize, enqueue_timeout: Duration) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let closed = CancellationToken::new();
    (
        QueueSender {
            inner: tx,
            enqueue_timeout,
            closed: closed.clone(),
        },
        QueueReceiver {
            inner: Arc::new(Mutex::new(rx)),
            closed,
        },
    )
}

#[derive(Clone)]
pub struct QueueSender {
    inner: mpsc::Sender<WorkItem>,
    enqueue_timeout: Duration,
    closed: CancellationToken,
}

impl QueueSender {
    /// Waits at most `enqueue_timeout` for a free slot.
    pub async fn enqueue(&self, item: WorkItem) -> Result<(), EnqueueError> {
        if self.closed.is_cancelled() {
            return Err(EnqueueError::Closed);
        }
        match tokio::time::timeout(self.enqueue_timeout, self.inner.reserve()).await {
            Ok(Ok(permit)) => {
                permit.send(item);
                gauge!(QUEUE_DEPTH).set(self.depth() as f64);
                Ok(())
            }
            Ok(Err(_)) => Err(EnqueueError::Closed),
            Err(_) => Err(EnqueueError::Full),
        }
    }

    pub fn depth(&self) -> usize {
        self.inner.max_capacity() - self.inner.capacity()
    }

    /// Stops accepting items for every clone of this sender. Items already
    /// queued are still handed to workers, after which `recv` returns `None`
    /// even while other sender clones are alive.
    pub fn close(&self) {
        self.closed.cancel();
    }
}

/// Receiving side, shared by every worker.
#[derive(Clone)]
pub struct QueueReceiver {
    inner: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    closed: CancellationToken,
}

impl QueueReceiver {
    /// Next item, or `None` once the queue is drained after being closed or
    /// after every sender is gone.
    pub async fn recv(&self) -> Option<WorkItem> {
        let mut rx = self.inner.lock().await;
        let item = tokio::select! {
            biased;
            item = rx.recv() => item,
            _ = self.closed.cancelled() => {
                rx.close();
                rx.recv().await
            }
        };
        gauge!(QUEUE_DEPTH).set(rx.len() as f64);
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PerformancePayload;

    fn item() -> WorkItem {
        WorkItem {
            project_id: ProjectId::new_v4(),
            received_at: Utc::now(),
            payload: EventPayload::Performance(PerformancePayload {
                url: "/a".into(),
                method: "GET".into(),
                status_code: 200,
                duration_ms: 12,
            }),
        }
    }

    #[tokio::test]
    async fn test_full_queue_times_out() {
        let (tx, rx) = channel(1, Duration::from_millis(10));
        assert_eq!(tx.enqueue(item()).await, Ok(()));
        assert_eq!(tx.depth(), 1);
        assert_eq!(tx.enqueue(item()).await, Err(EnqueueError::Full));

        // Draining frees the slot again
        assert!(rx.recv().await.is_some());
        assert_eq!(tx.enqueue(item()).await, Ok(()));
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let (tx, rx) = channel(4, Duration::from_millis(10));
        drop(rx);
        assert_eq!(tx.enqueue(item()).await, Err(EnqueueError::Closed));
    }

    #[tokio::test]
    async fn test_receiver_drains_after_senders_drop() {
        let (tx, rx) = channel(4, Duration::from_millis(10));
        tx.enqueue(item()).await.unwrap();
        tx.enqueue(item()).await.unwrap();
        drop(tx);

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_drains_with_live_senders() {
        let (tx, rx) = channel(4, Duration::from_millis(10));
        let other = tx.clone();
        tx.enqueue(item()).await.unwrap();
        tx.enqueue(item()).await.unwrap();

        other.close();
        assert_eq!(tx.enqueue(item()).await, Err(EnqueueError::Closed));

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        let idle = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert_eq!(idle, Ok(None));
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_receiver() {
        let (tx, rx) = channel(4, Duration::from_millis(10));
        let waiting = tokio::spawn(async move { rx.recv().await });
        tokio::task::yield_now().await;

        tx.close();
        let received = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
        assert!(received.is_none());
    }
}
