//! Worker pool draining the ingest queue.

use crate::grouping::GroupingEngine;
use crate::metrics_defs::{EVENTS_DISCARDED, EVENTS_PROCESSED, QUEUE_LATENCY};
use crate::model::EventPayload;
use crate::queue::{QueueReceiver, WorkItem};
use crate::store::{StoreError, TelemetryStore};
use chrono::Utc;
use directory::Directory;
use shared::{counter, histogram};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct EventProcessor {
    directory: Directory,
    store: Arc<dyn TelemetryStore>,
    grouping: GroupingEngine,
}

impl EventProcessor {
    pub fn new(
        directory: Directory,
        store: Arc<dyn TelemetryStore>,
        grouping: GroupingEngine,
    ) -> Self {
        Self {
            directory,
            store,
            grouping,
        }
    }

    /// Persists one queued event. Events of projects removed after ingestion
    /// are dropped without touching the store.
    pub async fn process(&self, item: WorkItem) -> Result<(), StoreError> {
        let kind = item.payload.kind().as_str();
        if let Ok(waited) = (Utc::now() - item.received_at).to_std() {
            histogram!(QUEUE_LATENCY, "kind" => kind).record(waited.as_secs_f64());
        }
        if !self.directory.contains(item.project_id) {
            tracing::debug!(project_id = %item.project_id, kind, "Discarding event of removed project");
            counter!(EVENTS_DISCARDED, "kind" => kind).increment(1);
            return Ok(());
        }

        let result = match &item.payload {
            EventPayload::Performance(payload) => self
                .store
                .insert_performance_sample(item.project_id, payload)
                .await
                .map(|_| ()),
            EventPayload::Error(payload) => self
                .grouping
                .process_error(item.project_id, payload)
                .await
                .map(|_| ()),
        };

        let outcome = if result.is_ok() { "ok" } else { "failed" };
        counter!(EVENTS_PROCESSED, "kind" => kind, "outcome" => outcome).increment(1);
        result
    }
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `workers` tasks sharing `queue`. Each handles one item at a time
    /// and exits once the queue is closed and drained.
    pub fn spawn(workers: usize, queue: QueueReceiver, processor: EventProcessor) -> Self {
        let handles = (0..workers)
            .map(|worker| {
                let queue = queue.clone();
                let processor = processor.clone();
                tokio::spawn(async move {
                    while let Some(item) = queue.recv().await {
                        let project_id = item.project_id;
                        if let Err(e) = processor.process(item).await {
                            tracing::error!(worker, project_id = %project_id, error = %e, "Failed to persist event");
                        }
                    }
                    tracing::debug!(worker, "Worker stopped");
                })
            })
            .collect();
        WorkerPool { handles }
    }

    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
    }
}
