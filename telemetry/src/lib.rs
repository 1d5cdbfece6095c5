pub mod aggregator;
pub mod api;
pub mod config;
pub mod errors;
pub mod grouping;
pub mod ingest;
pub mod metrics_defs;
pub mod model;
pub mod payload;
pub mod pruner;
pub mod query;
pub mod queue;
pub mod scheduler;
pub mod store;
#[cfg(test)]
mod testutils;
pub mod worker;

use crate::aggregator::Aggregator;
use crate::api::TelemetryService;
use crate::config::Config;
use crate::errors::TelemetryError;
use crate::grouping::GroupingEngine;
use crate::ingest::IngestGate;
use crate::pruner::Pruner;
use crate::query::QueryService;
use crate::queue::QueueSender;
use crate::scheduler::{PeriodicTask, Scheduler};
use crate::store::{MemoryStore, TelemetryStore};
use crate::worker::{EventProcessor, WorkerPool};
use directory::Directory;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long shutdown waits for workers to drain the queue.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// The running pipeline minus its listeners: workers, periodic tasks and the
/// request service that feeds them.
pub struct Pipeline {
    service: TelemetryService,
    queue: QueueSender,
    workers: WorkerPool,
    scheduler: Scheduler,
}

impl Pipeline {
    pub fn start(config: &Config, directory: Directory, store: Arc<dyn TelemetryStore>) -> Self {
        let (queue_tx, queue_rx) = queue::channel(
            config.queue.capacity,
            Duration::from_millis(config.queue.enqueue_timeout_ms),
        );

        let grouping = GroupingEngine::new(store.clone(), config.grouping.scope_by_url);
        let processor = EventProcessor::new(directory.clone(), store.clone(), grouping);
        let workers = WorkerPool::spawn(config.queue.workers, queue_rx, processor);

        let tasks: Vec<Arc<dyn PeriodicTask>> = vec![
            Arc::new(Aggregator::new(store.clone(), config.aggregation.interval())),
            Arc::new(Pruner::new(
                store.clone(),
                config.retention.horizon(),
                config.retention.interval(),
            )),
        ];
        let scheduler = Scheduler::start(tasks);

        let service = TelemetryService::new(
            IngestGate::new(directory.clone(), queue_tx.clone()),
            QueryService::new(directory, store, config.query.clone()),
            config.max_body_bytes,
        );

        Pipeline {
            service,
            queue: queue_tx,
            workers,
            scheduler,
        }
    }

    pub fn service(&self) -> TelemetryService {
        self.service.clone()
    }

    /// Stops the periodic tasks, closes the ingest queue and waits for the
    /// workers to persist what was already accepted. Service clones still held
    /// by open connections are refused from then on.
    pub async fn shutdown(self) {
        self.scheduler.stop().await;
        self.queue.close();
        drop(self.service);
        if tokio::time::timeout(DRAIN_TIMEOUT, self.workers.join())
            .await
            .is_err()
        {
            tracing::warn!("Timed out waiting for the ingest queue to drain");
        }
    }
}

/// Serves the telemetry API and admin probes until `shutdown` fires or a
/// listener fails.
pub async fn run(
    config: Config,
    directory: Directory,
    shutdown: CancellationToken,
) -> Result<(), TelemetryError> {
    config.validate()?;

    let store: Arc<dyn TelemetryStore> = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::start(&config, directory.clone(), store);

    let api_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        pipeline.service(),
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::new(move || directory.is_ready()),
    );

    let result = tokio::select! {
        result = async { tokio::try_join!(api_task, admin_task) } => result.map(|_| ()),
        _ = shutdown.cancelled() => {
            tracing::info!("Shutting down telemetry pipeline");
            Ok(())
        }
    };

    pipeline.shutdown().await;
    result?;
    Ok(())
}
