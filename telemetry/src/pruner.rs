//! Retention: bulk-deletes raw events past the horizon.

use crate::metrics_defs::ROWS_PRUNED;
use crate::scheduler::PeriodicTask;
use crate::store::TelemetryStore;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use shared::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PruneReport {
    pub error_events: u64,
    pub performance_samples: u64,
    pub failures: usize,
}

pub struct Pruner {
    store: Arc<dyn TelemetryStore>,
    horizon: TimeDelta,
    period: Duration,
}

impl Pruner {
    pub fn new(store: Arc<dyn TelemetryStore>, horizon: TimeDelta, period: Duration) -> Self {
        Self {
            store,
            horizon,
            period,
        }
    }

    /// Deletes raw rows older than `now - horizon`. The cutoff is computed once
    /// and shared by both tables; groups and aggregated windows are kept.
    pub async fn prune(&self, now: DateTime<Utc>) -> PruneReport {
        let mut report = PruneReport::default();
        let Some(cutoff) = now.checked_sub_signed(self.horizon) else {
            report.failures += 1;
            tracing::error!(%now, horizon = %self.horizon, "Retention cutoff is out of range");
            return report;
        };

        match self.store.delete_error_events_before(cutoff).await {
            Ok(deleted) => {
                report.error_events = deleted;
                counter!(ROWS_PRUNED, "table" => "error_events").increment(deleted);
            }
            Err(e) => {
                report.failures += 1;
                tracing::error!(error = %e, %cutoff, "Failed to prune error events");
            }
        }

        match self.store.delete_performance_samples_before(cutoff).await {
            Ok(deleted) => {
                report.performance_samples = deleted;
                counter!(ROWS_PRUNED, "table" => "performance_samples").increment(deleted);
            }
            Err(e) => {
                report.failures += 1;
                tracing::error!(error = %e, %cutoff, "Failed to prune performance samples");
            }
        }

        tracing::info!(
            %cutoff,
            error_events = report.error_events,
            performance_samples = report.performance_samples,
            "Pruned raw events"
        );
        report
    }
}

#[async_trait]
impl PeriodicTask for Pruner {
    fn name(&self) -> &'static str {
        "pruner"
    }

    fn period(&self) -> Duration {
        self.period
    }

    async fn run(&self, now: DateTime<Utc>, _cancel: &CancellationToken) {
        self.prune(now).await;
    }
}
