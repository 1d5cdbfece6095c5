//! Periodic roll-up of raw performance samples into metric windows.
//!
//! Percentiles use the nearest-rank method: the p-th percentile of `n`
//! sorted durations is the value at 1-based rank `ceil(p / 100 * n)`.

use crate::metrics_defs::{AGGREGATION_FAILURES, WINDOWS_WRITTEN};
use crate::model::{AggregatedMetricWindow, OVERALL_URL, RawPerformanceSample};
use crate::scheduler::PeriodicTask;
use crate::store::{StoreError, TelemetryStore};
use async_trait::async_trait;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use directory::ProjectId;
use parking_lot::Mutex;
use shared::counter;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DurationStats {
    pub count: u64,
    pub avg: u32,
    pub p50: u32,
    pub p95: u32,
}

impl DurationStats {
    /// `None` for an empty partition.
    pub fn compute(durations: &mut [u32]) -> Option<Self> {
        if durations.is_empty() {
            return None;
        }
        durations.sort_unstable();

        let count = durations.len() as u64;
        let total: u64 = durations.iter().map(|&d| u64::from(d)).sum();
        Some(DurationStats {
            count,
            avg: (total / count) as u32,
            p50: nearest_rank(durations, 50),
            p95: nearest_rank(durations, 95),
        })
    }
}

// `sorted` must be non-empty.
fn nearest_rank(sorted: &[u32], percentile: usize) -> u32 {
    let rank = (percentile * sorted.len()).div_ceil(100).clamp(1, sorted.len());
    sorted[rank - 1]
}

/// Half-open interval `[start, end)` of sample timestamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// The window of length `period` ending at `now` truncated to the minute.
    pub fn trailing(now: DateTime<Utc>, period: TimeDelta) -> Self {
        let end = truncate_to_minute(now);
        Window {
            start: truncate_to_minute(end - period),
            end,
        }
    }
}

fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(TimeDelta::minutes(1)).unwrap_or(t)
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AggregationReport {
    pub samples: usize,
    pub windows_written: usize,
    pub failures: usize,
    pub cancelled: bool,
}

pub struct Aggregator {
    store: Arc<dyn TelemetryStore>,
    period: Duration,
    // End of the last window read successfully. Each run continues from here
    // so consecutive windows share their boundary whatever the tick jitter.
    last_end: Mutex<Option<DateTime<Utc>>>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn TelemetryStore>, period: Duration) -> Self {
        Self {
            store,
            period,
            last_end: Mutex::new(None),
        }
    }

    /// The window due at `now`: from the end of the previous window up to `now`
    /// truncated to the minute. The first run covers one trailing period.
    /// `None` when no whole minute has closed since the previous window.
    pub fn next_window(&self, now: DateTime<Utc>) -> Option<Window> {
        let trailing = Window::trailing(now, TimeDelta::seconds(self.period.as_secs() as i64));
        let start = self.last_end.lock().unwrap_or(trailing.start);
        (start < trailing.end).then_some(Window {
            start,
            end: trailing.end,
        })
    }

    /// Aggregates every sample in `window`, one row per `(project, url)` plus
    /// one overall row per project. Rows are replaced, so re-running a window
    /// over the same samples is a no-op.
    ///
    /// A partition that fails to write is logged and skipped. Cancellation is
    /// honoured between partitions.
    pub async fn run_window(
        &self,
        window: Window,
        cancel: &CancellationToken,
    ) -> Result<AggregationReport, StoreError> {
        let samples = self
            .store
            .performance_samples_between(window.start, window.end)
            .await?;
        let mut report = AggregationReport {
            samples: samples.len(),
            ..Default::default()
        };

        for (project_id, url, mut durations) in partition(samples) {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let Some(stats) = DurationStats::compute(&mut durations) else {
                continue;
            };

            let row = AggregatedMetricWindow {
                project_id,
                url,
                window_start: window.start,
                request_count: stats.count,
                avg_duration_ms: stats.avg,
                p50_duration_ms: stats.p50,
                p95_duration_ms: stats.p95,
            };
            let url = row.url.clone();
            match self.store.upsert_metric_window(row).await {
                Ok(()) => {
                    report.windows_written += 1;
                    counter!(WINDOWS_WRITTEN).increment(1);
                }
                Err(e) => {
                    report.failures += 1;
                    counter!(AGGREGATION_FAILURES).increment(1);
                    tracing::error!(
                        project_id = %project_id,
                        url = %url,
                        window_start = %window.start,
                        error = %e,
                        "Failed to write metric window"
                    );
                }
            }
        }

        Ok(report)
    }
}

/// Splits samples into endpoint partitions followed by each project's overall
/// partition.
fn partition(samples: Vec<RawPerformanceSample>) -> Vec<(ProjectId, String, Vec<u32>)> {
    let mut by_endpoint: BTreeMap<(ProjectId, String), Vec<u32>> = BTreeMap::new();
    let mut by_project: BTreeMap<ProjectId, Vec<u32>> = BTreeMap::new();

    for sample in samples {
        by_project
            .entry(sample.project_id)
            .or_default()
            .push(sample.duration_ms);
        by_endpoint
            .entry((sample.project_id, sample.url))
            .or_default()
            .push(sample.duration_ms);
    }

    by_endpoint
        .into_iter()
        .map(|((project_id, url), durations)| (project_id, url, durations))
        .chain(
            by_project
                .into_iter()
                .map(|(project_id, durations)| (project_id, OVERALL_URL.to_string(), durations)),
        )
        .collect()
}

#[async_trait]
impl PeriodicTask for Aggregator {
    fn name(&self) -> &'static str {
        "aggregator"
    }

    fn period(&self) -> Duration {
        self.period
    }

    async fn run(&self, now: DateTime<Utc>, cancel: &CancellationToken) {
        let Some(window) = self.next_window(now) else {
            tracing::debug!(%now, "No closed minute to aggregate");
            return;
        };
        match self.run_window(window, cancel).await {
            Ok(report) => {
                // A cancelled window was not fully written
                if !report.cancelled {
                    *self.last_end.lock() = Some(window.end);
                }
                tracing::info!(
                    window_start = %window.start,
                    window_end = %window.end,
                    samples = report.samples,
                    windows_written = report.windows_written,
                    failures = report.failures,
                    cancelled = report.cancelled,
                    "Aggregated performance window"
                )
            }
            Err(e) => tracing::error!(
                window_start = %window.start,
                error = %e,
                "Failed to read performance samples"
            ),
        }
    }
}
