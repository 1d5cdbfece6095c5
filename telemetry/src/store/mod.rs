//! Persistence seam for raw events, error groups and aggregated windows.
//!
//! Implementations must honour the atomicity contract of each method; the
//! pipeline relies on it for its correctness under concurrent workers.

mod memory;

pub use memory::MemoryStore;

use crate::model::{
    AggregatedMetricWindow, ErrorGroup, ErrorPayload, GroupKey, PerformancePayload,
    RawErrorEvent, RawPerformanceSample,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directory::ProjectId;
use std::sync::Arc;

/// Source of the timestamps a store assigns to raw rows.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

/// One page of results plus the total number of matching rows.
#[derive(Clone, Debug, PartialEq)]
pub struct PageOf<T> {
    pub total: usize,
    pub items: Vec<T>,
}

impl<T> PageOf<T> {
    pub fn from_sorted(rows: Vec<T>, page: Page) -> Self {
        let total = rows.len();
        let items = rows
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect();
        PageOf { total, items }
    }
}

/// Outcome of recording one error occurrence.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorOccurrence {
    pub group: ErrorGroup,
    pub event: RawErrorEvent,
    /// Whether this occurrence opened the group.
    pub created: bool,
}

/// Raw rows are stamped by the store at the moment they are written, inside
/// the same critical section as the write. A sample is therefore visible to
/// exactly one aggregation window: any read that misses it finishes before its
/// timestamp.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn insert_performance_sample(
        &self,
        project_id: ProjectId,
        payload: &PerformancePayload,
    ) -> Result<RawPerformanceSample, StoreError>;

    /// Gets or creates the group for `key`, counts the occurrence against it
    /// and stores the raw event linked to it, as one atomic unit.
    ///
    /// A new group starts with `occurrence_count == 1` and takes its
    /// representative error type and URL from this occurrence. An existing
    /// group is incremented and its `last_seen` moved forward.
    async fn record_error_occurrence(
        &self,
        key: GroupKey,
        payload: &ErrorPayload,
    ) -> Result<ErrorOccurrence, StoreError>;

    /// Samples with `start <= timestamp < end`, across all projects.
    async fn performance_samples_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawPerformanceSample>, StoreError>;

    /// Inserts the window, replacing any row with the same
    /// `(project_id, url, window_start)`.
    async fn upsert_metric_window(&self, window: AggregatedMetricWindow)
    -> Result<(), StoreError>;

    /// Bulk-deletes raw error events older than `cutoff`. Groups are untouched.
    async fn delete_error_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Bulk-deletes raw performance samples older than `cutoff`.
    async fn delete_performance_samples_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Groups of one project, most recently seen first.
    async fn list_error_groups(
        &self,
        project_id: ProjectId,
        page: Page,
    ) -> Result<PageOf<ErrorGroup>, StoreError>;

    /// The most recently seen group with `fingerprint`, restricted to the
    /// URL partition `scope_url` when given.
    async fn find_error_group(
        &self,
        project_id: ProjectId,
        fingerprint: &str,
        scope_url: Option<&str>,
    ) -> Result<Option<ErrorGroup>, StoreError>;

    async fn latest_error_event(
        &self,
        project_id: ProjectId,
        group_id: u64,
    ) -> Result<Option<RawErrorEvent>, StoreError>;

    /// Windows of one project, newest window first, optionally restricted to
    /// URLs containing `url_contains`.
    async fn list_metric_windows(
        &self,
        project_id: ProjectId,
        url_contains: Option<&str>,
        page: Page,
    ) -> Result<PageOf<AggregatedMetricWindow>, StoreError>;

    /// Every window stored for one project, in no particular order.
    async fn metric_windows(
        &self,
        project_id: ProjectId,
    ) -> Result<Vec<AggregatedMetricWindow>, StoreError>;
}
