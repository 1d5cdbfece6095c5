//! Read-only views over one project's groups and metric windows.
//!
//! Every call authenticates the caller's key first and only ever reads rows
//! of the resolved project.

use crate::config::QueryConfig;
use crate::errors::ApiError;
use crate::ingest::authenticate;
use crate::model::{AggregatedMetricWindow, ErrorGroup, OVERALL_URL, RawErrorEvent};
use crate::store::{Page, PageOf, TelemetryStore};
use chrono::{DateTime, Utc};
use directory::Directory;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Number of endpoints returned by [`QueryService::top_endpoints`].
pub const TOP_ENDPOINTS: usize = 5;

/// Pagination as requested by the caller, before defaults and caps.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PageParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Paginated<T> {
    pub count: usize,
    pub results: Vec<T>,
}

impl<T, U: From<T>> From<PageOf<T>> for Paginated<U> {
    fn from(page: PageOf<T>) -> Self {
        Paginated {
            count: page.total,
            results: page.items.into_iter().map(U::from).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorGroupView {
    pub fingerprint: String,
    pub error_type: String,
    pub url: String,
    pub occurrence_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl From<ErrorGroup> for ErrorGroupView {
    fn from(group: ErrorGroup) -> Self {
        ErrorGroupView {
            fingerprint: group.fingerprint,
            error_type: group.error_type,
            url: group.url,
            occurrence_count: group.occurrence_count,
            first_seen: group.first_seen,
            last_seen: group.last_seen,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorEventView {
    pub timestamp: DateTime<Utc>,
    pub error_type: String,
    pub error_message: String,
    pub traceback: String,
    pub url: String,
    pub method: String,
}

impl From<RawErrorEvent> for ErrorEventView {
    fn from(event: RawErrorEvent) -> Self {
        ErrorEventView {
            timestamp: event.timestamp,
            error_type: event.error_type,
            error_message: event.error_message,
            traceback: event.traceback,
            url: event.url,
            method: event.method,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorGroupDetail {
    #[serde(flatten)]
    pub group: ErrorGroupView,
    /// `None` once retention has pruned every raw instance.
    pub latest_event: Option<ErrorEventView>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricWindowView {
    pub url: String,
    pub window_start: DateTime<Utc>,
    pub request_count: u64,
    pub avg_duration_ms: u32,
    pub p50_duration_ms: u32,
    pub p95_duration_ms: u32,
}

impl From<AggregatedMetricWindow> for MetricWindowView {
    fn from(window: AggregatedMetricWindow) -> Self {
        MetricWindowView {
            url: window.url,
            window_start: window.window_start,
            request_count: window.request_count,
            avg_duration_ms: window.avg_duration_ms,
            p50_duration_ms: window.p50_duration_ms,
            p95_duration_ms: window.p95_duration_ms,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EndpointLatency {
    pub url: String,
    pub max_p95: u32,
}

#[derive(Clone)]
pub struct QueryService {
    directory: Directory,
    store: Arc<dyn TelemetryStore>,
    config: QueryConfig,
}

impl QueryService {
    pub fn new(directory: Directory, store: Arc<dyn TelemetryStore>, config: QueryConfig) -> Self {
        Self {
            directory,
            store,
            config,
        }
    }

    fn page(&self, params: PageParams) -> Page {
        let limit = match params.limit {
            None | Some(0) => self.config.default_page_size,
            Some(limit) => limit,
        };
        Page {
            limit: limit.min(self.config.max_page_size),
            offset: params.offset.unwrap_or(0),
        }
    }

    /// Error groups, most recently seen first.
    pub async fn list_errors(
        &self,
        api_key: Option<&str>,
        params: PageParams,
    ) -> Result<Paginated<ErrorGroupView>, ApiError> {
        let project_id = authenticate(&self.directory, api_key)?;
        let page = self
            .store
            .list_error_groups(project_id, self.page(params))
            .await?;
        Ok(page.into())
    }

    /// One group and its most recent raw instance. When groups are
    /// partitioned by URL, `url` selects the partition; without it the most
    /// recently seen partition is returned.
    pub async fn error_detail(
        &self,
        api_key: Option<&str>,
        fingerprint: &str,
        url: Option<&str>,
    ) -> Result<ErrorGroupDetail, ApiError> {
        let project_id = authenticate(&self.directory, api_key)?;
        let group = self
            .store
            .find_error_group(project_id, fingerprint, url)
            .await?
            .ok_or(ApiError::NotFound)?;
        let latest_event = self
            .store
            .latest_error_event(project_id, group.id)
            .await?
            .map(ErrorEventView::from);

        Ok(ErrorGroupDetail {
            group: group.into(),
            latest_event,
        })
    }

    /// Metric windows, newest first, optionally restricted to URLs containing
    /// `url_filter`.
    pub async fn list_metrics(
        &self,
        api_key: Option<&str>,
        url_filter: Option<&str>,
        params: PageParams,
    ) -> Result<Paginated<MetricWindowView>, ApiError> {
        let project_id = authenticate(&self.directory, api_key)?;
        let url_filter = url_filter.filter(|f| !f.is_empty());
        let page = self
            .store
            .list_metric_windows(project_id, url_filter, self.page(params))
            .await?;
        Ok(page.into())
    }

    /// The slowest endpoints by their worst p95 across all stored windows.
    /// Ties are ordered by URL.
    pub async fn top_endpoints(
        &self,
        api_key: Option<&str>,
    ) -> Result<Vec<EndpointLatency>, ApiError> {
        let project_id = authenticate(&self.directory, api_key)?;
        let windows = self.store.metric_windows(project_id).await?;

        let mut worst: BTreeMap<String, u32> = BTreeMap::new();
        for window in windows.into_iter().filter(|w| w.url != OVERALL_URL) {
            let max_p95 = worst.entry(window.url).or_default();
            *max_p95 = (*max_p95).max(window.p95_duration_ms);
        }

        let mut endpoints: Vec<EndpointLatency> = worst
            .into_iter()
            .map(|(url, max_p95)| EndpointLatency { url, max_p95 })
            .collect();
        endpoints.sort_by(|a, b| {
            (Reverse(a.max_p95), &a.url).cmp(&(Reverse(b.max_p95), &b.url))
        });
        endpoints.truncate(TOP_ENDPOINTS);
        Ok(endpoints)
    }
}
