//! Records flowing through the pipeline.

use chrono::{DateTime, Utc};
use directory::ProjectId;
use serde::{Deserialize, Serialize};

/// URL key of the per-project roll-up row written by the aggregator.
pub const OVERALL_URL: &str = "overall";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Performance,
    Error,
}

impl EventKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "performance" => Some(EventKind::Performance),
            "error" => Some(EventKind::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Performance => "performance",
            EventKind::Error => "error",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformancePayload {
    pub url: String,
    pub method: String,
    pub status_code: u32,
    pub duration_ms: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error_type: String,
    pub error_message: String,
    pub traceback: String,
    pub url: String,
    pub method: String,
}

/// A validated ingestion payload, tagged with its kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum EventPayload {
    Performance(PerformancePayload),
    Error(ErrorPayload),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Performance(_) => EventKind::Performance,
            EventPayload::Error(_) => EventKind::Error,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RawPerformanceSample {
    pub id: u64,
    pub project_id: ProjectId,
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub method: String,
    pub status_code: u32,
    pub duration_ms: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RawErrorEvent {
    pub id: u64,
    pub project_id: ProjectId,
    pub group_id: u64,
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub method: String,
    pub error_type: String,
    pub error_message: String,
    pub traceback: String,
}

/// Identifies the group an error occurrence is counted against.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub project_id: ProjectId,
    pub fingerprint: String,
    /// Set only when groups are partitioned by URL.
    pub url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorGroup {
    pub id: u64,
    pub project_id: ProjectId,
    pub fingerprint: String,
    /// The URL partition, when groups are partitioned by URL.
    pub scope_url: Option<String>,
    pub error_type: String,
    pub url: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrence_count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AggregatedMetricWindow {
    pub project_id: ProjectId,
    /// Endpoint URL, or [`OVERALL_URL`] for the project roll-up.
    pub url: String,
    pub window_start: DateTime<Utc>,
    pub request_count: u64,
    pub avg_duration_ms: u32,
    pub p50_duration_ms: u32,
    pub p95_duration_ms: u32,
}
