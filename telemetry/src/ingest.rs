//! The ingestion gate: authenticates, validates and enqueues events.

use crate::errors::ApiError;
use crate::metrics_defs::{INGEST_ACCEPTED, INGEST_REJECTED};
use crate::model::EventKind;
use crate::payload::parse_envelope;
use crate::queue::{QueueSender, WorkItem};
use chrono::Utc;
use directory::{Directory, ProjectId};
use shared::counter;

/// Acknowledgement returned once an event is queued.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Accepted {
    pub project_id: ProjectId,
    pub kind: EventKind,
}

/// Resolves the project behind an API key header value.
///
/// A missing or blank key is `Unauthenticated`, a key the directory does not
/// know is `Forbidden`.
pub fn authenticate(directory: &Directory, api_key: Option<&str>) -> Result<ProjectId, ApiError> {
    let api_key = api_key
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or(ApiError::Unauthenticated)?;
    directory.resolve(api_key).map_err(|_| ApiError::Forbidden)
}

#[derive(Clone)]
pub struct IngestGate {
    directory: Directory,
    queue: QueueSender,
}

impl IngestGate {
    pub fn new(directory: Directory, queue: QueueSender) -> Self {
        Self { directory, queue }
    }

    /// Accepts one event. Returns as soon as the event is queued; grouping and
    /// persistence happen on the worker pool.
    pub async fn ingest(&self, api_key: Option<&str>, body: &[u8]) -> Result<Accepted, ApiError> {
        let result = self.try_ingest(api_key, body).await;
        match &result {
            Ok(accepted) => {
                counter!(INGEST_ACCEPTED, "kind" => accepted.kind.as_str()).increment(1);
            }
            Err(e) => {
                counter!(INGEST_REJECTED, "reason" => e.reason()).increment(1);
            }
        }
        result
    }

    async fn try_ingest(&self, api_key: Option<&str>, body: &[u8]) -> Result<Accepted, ApiError> {
        let project_id = authenticate(&self.directory, api_key)?;
        let payload = parse_envelope(body)?;
        let kind = payload.kind();

        let item = WorkItem {
            project_id,
            received_at: Utc::now(),
            payload,
        };
        self.queue.enqueue(item).await.map_err(|e| {
            tracing::warn!(project_id = %project_id, error = %e, "Rejecting event, queue unavailable");
            ApiError::ServiceUnavailable(e.to_string())
        })?;

        Ok(Accepted { project_id, kind })
    }
}
