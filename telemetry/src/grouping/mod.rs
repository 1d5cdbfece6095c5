//! Error grouping: fingerprints each error occurrence and counts it against
//! its group.

mod fingerprint;
mod sanitize;

pub use fingerprint::fingerprint;
pub use sanitize::sanitize;

use crate::metrics_defs::ERROR_GROUPS_CREATED;
use crate::model::{ErrorPayload, GroupKey};
use crate::store::{ErrorOccurrence, StoreError, TelemetryStore};
use directory::ProjectId;
use shared::counter;
use std::sync::Arc;

#[derive(Clone)]
pub struct GroupingEngine {
    store: Arc<dyn TelemetryStore>,
    scope_by_url: bool,
}

impl GroupingEngine {
    pub fn new(store: Arc<dyn TelemetryStore>, scope_by_url: bool) -> Self {
        Self {
            store,
            scope_by_url,
        }
    }

    pub fn group_key(&self, project_id: ProjectId, payload: &ErrorPayload) -> GroupKey {
        GroupKey {
            project_id,
            fingerprint: fingerprint(
                &payload.error_type,
                &payload.error_message,
                &payload.traceback,
            ),
            url: self.scope_by_url.then(|| payload.url.clone()),
        }
    }

    /// Records one occurrence. Concurrent calls for the same key always end up
    /// on a single group whose count equals the number of calls.
    pub async fn process_error(
        &self,
        project_id: ProjectId,
        payload: &ErrorPayload,
    ) -> Result<ErrorOccurrence, StoreError> {
        let key = self.group_key(project_id, payload);
        let occurrence = self.store.record_error_occurrence(key, payload).await?;

        if occurrence.created {
            counter!(ERROR_GROUPS_CREATED).increment(1);
            tracing::debug!(
                project_id = %project_id,
                group_id = occurrence.group.id,
                fingerprint = %occurrence.group.fingerprint,
                "Opened error group"
            );
        }
        Ok(occurrence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Page};

    fn payload(message: &str, url: &str) -> ErrorPayload {
        ErrorPayload {
            error_type: "ValueError".into(),
            error_message: message.into(),
            traceback: "File app.py, line 12".into(),
            url: url.into(),
            method: "POST".into(),
        }
    }

    #[tokio::test]
    async fn test_recurrences_share_group() {
        let store = Arc::new(MemoryStore::new());
        let engine = GroupingEngine::new(store.clone(), false);
        let project = ProjectId::new_v4();

        let first = engine
            .process_error(project, &payload("bad id 41", "/a"))
            .await
            .unwrap();
        let second = engine
            .process_error(project, &payload("bad id 97", "/b"))
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.group.id, second.group.id);
        assert_eq!(second.group.occurrence_count, 2);
        assert_eq!(second.group.scope_url, None);
    }

    #[tokio::test]
    async fn test_scope_by_url_partitions_groups() {
        let store = Arc::new(MemoryStore::new());
        let engine = GroupingEngine::new(store.clone(), true);
        let project = ProjectId::new_v4();

        let a = engine
            .process_error(project, &payload("bad id 1", "/a"))
            .await
            .unwrap();
        let b = engine
            .process_error(project, &payload("bad id 2", "/b"))
            .await
            .unwrap();

        assert_eq!(a.group.fingerprint, b.group.fingerprint);
        assert_ne!(a.group.id, b.group.id);
        assert_eq!(b.group.scope_url.as_deref(), Some("/b"));
    }

    #[tokio::test]
    async fn test_projects_do_not_share_groups() {
        let store = Arc::new(MemoryStore::new());
        let engine = GroupingEngine::new(store.clone(), false);

        let a = engine
            .process_error(ProjectId::new_v4(), &payload("boom", "/a"))
            .await
            .unwrap();
        let b = engine
            .process_error(ProjectId::new_v4(), &payload("boom", "/a"))
            .await
            .unwrap();

        assert!(a.created && b.created);
        assert_ne!(a.group.id, b.group.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_occurrences_count_exactly() {
        let store = Arc::new(MemoryStore::new());
        let engine = GroupingEngine::new(store.clone(), false);
        let project = ProjectId::new_v4();

        let mut handles = Vec::new();
        for task in 0..8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    let message = format!("timeout after {} ms", task * 100 + i);
                    engine
                        .process_error(project, &payload(&message, "/checkout"))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let groups = store
            .list_error_groups(project, Page { limit: 10, offset: 0 })
            .await
            .unwrap();
        assert_eq!(groups.total, 1);
        assert_eq!(groups.items[0].occurrence_count, 200);
        assert_eq!(store.error_event_count(), 200);
    }
}
