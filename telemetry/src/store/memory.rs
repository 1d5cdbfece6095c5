use super::{Clock, ErrorOccurrence, Page, PageOf, StoreError, TelemetryStore};
use crate::model::{
    AggregatedMetricWindow, ErrorGroup, ErrorPayload, GroupKey, PerformancePayload,
    RawErrorEvent, RawPerformanceSample,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directory::ProjectId;
use parking_lot::{Mutex, RwLock};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct ErrorTables {
    groups: HashMap<u64, ErrorGroup>,
    group_index: HashMap<GroupKey, u64>,
    events: Vec<RawErrorEvent>,
}

type WindowKey = (ProjectId, String, DateTime<Utc>);

/// Process-local store. Every method takes its lock once, so each call is
/// atomic with respect to every other call.
pub struct MemoryStore {
    clock: Clock,
    next_id: AtomicU64,
    samples: RwLock<Vec<RawPerformanceSample>>,
    // Groups and their raw events share a lock so an occurrence is counted
    // and stored together.
    errors: Mutex<ErrorTables>,
    windows: RwLock<BTreeMap<WindowKey, AggregatedMetricWindow>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            clock: Arc::new(Utc::now),
            next_id: AtomicU64::new(0),
            samples: RwLock::default(),
            errors: Mutex::default(),
            windows: RwLock::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_clock(clock: Clock) -> Self {
        MemoryStore {
            clock,
            ..Self::new()
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn performance_sample_count(&self) -> usize {
        self.samples.read().len()
    }

    pub fn error_event_count(&self) -> usize {
        self.errors.lock().events.len()
    }

    pub fn error_group_count(&self) -> usize {
        self.errors.lock().groups.len()
    }

    pub fn metric_window_count(&self) -> usize {
        self.windows.read().len()
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn insert_performance_sample(
        &self,
        project_id: ProjectId,
        payload: &PerformancePayload,
    ) -> Result<RawPerformanceSample, StoreError> {
        let mut samples = self.samples.write();
        let sample = RawPerformanceSample {
            id: self.next_id(),
            project_id,
            timestamp: (self.clock)(),
            url: payload.url.clone(),
            method: payload.method.clone(),
            status_code: payload.status_code,
            duration_ms: payload.duration_ms,
        };
        samples.push(sample.clone());
        Ok(sample)
    }

    async fn record_error_occurrence(
        &self,
        key: GroupKey,
        payload: &ErrorPayload,
    ) -> Result<ErrorOccurrence, StoreError> {
        let mut tables = self.errors.lock();
        let timestamp = (self.clock)();

        let (group, created) = match tables.group_index.get(&key).copied() {
            Some(group_id) => {
                let group = tables
                    .groups
                    .get_mut(&group_id)
                    .ok_or_else(|| StoreError::Unavailable(format!("dangling group {group_id}")))?;
                group.occurrence_count += 1;
                group.last_seen = group.last_seen.max(timestamp);
                (group.clone(), false)
            }
            None => {
                let group = ErrorGroup {
                    id: self.next_id(),
                    project_id: key.project_id,
                    fingerprint: key.fingerprint.clone(),
                    scope_url: key.url.clone(),
                    error_type: payload.error_type.clone(),
                    url: payload.url.clone(),
                    first_seen: timestamp,
                    last_seen: timestamp,
                    occurrence_count: 1,
                };
                tables.group_index.insert(key, group.id);
                tables.groups.insert(group.id, group.clone());
                (group, true)
            }
        };

        let event = RawErrorEvent {
            id: self.next_id(),
            project_id: group.project_id,
            group_id: group.id,
            timestamp,
            url: payload.url.clone(),
            method: payload.method.clone(),
            error_type: payload.error_type.clone(),
            error_message: payload.error_message.clone(),
            traceback: payload.traceback.clone(),
        };
        tables.events.push(event.clone());

        Ok(ErrorOccurrence {
            group,
            event,
            created,
        })
    }

    async fn performance_samples_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawPerformanceSample>, StoreError> {
        let samples = self.samples.read();
        Ok(samples
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp < end)
            .cloned()
            .collect())
    }

    async fn upsert_metric_window(
        &self,
        window: AggregatedMetricWindow,
    ) -> Result<(), StoreError> {
        let key = (window.project_id, window.url.clone(), window.window_start);
        self.windows.write().insert(key, window);
        Ok(())
    }

    async fn delete_error_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.errors.lock();
        let before = tables.events.len();
        tables.events.retain(|e| e.timestamp >= cutoff);
        Ok((before - tables.events.len()) as u64)
    }

    async fn delete_performance_samples_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut samples = self.samples.write();
        let before = samples.len();
        samples.retain(|s| s.timestamp >= cutoff);
        Ok((before - samples.len()) as u64)
    }

    async fn list_error_groups(
        &self,
        project_id: ProjectId,
        page: Page,
    ) -> Result<PageOf<ErrorGroup>, StoreError> {
        let mut groups: Vec<ErrorGroup> = self
            .errors
            .lock()
            .groups
            .values()
            .filter(|g| g.project_id == project_id)
            .cloned()
            .collect();
        groups.sort_by_key(|g| (Reverse(g.last_seen), Reverse(g.id)));
        Ok(PageOf::from_sorted(groups, page))
    }

    async fn find_error_group(
        &self,
        project_id: ProjectId,
        fingerprint: &str,
        scope_url: Option<&str>,
    ) -> Result<Option<ErrorGroup>, StoreError> {
        let tables = self.errors.lock();
        Ok(tables
            .groups
            .values()
            .filter(|g| g.project_id == project_id && g.fingerprint == fingerprint)
            .filter(|g| scope_url.is_none() || g.scope_url.as_deref() == scope_url)
            .max_by_key(|g| (g.last_seen, g.id))
            .cloned())
    }

    async fn latest_error_event(
        &self,
        project_id: ProjectId,
        group_id: u64,
    ) -> Result<Option<RawErrorEvent>, StoreError> {
        let tables = self.errors.lock();
        Ok(tables
            .events
            .iter()
            .filter(|e| e.project_id == project_id && e.group_id == group_id)
            .max_by_key(|e| (e.timestamp, e.id))
            .cloned())
    }

    async fn list_metric_windows(
        &self,
        project_id: ProjectId,
        url_contains: Option<&str>,
        page: Page,
    ) -> Result<PageOf<AggregatedMetricWindow>, StoreError> {
        let mut windows: Vec<AggregatedMetricWindow> = self
            .windows
            .read()
            .values()
            .filter(|w| w.project_id == project_id)
            .filter(|w| url_contains.is_none_or(|needle| w.url.contains(needle)))
            .cloned()
            .collect();
        windows.sort_by(|a, b| {
            b.window_start
                .cmp(&a.window_start)
                .then_with(|| a.url.cmp(&b.url))
        });
        Ok(PageOf::from_sorted(windows, page))
    }

    async fn metric_windows(
        &self,
        project_id: ProjectId,
    ) -> Result<Vec<AggregatedMetricWindow>, StoreError> {
        Ok(self
            .windows
            .read()
            .values()
            .filter(|w| w.project_id == project_id)
            .cloned()
            .collect())
    }
}
