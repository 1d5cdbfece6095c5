use chrono::TimeDelta;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Upper bound on any single page returned by the query API.
pub const MAX_PAGE_SIZE_LIMIT: usize = 100;

const MAX_AGGREGATION_INTERVAL_SECS: u64 = 24 * 60 * 60;
const MAX_RETENTION_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;
const MAX_RETENTION_DAYS: u32 = 36_500;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Queue capacity must be at least 1")]
    EmptyQueue,

    #[error("At least one worker is required")]
    NoWorkers,

    #[error("Aggregation interval must be a whole number of minutes up to one day, got {0}s")]
    InvalidAggregationInterval(u64),

    #[error("Retention horizon must be between 1 and 36500 days, got {0}")]
    InvalidRetentionHorizon(u32),

    #[error("Retention interval must be between 1s and 30 days, got {0}s")]
    InvalidRetentionInterval(u64),

    #[error("Page sizes must satisfy 1 <= default ({default}) <= max ({max}) <= 100")]
    InvalidPageSize { default: usize, max: usize },
}

/// Telemetry pipeline configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Public listener serving ingestion and queries
    pub listener: Listener,
    /// Admin listener serving health and readiness probes
    pub admin_listener: Listener,
    /// Largest request body accepted on the public listener
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub grouping: GroupingConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.queue.validate()?;
        self.aggregation.validate()?;
        self.retention.validate()?;
        self.query.validate()?;
        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of accepted events that may wait for a worker
    pub capacity: usize,
    /// Number of worker tasks draining the queue
    pub workers: usize,
    /// How long ingestion waits for queue space before answering 503
    pub enqueue_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            capacity: 10_000,
            workers: 4,
            enqueue_timeout_ms: 100,
        }
    }
}

impl QueueConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.capacity == 0 {
            return Err(ValidationError::EmptyQueue);
        }
        if self.workers == 0 {
            return Err(ValidationError::NoWorkers);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct GroupingConfig {
    /// Partition error groups by request URL in addition to fingerprint
    pub scope_by_url: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct AggregationConfig {
    pub interval_secs: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        AggregationConfig { interval_secs: 300 }
    }
}

impl AggregationConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.interval_secs == 0
            || self.interval_secs % 60 != 0
            || self.interval_secs > MAX_AGGREGATION_INTERVAL_SECS
        {
            return Err(ValidationError::InvalidAggregationInterval(
                self.interval_secs,
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetentionConfig {
    pub interval_secs: u64,
    pub horizon_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        RetentionConfig {
            interval_secs: 24 * 60 * 60,
            horizon_days: 30,
        }
    }
}

impl RetentionConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if !(1..=MAX_RETENTION_DAYS).contains(&self.horizon_days) {
            return Err(ValidationError::InvalidRetentionHorizon(self.horizon_days));
        }
        if !(1..=MAX_RETENTION_INTERVAL_SECS).contains(&self.interval_secs) {
            return Err(ValidationError::InvalidRetentionInterval(
                self.interval_secs,
            ));
        }
        Ok(())
    }

    pub fn horizon(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.horizon_days))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            default_page_size: 50,
            max_page_size: MAX_PAGE_SIZE_LIMIT,
        }
    }
}

impl QueryConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.default_page_size == 0
            || self.default_page_size > self.max_page_size
            || self.max_page_size > MAX_PAGE_SIZE_LIMIT
        {
            return Err(ValidationError::InvalidPageSize {
                default: self.default_page_size,
                max: self.max_page_size,
            });
        }
        Ok(())
    }
}
