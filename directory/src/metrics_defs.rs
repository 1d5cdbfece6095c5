//! Metrics definitions for the project directory.

use shared::metrics_defs::{MetricDef, MetricType};

pub const NEGATIVE_CACHE_HIT: MetricDef = MetricDef {
    name: "directory.negative_cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of key lookups answered by the negative cache",
};

pub const NEGATIVE_CACHE_MISS: MetricDef = MetricDef {
    name: "directory.negative_cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of key lookups that missed the negative cache",
};

pub const PROJECTS_LOADED: MetricDef = MetricDef {
    name: "directory.projects",
    metric_type: MetricType::Gauge,
    description: "Number of projects currently held by the directory",
};

pub const ALL_METRICS: &[MetricDef] = &[NEGATIVE_CACHE_HIT, NEGATIVE_CACHE_MISS, PROJECTS_LOADED];
