//! Metrics definitions for the telemetry pipeline.

use shared::metrics_defs::{MetricDef, MetricType};

pub const INGEST_ACCEPTED: MetricDef = MetricDef {
    name: "telemetry.ingest.accepted",
    metric_type: MetricType::Counter,
    description: "Number of events accepted onto the ingest queue, tagged by kind",
};

pub const INGEST_REJECTED: MetricDef = MetricDef {
    name: "telemetry.ingest.rejected",
    metric_type: MetricType::Counter,
    description: "Number of ingestion requests rejected, tagged by reason",
};

pub const QUEUE_DEPTH: MetricDef = MetricDef {
    name: "telemetry.queue.depth",
    metric_type: MetricType::Gauge,
    description: "Number of accepted events waiting for a worker",
};

pub const QUEUE_LATENCY: MetricDef = MetricDef {
    name: "telemetry.queue.latency",
    metric_type: MetricType::Histogram,
    description: "Seconds between an event being accepted and a worker picking it up",
};

pub const EVENTS_PROCESSED: MetricDef = MetricDef {
    name: "telemetry.worker.processed",
    metric_type: MetricType::Counter,
    description: "Number of queued events handled by workers, tagged by kind and outcome",
};

pub const EVENTS_DISCARDED: MetricDef = MetricDef {
    name: "telemetry.worker.discarded",
    metric_type: MetricType::Counter,
    description: "Number of queued events dropped because their project no longer exists",
};

pub const FINGERPRINT_FALLBACKS: MetricDef = MetricDef {
    name: "telemetry.grouping.fingerprint_fallback",
    metric_type: MetricType::Counter,
    description: "Number of fingerprints computed without sanitization",
};

pub const ERROR_GROUPS_CREATED: MetricDef = MetricDef {
    name: "telemetry.grouping.groups_created",
    metric_type: MetricType::Counter,
    description: "Number of new error groups opened",
};

pub const WINDOWS_WRITTEN: MetricDef = MetricDef {
    name: "telemetry.aggregation.windows_written",
    metric_type: MetricType::Counter,
    description: "Number of aggregated metric windows upserted",
};

pub const AGGREGATION_FAILURES: MetricDef = MetricDef {
    name: "telemetry.aggregation.failures",
    metric_type: MetricType::Counter,
    description: "Number of partitions whose window could not be written",
};

pub const ROWS_PRUNED: MetricDef = MetricDef {
    name: "telemetry.retention.rows_pruned",
    metric_type: MetricType::Counter,
    description: "Number of raw rows deleted by retention, tagged by table",
};

pub const TASK_DURATION: MetricDef = MetricDef {
    name: "telemetry.task.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of periodic task runs in seconds, tagged by task",
};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "telemetry.request.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of HTTP requests in seconds, tagged by route and status",
};

pub const ALL_METRICS: &[MetricDef] = &[
    INGEST_ACCEPTED,
    INGEST_REJECTED,
    QUEUE_DEPTH,
    QUEUE_LATENCY,
    EVENTS_PROCESSED,
    EVENTS_DISCARDED,
    FINGERPRINT_FALLBACKS,
    ERROR_GROUPS_CREATED,
    WINDOWS_WRITTEN,
    AGGREGATION_FAILURES,
    ROWS_PRUNED,
    TASK_DURATION,
    REQUEST_DURATION,
];
