//! Mapping from a Redash status record to Prometheus samples.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::status::StatusRecord;

/// Raw database metric holding the size of stored query results.
pub const QUERY_RESULTS_SIZE_KEY: &str = "Query Results Size";
/// Raw database metric holding the size of the Redash database.
pub const DB_SIZE_KEY: &str = "Redash DB Size";

/// Label carried by `redash_info`.
pub const VERSION_LABEL: &str = "redash_version";

pub const INFO: &str = "redash_info";
pub const DASHBOARDS_COUNT: &str = "redash_dashboards_count";
pub const QUERY_RESULTS_SIZE: &str = "redash_query_results_size_bytes";
pub const DB_SIZE: &str = "redash_db_size_bytes";
pub const OUTDATED_QUERIES_COUNT: &str = "redash_outdated_queries_count";
pub const QUEUES_DEFAULT: &str = "redash_queues_default";
pub const QUEUES_PERIODIC: &str = "redash_queues_periodic";
pub const QUEUES_QUERIES: &str = "redash_queues_queries";
pub const QUEUES_SCHEDULED_QUERIES: &str = "redash_queues_scheduled_queries";
pub const QUEUES_SCHEMAS: &str = "redash_queues_schemas";
pub const QUERIES_COUNT: &str = "redash_queries_count";
pub const QUERY_RESULTS_COUNT: &str = "redash_query_results_count";
pub const REDIS_USED_MEMORY: &str = "redash_redis_used_memory_bytes";
pub const UNUSED_QUERY_RESULTS_COUNT: &str = "redash_unused_query_results_count";
// Misspelled upstream; existing dashboards query this name.
pub const WIDGETS_COUNT: &str = "redash_wigets_count";

/// Static identity of an exported gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDef {
    pub name: &'static str,
    pub help: &'static str,
    pub labels: &'static [&'static str],
}

impl MetricDef {
    const fn gauge(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            labels: &[],
        }
    }
}

/// Every gauge exported for Redash, in exposition order.
pub const REDASH_METRICS: &[MetricDef] = &[
    MetricDef {
        name: INFO,
        help: "Information of Redash.",
        labels: &[VERSION_LABEL],
    },
    MetricDef::gauge(DASHBOARDS_COUNT, "Number of dashboards in Redash."),
    MetricDef::gauge(QUERY_RESULTS_SIZE, "Size of Redash query results."),
    MetricDef::gauge(DB_SIZE, "Size of Redash database."),
    MetricDef::gauge(OUTDATED_QUERIES_COUNT, "Number of outdated queries."),
    MetricDef::gauge(QUEUES_DEFAULT, "Number of default queues."),
    MetricDef::gauge(QUEUES_PERIODIC, "Number of periodic queues."),
    MetricDef::gauge(QUEUES_QUERIES, "Number of query queues."),
    MetricDef::gauge(QUEUES_SCHEDULED_QUERIES, "Number of scheduled query queues."),
    MetricDef::gauge(QUEUES_SCHEMAS, "Number of schemas queues."),
    MetricDef::gauge(QUERIES_COUNT, "Number of queries stored in redash."),
    MetricDef::gauge(QUERY_RESULTS_COUNT, "Number of query results."),
    MetricDef::gauge(REDIS_USED_MEMORY, "Memory size used by redis in Redash."),
    MetricDef::gauge(UNUSED_QUERY_RESULTS_COUNT, "Number of unused query results."),
    MetricDef::gauge(WIDGETS_COUNT, "Number of widgets."),
];

/// A single value for one series of a declared metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Metric name.
    pub name: &'static str,
    /// Label values, positionally matching the metric's declared labels.
    pub label_values: Vec<String>,
    pub value: f64,
}

impl Sample {
    fn scalar(name: &'static str, value: f64) -> Self {
        Self {
            name,
            label_values: Vec::new(),
            value,
        }
    }
}

/// Samples produced from one status record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSampleSet {
    samples: Vec<Sample>,
}

impl MetricSampleSet {
    /// Look up the sample for a metric name.
    pub fn get(&self, name: &str) -> Option<&Sample> {
        self.samples.iter().find(|s| s.name == name)
    }

    /// Value of a metric, if present.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.get(name).map(|s| s.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Classify a raw `[name, value]` entry.
///
/// The two elements may come in either order. Anything other than exactly
/// one string and one number yields `None`.
pub fn raw_metric_pair(entry: &Value) -> Option<(&str, f64)> {
    let [a, b] = entry.as_array()?.as_slice() else {
        return None;
    };

    match (a, b) {
        (Value::String(key), Value::Number(n)) | (Value::Number(n), Value::String(key)) => {
            Some((key.as_str(), n.as_f64()?))
        }
        _ => None,
    }
}

/// Collect raw database metrics into a map. Later duplicates win.
pub fn raw_metrics(status: &StatusRecord) -> HashMap<&str, f64> {
    let mut metrics = HashMap::with_capacity(status.database_metrics.metrics.len());

    for entry in &status.database_metrics.metrics {
        match raw_metric_pair(entry) {
            Some((key, value)) => {
                metrics.insert(key, value);
            }
            None => {
                debug!(entry = %entry, "Skipping malformed database metric");
            }
        }
    }

    metrics
}

/// Map a status record onto the full set of Redash samples.
///
/// Never fails; missing raw metrics map to zero.
pub fn map_status(status: &StatusRecord) -> MetricSampleSet {
    let raw = raw_metrics(status);
    let raw_value = |key: &str| raw.get(key).copied().unwrap_or(0.0);
    let queues = &status.manager.queues;

    let samples = vec![
        Sample {
            name: INFO,
            label_values: vec![status.version.clone()],
            value: 1.0,
        },
        Sample::scalar(DASHBOARDS_COUNT, status.dashboards_count),
        Sample::scalar(QUERY_RESULTS_SIZE, raw_value(QUERY_RESULTS_SIZE_KEY)),
        Sample::scalar(DB_SIZE, raw_value(DB_SIZE_KEY)),
        Sample::scalar(OUTDATED_QUERIES_COUNT, status.manager.outdated_queries_count),
        Sample::scalar(QUEUES_DEFAULT, queues.default.size),
        Sample::scalar(QUEUES_PERIODIC, queues.periodic.size),
        Sample::scalar(QUEUES_QUERIES, queues.queries.size),
        Sample::scalar(QUEUES_SCHEDULED_QUERIES, queues.scheduled_queries.size),
        Sample::scalar(QUEUES_SCHEMAS, queues.schemas.size),
        Sample::scalar(QUERIES_COUNT, status.queries_count),
        Sample::scalar(QUERY_RESULTS_COUNT, status.query_results_count),
        Sample::scalar(REDIS_USED_MEMORY, status.redis_used_memory),
        Sample::scalar(UNUSED_QUERY_RESULTS_COUNT, status.unused_query_results_count),
        Sample::scalar(WIDGETS_COUNT, status.widgets_count),
    ];

    MetricSampleSet { samples }
}
