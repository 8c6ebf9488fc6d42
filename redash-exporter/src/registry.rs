//! Metric registry that stores the latest value of each gauge series.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::trace;

use crate::mapping::{MetricDef, MetricSampleSet, REDASH_METRICS};

/// Registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Metric already registered: {0}")]
    Duplicate(String),
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),
    #[error("Metric {name} expects {expected} label value(s), got {got}")]
    LabelMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
}

/// A declared gauge and its series.
#[derive(Debug, Clone)]
struct MetricFamily {
    name: String,
    help: String,
    label_names: Vec<String>,
    /// Values keyed by label values, positionally matching `label_names`.
    series: BTreeMap<Vec<String>, f64>,
}

impl MetricFamily {
    fn check_labels(&self, label_values: &[String]) -> Result<(), RegistryError> {
        if label_values.len() != self.label_names.len() {
            return Err(RegistryError::LabelMismatch {
                name: self.name.clone(),
                expected: self.label_names.len(),
                got: label_values.len(),
            });
        }
        Ok(())
    }
}

/// Thread-safe gauge registry.
///
/// Metrics are declared once, then written by the poller and rendered by the
/// scrape handler. Series are overwritten in place and never removed.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    /// Families in declaration order.
    families: RwLock<Vec<MetricFamily>>,
    /// Family position by name. Only modified during declaration.
    index: HashMap<String, usize>,
}

impl MetricRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with every Redash gauge declared.
    pub fn with_redash_metrics() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for def in REDASH_METRICS {
            registry.register_def(def)?;
        }
        Ok(registry)
    }

    /// Declare a gauge.
    pub fn register(
        &mut self,
        name: &str,
        help: &str,
        label_names: &[&str],
    ) -> Result<(), RegistryError> {
        if self.index.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }

        let families = self.families.get_mut();
        self.index.insert(name.to_string(), families.len());
        families.push(MetricFamily {
            name: name.to_string(),
            help: help.to_string(),
            label_names: label_names.iter().map(|l| l.to_string()).collect(),
            series: BTreeMap::new(),
        });

        Ok(())
    }

    /// Declare a gauge from its static definition.
    pub fn register_def(&mut self, def: &MetricDef) -> Result<(), RegistryError> {
        self.register(def.name, def.help, def.labels)
    }

    /// Set the value of one series.
    pub fn set(&self, name: &str, label_values: &[&str], value: f64) -> Result<(), RegistryError> {
        let position = self.position(name)?;
        let label_values: Vec<String> = label_values.iter().map(|v| v.to_string()).collect();

        let mut families = self.families.write();
        let family = &mut families[position];
        family.check_labels(&label_values)?;
        family.series.insert(label_values, value);

        Ok(())
    }

    /// Write a whole sample set under a single lock.
    ///
    /// Every sample is validated before anything is written, so a bad sample
    /// leaves the registry untouched.
    pub fn apply(&self, samples: &MetricSampleSet) -> Result<usize, RegistryError> {
        let mut families = self.families.write();

        let mut updates = Vec::with_capacity(samples.len());
        for sample in samples.iter() {
            let position = self.position(sample.name)?;
            families[position].check_labels(&sample.label_values)?;
            updates.push((position, sample));
        }

        for (position, sample) in &updates {
            families[*position]
                .series
                .insert(sample.label_values.clone(), sample.value);
        }

        trace!(count = updates.len(), "Applied samples to registry");
        Ok(updates.len())
    }

    /// Current value of a series.
    pub fn get(&self, name: &str, label_values: &[&str]) -> Option<f64> {
        let position = self.index.get(name)?;
        let key: Vec<String> = label_values.iter().map(|v| v.to_string()).collect();
        self.families.read()[*position].series.get(&key).copied()
    }

    /// Number of declared metrics.
    pub fn metric_count(&self) -> usize {
        self.index.len()
    }

    /// Number of series holding a value.
    pub fn series_count(&self) -> usize {
        self.families.read().iter().map(|f| f.series.len()).sum()
    }

    /// True until the first value is written.
    pub fn is_empty(&self) -> bool {
        self.series_count() == 0
    }

    /// Render all series in Prometheus exposition format.
    ///
    /// Metrics without any series are omitted.
    pub fn render(&self) -> String {
        let families = self.families.read();
        let mut output = String::with_capacity(families.len() * 128);

        for family in families.iter() {
            if family.series.is_empty() {
                continue;
            }

            writeln!(output, "# HELP {} {}", family.name, escape_help(&family.help)).ok();
            writeln!(output, "# TYPE {} gauge", family.name).ok();

            for (label_values, value) in &family.series {
                writeln!(
                    output,
                    "{}{} {}",
                    family.name,
                    format_labels(&family.label_names, label_values),
                    format_value(*value)
                )
                .ok();
            }
        }

        output
    }

    fn position(&self, name: &str) -> Result<usize, RegistryError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| RegistryError::UnknownMetric(name.to_string()))
    }
}

/// Create a shareable registry handle.
pub type SharedRegistry = Arc<MetricRegistry>;

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Escape special characters in HELP text.
fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Format labels for Prometheus exposition format.
fn format_labels(names: &[String], values: &[String]) -> String {
    if names.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = names
        .iter()
        .zip(values)
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}
