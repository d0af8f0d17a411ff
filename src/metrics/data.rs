//! Data structures for exported metrics.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prometheus metric type written on the `# TYPE` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sample value. Integers and floats render differently below the
/// scientific-notation threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
}

impl MetricValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            MetricValue::Int(v) => v as f64,
            MetricValue::Float(v) => v,
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<i32> for MetricValue {
    fn from(v: i32) -> Self {
        MetricValue::Int(i64::from(v))
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

/// Ordered label pairs. Order is preserved in the output.
pub type Labels = Vec<(String, String)>;

/// One labelled sample of a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub labels: Labels,
    pub value: MetricValue,
}

/// A metric family: name, type, optional help and its samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Full metric name, including the `node_` prefix
    pub name: String,
    pub kind: MetricKind,
    /// Help text; empty means no `# HELP` line
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub help: String,
    pub samples: Vec<Sample>,
}

impl MetricRecord {
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            kind,
            help: String::new(),
            samples: Vec::new(),
        }
    }

    pub fn gauge(name: impl Into<String>) -> Self {
        Self::new(name, MetricKind::Gauge)
    }

    pub fn counter(name: impl Into<String>) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    /// Add an unlabelled sample.
    pub fn with_value(mut self, value: impl Into<MetricValue>) -> Self {
        self.push(&[], value);
        self
    }

    /// Add a sample with the given labels.
    pub fn push(&mut self, labels: &[(&str, &str)], value: impl Into<MetricValue>) {
        self.samples.push(Sample {
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            value: value.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Value of the first sample, mostly useful for unlabelled metrics.
    pub fn first_value(&self) -> Option<MetricValue> {
        self.samples.first().map(|s| s.value)
    }

    /// Value of the sample whose labels contain every given pair.
    pub fn value_for(&self, labels: &[(&str, &str)]) -> Option<MetricValue> {
        self.samples
            .iter()
            .find(|s| {
                labels
                    .iter()
                    .all(|(k, v)| s.labels.iter().any(|(sk, sv)| sk == k && sv == v))
            })
            .map(|s| s.value)
    }
}

/// A mounted filesystem seen in both the mount table and the usage report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemEntry {
    /// Mount point (e.g. "/", "/data")
    pub mount_point: String,
    /// Filesystem type (e.g. "ext4", "jffs2")
    pub fs_type: String,
    /// Source device (e.g. "/dev/sda1")
    pub device: String,
    /// Total size in bytes
    pub size_bytes: u64,
    /// Used space in bytes
    pub used_bytes: u64,
    /// Space available to unprivileged users in bytes
    pub available_bytes: u64,
}

impl FilesystemEntry {
    /// Size minus used, in bytes.
    pub fn free_bytes(&self) -> u64 {
        self.size_bytes.saturating_sub(self.used_bytes)
    }
}
