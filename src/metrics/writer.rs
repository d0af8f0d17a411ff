//! Prometheus text exposition writer.

use crate::metrics::data::{MetricKind, MetricRecord, MetricValue};
use std::collections::HashSet;
use std::fmt::Write;

/// Values at or above this magnitude are written in scientific notation.
pub const SCIENTIFIC_THRESHOLD: f64 = 1_000_000.0;

#[derive(Debug)]
struct Declared {
    name: String,
    kind: MetricKind,
    help: String,
}

/// Accumulates exposition text for one scrape.
///
/// The `# HELP`/`# TYPE` header of a metric is written once, right before
/// its first sample. Declaring a name again later only switches the
/// current metric back to it.
#[derive(Debug, Default)]
pub struct MetricsWriter {
    buffer: String,
    current: Option<Declared>,
    emitted: HashSet<String>,
}

impl MetricsWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `name` the metric that subsequent samples belong to.
    pub fn declare(&mut self, name: &str, kind: MetricKind, help: &str) {
        self.current = Some(Declared {
            name: name.to_string(),
            kind,
            help: help.to_string(),
        });
    }

    /// Write one sample of the current metric.
    pub fn sample(&mut self, labels: &[(String, String)], value: MetricValue) {
        let Some(current) = self.current.as_ref() else {
            tracing::warn!("Dropping sample written before any metric was declared");
            return;
        };

        if self.emitted.insert(current.name.clone()) {
            if !current.help.is_empty() {
                let _ = writeln!(self.buffer, "# HELP {} {}.", current.name, current.help);
            }
            let _ = writeln!(self.buffer, "# TYPE {} {}", current.name, current.kind);
        }

        self.buffer.push_str(&current.name);
        if !labels.is_empty() {
            self.buffer.push('{');
            for (i, (key, val)) in labels.iter().enumerate() {
                if i > 0 {
                    self.buffer.push(',');
                }
                let _ = write!(self.buffer, "{}=\"{}\"", key, val);
            }
            self.buffer.push('}');
        }
        self.buffer.push(' ');
        self.buffer.push_str(&format_value(value));
        self.buffer.push('\n');
    }

    /// Declare a record's metric and write all of its samples.
    pub fn write_record(&mut self, record: &MetricRecord) {
        self.declare(&record.name, record.kind, &record.help);
        for sample in &record.samples {
            self.sample(&sample.labels, sample.value);
        }
    }

    /// Append already-formatted exposition text verbatim.
    pub fn push_raw(&mut self, text: &str) {
        let text = text.trim_matches('\n');
        if text.is_empty() {
            return;
        }
        self.buffer.push_str(text);
        self.buffer.push('\n');
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn finish(self) -> String {
        self.buffer
    }
}

/// Render a value the way the exporter writes it.
pub fn format_value(value: MetricValue) -> String {
    let as_float = value.as_f64();
    if !as_float.is_finite() {
        return if as_float.is_nan() {
            "NaN".to_string()
        } else if as_float > 0.0 {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        };
    }

    if as_float.abs() >= SCIENTIFIC_THRESHOLD {
        return format_scientific(as_float);
    }

    match value {
        MetricValue::Int(v) => v.to_string(),
        MetricValue::Float(v) => {
            let fixed = format!("{:.6}", v);
            let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
            if trimmed == "-0" {
                "0".to_string()
            } else {
                trimmed.to_string()
            }
        }
    }
}

/// `1.000000e+06` style: six mantissa digits, signed two-digit exponent.
fn format_scientific(v: f64) -> String {
    let raw = format!("{:.6e}", v);
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exp.abs())
        }
        None => raw,
    }
}
