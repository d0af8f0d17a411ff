//! Traits for metrics sources.

use crate::error::Result;
use crate::metrics::data::MetricRecord;

/// Anything the HTTP layer and the CLI can scrape.
///
/// Implementations must tolerate concurrent calls; every scrape is
/// independent of the ones before it.
pub trait MetricsProvider: Send + Sync {
    /// One scrape rendered in the Prometheus text format.
    fn scrape(&self) -> impl std::future::Future<Output = Result<String>> + Send;

    /// One scrape as structured records.
    fn records(&self) -> impl std::future::Future<Output = Result<Vec<MetricRecord>>> + Send;
}
