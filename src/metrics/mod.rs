//! Node metrics: remote file reading, parsing and exposition.
//!
//! A scrape pre-reads every fixed input file in one remote command, runs
//! each collector over the cached text and renders the result in the
//! Prometheus text format.

pub mod collector;
pub mod collectors;
pub mod data;
pub mod preread;
pub mod procfs;
pub mod traits;
pub mod writer;

// Re-export commonly used items
pub use collector::{Collector, NodeCollector};
pub use data::{MetricKind, MetricRecord, MetricValue};
pub use traits::MetricsProvider;
pub use writer::MetricsWriter;
