//! # Remote Node Exporter
//!
//! Prometheus node metrics for hosts that cannot run a local agent, such as
//! home routers and other embedded Linux boxes. The exporter keeps one SSH
//! connection to the host, reads its kernel statistics files in a single
//! round trip per scrape and renders them in the Prometheus text format.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use remote_node_exporter::{
//!     start_web_server, Channel, ExporterConfig, NodeCollector, SshConnector, WebConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExporterConfig::new("192.168.2.1").with_username(Some("admin".into()));
//!     let config = Arc::new(config);
//!     let channel = Arc::new(Channel::new(SshConnector::new(Arc::clone(&config))));
//!     let collector = Arc::new(NodeCollector::from_config(channel, &config));
//!
//!     start_web_server(WebConfig::default(), collector).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod remote;
pub mod web;

// Re-export public API
pub use config::ExporterConfig;
pub use error::{ExporterError, Result};
pub use metrics::{
    collector::{Collector, NodeCollector},
    data::{MetricKind, MetricRecord, MetricValue},
    traits::MetricsProvider,
};
pub use remote::{Channel, CommandRunner, ScriptedRunner, SshConnector};
pub use web::{start_web_server, WebConfig};

/// The default web server port
pub const DEFAULT_WEB_PORT: u16 = 9101;

/// The default SSH port on the remote host
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Seconds to wait for the SSH connection to come up
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_WEB_PORT, 9101);
        assert_eq!(DEFAULT_SSH_PORT, 22);
        assert_eq!(DEFAULT_CONNECT_TIMEOUT_SECS, 8);
    }
}
