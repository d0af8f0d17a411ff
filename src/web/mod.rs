//! HTTP surface: `/metrics`, a JSON view of the same scrape, a health check
//! and a landing page.

pub mod config;
pub mod handlers;
pub mod router;

// Re-export commonly used items
pub use config::WebConfig;
pub use router::create_app;

use crate::error::{ExporterError, Result};
use crate::metrics::MetricsProvider;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Serve `provider` until Ctrl-C.
pub async fn start_web_server<P>(config: WebConfig, provider: Arc<P>) -> Result<()>
where
    P: MetricsProvider + 'static,
{
    let app = create_app(&config, provider);

    let addr = config
        .bind_address()
        .parse::<SocketAddr>()
        .map_err(|e| ExporterError::config_error(format!("Invalid bind address: {}", e)))?;

    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        ExporterError::web_server_error(format!("Failed to bind to address: {}", e))
    })?;

    info!("Serving metrics on http://{}/metrics", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ExporterError::web_server_error(format!("Server error: {}", e)))?;

    info!("Web server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
