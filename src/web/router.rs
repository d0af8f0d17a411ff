//! Web application router and middleware setup.

use crate::metrics::MetricsProvider;
use crate::web::config::WebConfig;
use crate::web::handlers;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

/// Create the axum application serving `provider`.
pub fn create_app<P>(config: &WebConfig, provider: Arc<P>) -> Router
where
    P: MetricsProvider + 'static,
{
    let mut app = Router::new()
        .route("/", get(handlers::index))
        .route("/metrics", get(handlers::metrics::<P>))
        .route("/api/metrics", get(handlers::records::<P>))
        .route("/api/health", get(handlers::health_check))
        .with_state(provider);

    if config.enable_compression {
        app = app.layer(CompressionLayer::new());
    }

    app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}
