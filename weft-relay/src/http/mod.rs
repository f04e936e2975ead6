//! HTTP endpoints for weft-relay.
//!
//! Provides health checks and metrics alongside the WebSocket listener.

pub mod health;
mod metrics;

use crate::server::RelayServer;
use axum::{routing::get, Extension, Router};
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<RelayServer>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(Extension(relay))
}

/// Serve the HTTP endpoints on the given address until the process exits.
pub async fn serve(relay: Arc<RelayServer>, bind_address: &str) -> crate::error::Result<()> {
    let app = build_router(relay);
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    tracing::info!("HTTP endpoints on {}", bind_address);
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::mailbox::Mailbox;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    async fn test_relay() -> Arc<RelayServer> {
        let mailbox = Mailbox::in_memory().await.unwrap();
        Arc::new(RelayServer::new(Config::default(), mailbox))
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let relay = test_relay().await;
        let app = build_router(relay);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_ok() {
        let relay = test_relay().await;
        let app = build_router(relay);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
