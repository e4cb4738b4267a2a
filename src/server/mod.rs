//! HTTP surface over the prompt pipeline.

pub mod api;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

pub use api::{ApiError, AppState, SharedState, api_router};

use crate::config::Settings;
use crate::devserver::DevServers;
use crate::orchestrator::PromptProcessor;
use crate::source::{BpeTokenCounter, FileCollector};

/// Build the application router. `dev` enables permissive CORS for a UI
/// served from another origin.
pub fn build_router(state: SharedState, dev: bool) -> Router {
    let app = api_router().with_state(state);
    if dev {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Wire the production collaborators from `settings`.
pub fn build_state(settings: &Settings) -> Result<SharedState> {
    let dev_servers = Arc::new(DevServers::from_settings(&settings.dev_server));
    let processor = PromptProcessor::from_settings(settings, dev_servers.clone())
        .context("Failed to configure the prompt pipeline")?;
    let collector = FileCollector::new(
        Arc::new(BpeTokenCounter::new()?),
        settings.pipeline.read_concurrency,
    );
    Ok(Arc::new(AppState {
        processor,
        collector,
        dev_servers,
        recent_commits: settings.pipeline.recent_commits,
    }))
}

/// Serve until Ctrl-C, then stop every dev server that is still running.
pub async fn start_server(settings: &Settings) -> Result<()> {
    let state = build_state(settings)?;
    let dev_servers = state.dev_servers.clone();
    let app = build_router(state, settings.server.dev);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!("promptsmith running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    dev_servers.stop_all().await;
    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GenerationError;
    use crate::generate::CodeGenerator;
    use crate::source::TokenCounter;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    struct NeverCalled;

    #[async_trait]
    impl CodeGenerator for NeverCalled {
        async fn generate_code(&self, _prompt: &str) -> Result<String, GenerationError> {
            Err(GenerationError::EmptyResponse)
        }
    }

    struct ZeroCounter;

    impl TokenCounter for ZeroCounter {
        fn count(&self, _text: &str) -> usize {
            0
        }
    }

    fn test_state() -> SharedState {
        let dev_servers = Arc::new(DevServers::new("sleep 30"));
        Arc::new(AppState {
            processor: PromptProcessor::new(Arc::new(NeverCalled), dev_servers.clone()),
            collector: FileCollector::new(Arc::new(ZeroCounter), 2),
            dev_servers,
            recent_commits: 10,
        })
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let app = build_router(test_state(), false);
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_dev_mode_adds_cors_headers() {
        let app = build_router(test_state(), true);
        let req = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let app = build_router(test_state(), false);
        let req = Request::builder()
            .uri("/api/nope")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_build_state_requires_api_key() {
        let settings = Settings::default();
        assert!(build_state(&settings).is_err());
    }
}
