//! Route table for the LocalSend v2 wire API (spec §4.F). Exact
//! routes only — the protocol defines no `{param}` path segments, so
//! axum's literal route matching already gives "exact match first".

use super::handlers;
use super::middleware::security_gate;
use super::state::AppState;
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

const BASE: &str = "/api/localsend/v2";

pub fn build(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let data_routes = Router::new()
        .route(&format!("{BASE}/register"), post(handlers::register))
        .route(&format!("{BASE}/prepare-upload"), post(handlers::prepare_upload))
        .route(&format!("{BASE}/upload"), post(handlers::upload))
        .route(&format!("{BASE}/cancel"), post(handlers::cancel))
        .route(
            &format!("{BASE}/prepare-download"),
            get(handlers::not_implemented).post(handlers::not_implemented),
        )
        .route(
            &format!("{BASE}/download"),
            get(handlers::not_implemented).post(handlers::not_implemented),
        )
        .route(&format!("{BASE}/info"), get(handlers::info))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            security_gate,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(data_routes)
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ChunkEngine, RetryPolicy};
    use crate::config::Config;
    use crate::discovery::PeerRegistry;
    use crate::encryption::EncryptionRegistry;
    use crate::security::{ReplayDetector, SecurityAnalyzer};
    use crate::session::SessionStore;
    use crate::verify::VerificationManager;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState::new(
            Arc::new(Config::default()),
            SessionStore::new(),
            PeerRegistry::new(),
            SecurityAnalyzer::new(1000),
            ReplayDetector::new(),
            "test-fingerprint-0000000000000000000".to_string(),
            std::env::temp_dir(),
            ChunkEngine::new(4, RetryPolicy::default()),
            VerificationManager::new(),
            EncryptionRegistry::new(),
        )
    }

    #[tokio::test]
    async fn health_route_does_not_require_connect_info() {
        let app = build(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = build(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/localsend/v2/nonexistent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    }
}
