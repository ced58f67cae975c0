//! HTTP server setup with Axum

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::websocket::handler::{create_ticket, ws_handler};
use super::websocket::state::AppState;

pub const TICKET_ROUTE: &str = "/api/v1/ws/ticketing/createTicket";
pub const CONNECT_ROUTE: &str = "/api/v1/ws/connect";

/// Create the Axum router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route(TICKET_ROUTE, get(create_ticket))
        .route(CONNECT_ROUTE, get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::JwtAuth;
    use crate::config::Config;
    use crate::store::{MemoryChangeFeed, MemoryStore};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::util::ServiceExt;

    const SECRET: &str = "test-secret-key-that-is-at-least-32-characters-long";

    fn app() -> (Router, Arc<AppState>, Arc<JwtAuth>) {
        let config = Config {
            jwt_secret: SECRET.to_string(),
            ..Config::default()
        };
        let auth = Arc::new(JwtAuth::new(SECRET).unwrap());
        let store = Arc::new(MemoryStore::new(MemoryChangeFeed::new(16)));
        let state = Arc::new(AppState::new(&config, store, auth.clone()));
        (create_router(Arc::clone(&state)), state, auth)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _, _) = app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_create_ticket_requires_bearer() {
        let (app, state, _) = app();
        let response = app
            .oneshot(Request::builder().uri(TICKET_ROUTE).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(body_json(response).await["message"].is_string());
        assert!(state.tickets.is_empty());
    }

    #[tokio::test]
    async fn test_create_ticket_rejects_bad_token() {
        let (app, _, _) = app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri(TICKET_ROUTE)
                    .header(header::AUTHORIZATION, "Bearer not-a-jwt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_ticket_for_authenticated_user() {
        let (app, state, auth) = app();
        let token = auth.issue("alice").unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .uri(TICKET_ROUTE)
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let ticket = body_json(response).await["ticket"]
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(state.tickets.redeem(&ticket).as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_connect_without_ticket_is_unauthorized() {
        let (app, _, _) = app();
        let response = app
            .oneshot(Request::builder().uri(CONNECT_ROUTE).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(response).await["message"],
            "unauthorized or request timeout"
        );
    }

    #[tokio::test]
    async fn test_connect_with_ticket_but_no_upgrade_is_rejected() {
        let (app, state, _) = app();
        let ticket = state.tickets.issue("alice");
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("{CONNECT_ROUTE}?ticket={ticket}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.status().is_client_error());
        // The ticket was spent by the attempt
        assert!(state.tickets.is_empty());
    }
}
