//! Authenticated-user extractor

use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    Json,
};
use serde_json::{json, Value};
use tracing::debug;

use crate::api::websocket::state::AppState;

use super::jwt::AuthError;

/// User id of a request that carried a valid bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

fn unauthorized(err: &AuthError) -> (StatusCode, Json<Value>) {
    (StatusCode::UNAUTHORIZED, Json(json!({ "message": err.to_string() })))
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = (StatusCode, Json<Value>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| unauthorized(&AuthError::MissingToken))?;

        match state.identity.verify(header).await {
            Ok(user_id) => Ok(AuthUser(user_id)),
            Err(e) => {
                debug!(error = %e, "bearer token rejected");
                Err(unauthorized(&e))
            }
        }
    }
}
