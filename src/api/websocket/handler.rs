//! WebSocket upgrade and ticket endpoints

use std::sync::Arc;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::api::auth::AuthUser;

use super::session::{read_loop, write_loop, Session};
use super::state::AppState;

const UNAUTHORIZED_MESSAGE: &str = "unauthorized or request timeout";

/// Query parameters for the upgrade request
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub ticket: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TicketResponse {
    pub ticket: String,
}

/// Issue a one-time upgrade ticket to an authenticated caller
pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Json<TicketResponse> {
    let ticket = state.tickets.issue(&user_id);
    Json(TicketResponse { ticket })
}

/// WebSocket upgrade handler
///
/// The ticket is redeemed before anything else; without a valid one the
/// client gets a 401 and no socket.
pub async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let user_id = match params.ticket.as_deref().and_then(|t| state.tickets.redeem(t)) {
        Some(user_id) => user_id,
        None => {
            warn!("upgrade refused: missing, used or expired ticket");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "message": UNAUTHORIZED_MESSAGE })),
            )
                .into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.max_message_size(state.session.max_frame_bytes)
        .max_frame_size(state.session.max_frame_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

/// Register the session and start both loops
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let settings = state.session;
    let (sink, stream) = socket.split();
    let (session, outbound) = Session::new(user_id, settings.outbound_queue);

    info!(session_id = session.id(), user_id = %session.user_id(), "client connected");
    state.registry.add(Arc::clone(&session));

    tokio::spawn(write_loop(
        sink,
        outbound,
        Arc::clone(&session),
        Arc::clone(&state.registry),
        settings.ping_interval,
    ));

    read_loop(
        stream,
        Arc::clone(&session),
        Arc::clone(&state.dispatcher),
        Arc::clone(&state.registry),
        settings.pong_wait,
    )
    .await;

    info!(session_id = session.id(), user_id = %session.user_id(), "client disconnected");
}
