use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::AuthError;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
/// Browsers cannot set headers on upgrade, so the JWT rides in `?token=`.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: String,
}

/// Application close codes sent when authentication fails.
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /ws?token=JWT
/// On auth failure, upgrades then immediately closes with a close code the
/// client can act on. On success, runs the connection actor.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match state.identity.authenticated_user_id(&params.token) {
        Ok(user_id) => {
            tracing::info!(user_id = %user_id, "WebSocket connection authenticated");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, user_id))
        }
        Err(err) => {
            let (close_code, reason) = match err {
                AuthError::Expired => (CLOSE_TOKEN_EXPIRED, "Token expired"),
                AuthError::Invalid(_) => (CLOSE_TOKEN_INVALID, "Token invalid"),
            };

            tracing::warn!(
                close_code = close_code,
                reason = reason,
                "WebSocket auth failed"
            );

            ws.on_upgrade(move |mut socket| async move {
                let close_frame = CloseFrame {
                    code: close_code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}
