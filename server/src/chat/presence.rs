use axum::{extract::State, Json};
use serde::Serialize;

use crate::auth::middleware::AuthUser;
use crate::engine::UserId;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    pub online: Vec<UserId>,
}

/// GET /api/presence
/// Users with at least one live connection, sorted for stable output.
pub async fn get_presence(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
) -> Json<PresenceResponse> {
    let mut online = state.engine.registry().online_users();
    online.sort();
    Json(PresenceResponse { online })
}
