//! REST endpoints for single messages and paginated history.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use super::internal;
use crate::auth::middleware::AuthUser;
use crate::engine::{ChannelId, MessageId, MessageTarget, PersistedMessage, UserId};
use crate::state::AppState;
use crate::store::{clamp_limit, HistoryPage, HistoryQuery, RecentConversation};

#[derive(Debug, Default, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<u32>,
}

/// GET /api/messages/{id}
/// Visible to the sender, the direct recipient, or a current channel member.
/// Anything else is reported as not found.
pub async fn get_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<PersistedMessage>, StatusCode> {
    let id = MessageId::parse(&id).map_err(|_| StatusCode::BAD_REQUEST)?;

    let persisted = state
        .store
        .get_message(id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let message = &persisted.message;
    let visible = message.sender_id == user_id
        || match &message.target {
            MessageTarget::Direct { recipient_id } => *recipient_id == user_id,
            MessageTarget::Channel { channel_id } => {
                state.engine.memberships().is_member(channel_id, &user_id)
            }
        };
    if !visible {
        return Err(StatusCode::NOT_FOUND);
    }

    Ok(Json(persisted))
}

/// GET /api/dm/recent?limit=
/// The caller's direct-message partners, most recent conversation first.
pub async fn recent_conversations(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<RecentConversation>>, StatusCode> {
    let recent = state
        .store
        .recent_conversations(&caller, clamp_limit(query.limit))
        .await
        .map_err(internal)?;
    Ok(Json(recent))
}

/// GET /api/dm/{user_id}/messages?before=&before_id=&limit=
/// Direct messages between the caller and `user_id`, oldest first.
pub async fn direct_history(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(peer): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryPage>, StatusCode> {
    let peer = UserId::new(peer);
    let page = state
        .store
        .direct_history(&caller, &peer, query)
        .await
        .map_err(internal)?;

    tracing::debug!(
        user_id = %caller,
        peer = %peer,
        count = page.messages.len(),
        has_more = page.has_more,
        "Direct history read"
    );
    Ok(Json(page))
}

/// GET /api/channels/{channel_id}/messages?before=&before_id=&limit=
/// Members only.
pub async fn channel_history(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(channel_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryPage>, StatusCode> {
    let channel_id = ChannelId::new(channel_id);
    if !state.engine.memberships().is_member(&channel_id, &caller) {
        return Err(StatusCode::FORBIDDEN);
    }

    let page = state
        .store
        .channel_history(&channel_id, query)
        .await
        .map_err(internal)?;

    Ok(Json(page))
}
