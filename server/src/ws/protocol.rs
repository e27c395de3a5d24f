//! Client frames and their dispatch onto the engine.
//!
//! Frames are JSON text messages tagged by `type`. Replies that concern only
//! the calling connection (acks, errors) go straight back through the
//! transport; everything else fans out through the engine.

use serde::Deserialize;

use crate::engine::{
    ChannelId, ConnectionId, MessageId, OutboundMessage, Payload, ServerEvent, UserId,
};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    JoinChannel {
        channel_id: ChannelId,
    },
    LeaveChannel {
        channel_id: ChannelId,
    },
    SendDirect {
        #[serde(default)]
        request_id: Option<String>,
        recipient_id: UserId,
        payload: Payload,
    },
    SendChannel {
        #[serde(default)]
        request_id: Option<String>,
        channel_id: ChannelId,
        payload: Payload,
    },
    MarkRead {
        message_id: MessageId,
    },
}

/// Handle one incoming text frame from `user_id` on `connection_id`.
pub async fn handle_text_frame(
    text: &str,
    state: &AppState,
    user_id: &UserId,
    connection_id: ConnectionId,
) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                error = %e,
                "Failed to decode client frame"
            );
            send_error(state, connection_id, "bad_request", "Invalid frame");
            return;
        }
    };

    match frame {
        ClientFrame::JoinChannel { channel_id } => {
            state.engine.on_join_channel(&channel_id, user_id).await;
        }
        ClientFrame::LeaveChannel { channel_id } => {
            state.engine.on_leave_channel(&channel_id, user_id).await;
        }
        ClientFrame::SendDirect {
            request_id,
            recipient_id,
            payload,
        } => {
            let message = OutboundMessage::direct(user_id.clone(), recipient_id, payload);
            send_message(state, connection_id, request_id, message).await;
        }
        ClientFrame::SendChannel {
            request_id,
            channel_id,
            payload,
        } => {
            let message = OutboundMessage::channel(user_id.clone(), channel_id, payload);
            send_message(state, connection_id, request_id, message).await;
        }
        ClientFrame::MarkRead { message_id } => {
            if let Err(e) = state.store.mark_read(message_id, user_id).await {
                tracing::warn!(
                    user_id = %user_id,
                    message_id = %message_id,
                    error = %e,
                    "Failed to mark message read"
                );
                send_error(state, connection_id, "persistence_failure", "Could not mark read");
            }
        }
    }
}

async fn send_message(
    state: &AppState,
    connection_id: ConnectionId,
    request_id: Option<String>,
    message: OutboundMessage,
) {
    match state.engine.on_send_message(message).await {
        Ok(result) => {
            reply(
                state,
                connection_id,
                &ServerEvent::Ack {
                    request_id,
                    message_id: result.persisted_id,
                    delivered: result.delivered_count,
                },
            );
        }
        Err(e) => {
            tracing::debug!(connection_id = %connection_id, error = %e, "Send rejected");
            send_error(state, connection_id, e.code(), &e.to_string());
        }
    }
}

fn send_error(state: &AppState, connection_id: ConnectionId, code: &str, message: &str) {
    reply(
        state,
        connection_id,
        &ServerEvent::Error {
            code: code.to_string(),
            message: message.to_string(),
        },
    );
}

fn reply(state: &AppState, connection_id: ConnectionId, event: &ServerEvent) {
    if let Err(e) = state.transport.send_event(connection_id, event) {
        tracing::debug!(connection_id = %connection_id, error = %e, "Reply dropped");
    }
}
