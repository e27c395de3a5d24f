use axum::http::StatusCode;
use thiserror::Error;

use super::types::{ChannelId, ConnectionId, UserId};
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("user {sender_id} is not a member of channel {channel_id}")]
    NotAMember {
        channel_id: ChannelId,
        sender_id: UserId,
    },
    #[error("unknown recipient {0}")]
    UnknownRecipient(UserId),
    #[error("message payload is empty")]
    EmptyPayload,
    #[error("failed to persist message: {0}")]
    Persistence(#[source] StoreError),
    #[error("failed to look up recipient: {0}")]
    Directory(#[source] StoreError),
}

impl DispatchError {
    /// Stable code reported to clients in `error` frames.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAMember { .. } => "not_a_member",
            Self::UnknownRecipient(_) => "unknown_recipient",
            Self::EmptyPayload => "empty_payload",
            Self::Persistence(_) => "persistence_failure",
            Self::Directory(_) => "directory_unavailable",
        }
    }

    /// HTTP-equivalent status for the failure.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotAMember { .. } => StatusCode::FORBIDDEN,
            Self::UnknownRecipient(_) => StatusCode::NOT_FOUND,
            Self::EmptyPayload => StatusCode::BAD_REQUEST,
            Self::Persistence(_) | Self::Directory(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("connection {0} is not attached to the transport")]
    UnknownConnection(ConnectionId),
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}
