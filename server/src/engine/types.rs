//! Identifiers and value objects shared by every engine component.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of an authenticated user. Owned by the identity layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Opaque identifier of a community channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier of one live transport session (UUIDv7, unique per process).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Server-assigned identifier of a persisted message (UUIDv7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One live session. The owning user never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// Where a message goes. Kind and target travel together so a direct
/// message can never name a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageTarget {
    Direct { recipient_id: UserId },
    Channel { channel_id: ChannelId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Direct,
    Channel,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Channel => "channel",
        }
    }
}

/// Message body: plain text, an uploaded file reference, or a system notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Text { content: String },
    File { url: String },
    System { content: String },
}

impl Payload {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text { content } | Self::System { content } => content.trim().is_empty(),
            Self::File { url } => url.trim().is_empty(),
        }
    }
}

/// Immutable snapshot of a message a user asked to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub sender_id: UserId,
    pub target: MessageTarget,
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn direct(sender_id: UserId, recipient_id: UserId, payload: Payload) -> Self {
        Self {
            sender_id,
            target: MessageTarget::Direct { recipient_id },
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn channel(sender_id: UserId, channel_id: ChannelId, payload: Payload) -> Self {
        Self {
            sender_id,
            target: MessageTarget::Channel { channel_id },
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self.target {
            MessageTarget::Direct { .. } => MessageKind::Direct,
            MessageTarget::Channel { .. } => MessageKind::Channel,
        }
    }
}

/// A message after the store accepted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedMessage {
    pub id: MessageId,
    pub message: OutboundMessage,
    pub persisted_at: DateTime<Utc>,
    pub read: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Everything the server pushes to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Message {
        message: PersistedMessage,
    },
    Presence {
        user_id: UserId,
        status: PresenceStatus,
    },
    ChannelJoined {
        channel_id: ChannelId,
        user_id: UserId,
    },
    ChannelLeft {
        channel_id: ChannelId,
        user_id: UserId,
    },
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        message_id: MessageId,
        delivered: usize,
    },
    Error {
        code: String,
        message: String,
    },
}
