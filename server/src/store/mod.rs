//! Persistence collaborator seen from the engine.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::{ChannelId, MessageId, OutboundMessage, PersistedMessage, UserId};

pub use sqlite::SqliteStore;

/// Default page size for message history.
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
/// Maximum page size for message history.
pub const MAX_HISTORY_LIMIT: u32 = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    Lock,
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("corrupt message record: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Pagination for history reads: the newest `limit` messages older than the
/// cursor, returned oldest first.
///
/// The cursor is the `(persisted_at, id)` of the oldest message already seen.
/// `before_id` breaks ties between messages persisted in the same instant;
/// without it every message at exactly `before` is excluded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct HistoryQuery {
    pub before: Option<DateTime<Utc>>,
    pub before_id: Option<MessageId>,
    pub limit: Option<u32>,
}

impl HistoryQuery {
    pub fn effective_limit(&self) -> u32 {
        clamp_limit(self.limit)
    }
}

pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT)
}

/// One page of history, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryPage {
    pub messages: Vec<PersistedMessage>,
    /// Older messages exist beyond this page.
    pub has_more: bool,
}

impl HistoryPage {
    /// Build a page from up to `limit + 1` messages selected newest first.
    /// The extra row only signals that another page exists.
    pub fn from_newest_first(mut messages: Vec<PersistedMessage>, limit: u32) -> Self {
        let limit = limit as usize;
        let has_more = messages.len() > limit;
        messages.truncate(limit);
        messages.reverse();
        Self { messages, has_more }
    }
}

/// A direct-message partner and the latest message exchanged with them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentConversation {
    pub peer_id: UserId,
    pub last_message: PersistedMessage,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Durably append a message and assign its id.
    async fn append_message(&self, message: &OutboundMessage)
        -> Result<PersistedMessage, StoreError>;

    async fn get_message(&self, id: MessageId) -> Result<Option<PersistedMessage>, StoreError>;

    /// Direct messages exchanged between `a` and `b`, either direction.
    async fn direct_history(
        &self,
        a: &UserId,
        b: &UserId,
        query: HistoryQuery,
    ) -> Result<HistoryPage, StoreError>;

    async fn channel_history(
        &self,
        channel_id: &ChannelId,
        query: HistoryQuery,
    ) -> Result<HistoryPage, StoreError>;

    /// Everyone `user_id` has exchanged direct messages with, most recent
    /// conversation first, each with its latest message.
    async fn recent_conversations(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<RecentConversation>, StoreError>;

    /// Flag a direct message as read. Only its recipient may do so;
    /// returns `false` if nothing changed.
    async fn mark_read(&self, id: MessageId, reader: &UserId) -> Result<bool, StoreError>;
}

/// Known-user lookup owned by the identity/CRUD layer.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn is_known_user(&self, user_id: &UserId) -> Result<bool, StoreError>;
}
