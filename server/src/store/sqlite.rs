//! SQLite-backed message store and user directory.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    HistoryPage, HistoryQuery, MessageStore, RecentConversation, StoreError, UserDirectory,
};
use crate::db::models::{MessageRow, MESSAGE_COLUMNS};
use crate::db::DbPool;
use crate::engine::{
    ChannelId, MessageId, MessageTarget, OutboundMessage, Payload, PersistedMessage, UserId,
};

#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::Lock)?;
            f(&conn)
        })
        .await?
    }

    /// Insert or rename a user. Accounts are owned by the CRUD layer; this
    /// is its write path into the shared database.
    pub async fn upsert_user(&self, user_id: &UserId, username: &str) -> Result<(), StoreError> {
        let user_id = user_id.clone();
        let username = username.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET username = excluded.username",
                params![user_id.as_str(), username, timestamp(Utc::now())],
            )?;
            Ok(())
        })
        .await
    }

    /// Run a message query, keeping the row order of `sql`.
    fn query_messages(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<PersistedMessage>, StoreError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, MessageRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(row_to_message).collect()
    }
}

/// Keyset condition on `(persisted_at, id)`; `before` is the first of the two
/// bound parameters that follow, `before_id` the second.
macro_rules! before_cursor {
    ($ts:literal, $id:literal) => {
        concat!(
            "(", $ts, " IS NULL OR persisted_at < ", $ts,
            " OR (persisted_at = ", $ts, " AND ", $id, " IS NOT NULL AND id < ", $id, "))"
        )
    };
}

/// Fixed-width RFC 3339 so lexical order matches time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {value:?}: {e}")))
}

fn row_to_message(row: MessageRow) -> Result<PersistedMessage, StoreError> {
    let id = MessageId::parse(&row.id)
        .map_err(|e| StoreError::Corrupt(format!("bad message id {:?}: {e}", row.id)))?;

    let target = match (row.recipient_id, row.channel_id) {
        (Some(recipient_id), None) => MessageTarget::Direct {
            recipient_id: UserId::new(recipient_id),
        },
        (None, Some(channel_id)) => MessageTarget::Channel {
            channel_id: ChannelId::new(channel_id),
        },
        _ => {
            return Err(StoreError::Corrupt(format!(
                "message {id} must have exactly one of recipient or channel"
            )))
        }
    };

    let payload = match (row.message_type.as_str(), row.content, row.file_url) {
        ("text", Some(content), _) => Payload::Text { content },
        ("system", Some(content), _) => Payload::System { content },
        ("file", _, Some(url)) => Payload::File { url },
        (other, _, _) => {
            return Err(StoreError::Corrupt(format!(
                "message {id} has unusable payload of type {other:?}"
            )))
        }
    };

    Ok(PersistedMessage {
        id,
        message: OutboundMessage {
            sender_id: UserId::new(row.sender_id),
            target,
            payload,
            created_at: parse_timestamp(&row.created_at)?,
        },
        persisted_at: parse_timestamp(&row.persisted_at)?,
        read: row.read,
    })
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append_message(
        &self,
        message: &OutboundMessage,
    ) -> Result<PersistedMessage, StoreError> {
        let message = message.clone();
        self.blocking(move |conn| {
            let id = MessageId::new();
            let persisted_at = Utc::now();

            let (recipient_id, channel_id) = match &message.target {
                MessageTarget::Direct { recipient_id } => (Some(recipient_id.as_str()), None),
                MessageTarget::Channel { channel_id } => (None, Some(channel_id.as_str())),
            };
            let (message_type, content, file_url) = match &message.payload {
                Payload::Text { content } => ("text", Some(content.as_str()), None),
                Payload::System { content } => ("system", Some(content.as_str()), None),
                Payload::File { url } => ("file", None, Some(url.as_str())),
            };

            conn.execute(
                "INSERT INTO messages (id, sender_id, recipient_id, channel_id, message_type,
                                       content, file_url, created_at, persisted_at, read)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0)",
                params![
                    id.to_string(),
                    message.sender_id.as_str(),
                    recipient_id,
                    channel_id,
                    message_type,
                    content,
                    file_url,
                    timestamp(message.created_at),
                    timestamp(persisted_at),
                ],
            )?;

            Ok(PersistedMessage {
                id,
                message,
                persisted_at,
                read: false,
            })
        })
        .await
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<PersistedMessage>, StoreError> {
        self.blocking(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                    params![id.to_string()],
                    MessageRow::from_row,
                )
                .optional()?;
            row.map(row_to_message).transpose()
        })
        .await
    }

    async fn direct_history(
        &self,
        a: &UserId,
        b: &UserId,
        query: HistoryQuery,
    ) -> Result<HistoryPage, StoreError> {
        let (a, b) = (a.clone(), b.clone());
        let limit = query.effective_limit();
        let messages = self
            .blocking(move |conn| {
                Self::query_messages(
                    conn,
                    &format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages
                         WHERE ((sender_id = ?1 AND recipient_id = ?2)
                             OR (sender_id = ?2 AND recipient_id = ?1))
                           AND {}
                         ORDER BY persisted_at DESC, id DESC
                         LIMIT ?5",
                        before_cursor!("?3", "?4")
                    ),
                    params![
                        a.as_str(),
                        b.as_str(),
                        query.before.map(timestamp),
                        query.before_id.map(|id| id.to_string()),
                        limit + 1,
                    ],
                )
            })
            .await?;
        Ok(HistoryPage::from_newest_first(messages, limit))
    }

    async fn channel_history(
        &self,
        channel_id: &ChannelId,
        query: HistoryQuery,
    ) -> Result<HistoryPage, StoreError> {
        let channel_id = channel_id.clone();
        let limit = query.effective_limit();
        let messages = self
            .blocking(move |conn| {
                Self::query_messages(
                    conn,
                    &format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages
                         WHERE channel_id = ?1
                           AND {}
                         ORDER BY persisted_at DESC, id DESC
                         LIMIT ?4",
                        before_cursor!("?2", "?3")
                    ),
                    params![
                        channel_id.as_str(),
                        query.before.map(timestamp),
                        query.before_id.map(|id| id.to_string()),
                        limit + 1,
                    ],
                )
            })
            .await?;
        Ok(HistoryPage::from_newest_first(messages, limit))
    }

    async fn recent_conversations(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<RecentConversation>, StoreError> {
        let user_id = user_id.clone();
        self.blocking(move |conn| {
            let latest = Self::query_messages(
                conn,
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM (
                         SELECT *, ROW_NUMBER() OVER (
                             PARTITION BY CASE WHEN sender_id = ?1
                                               THEN recipient_id ELSE sender_id END
                             ORDER BY persisted_at DESC, id DESC
                         ) AS rn
                         FROM messages
                         WHERE recipient_id IS NOT NULL
                           AND (sender_id = ?1 OR recipient_id = ?1)
                     )
                     WHERE rn = 1
                     ORDER BY persisted_at DESC, id DESC
                     LIMIT ?2"
                ),
                params![user_id.as_str(), limit],
            )?;

            latest
                .into_iter()
                .map(|last_message| {
                    let peer_id = match &last_message.message.target {
                        MessageTarget::Direct { recipient_id }
                            if last_message.message.sender_id == user_id =>
                        {
                            recipient_id.clone()
                        }
                        MessageTarget::Direct { .. } => last_message.message.sender_id.clone(),
                        MessageTarget::Channel { .. } => {
                            return Err(StoreError::Corrupt(format!(
                                "channel message {} in direct conversation list",
                                last_message.id
                            )))
                        }
                    };
                    Ok(RecentConversation {
                        peer_id,
                        last_message,
                    })
                })
                .collect()
        })
        .await
    }

    async fn mark_read(&self, id: MessageId, reader: &UserId) -> Result<bool, StoreError> {
        let reader = reader.clone();
        self.blocking(move |conn| {
            let changed = conn.execute(
                "UPDATE messages SET read = 1 WHERE id = ?1 AND recipient_id = ?2 AND read = 0",
                params![id.to_string(), reader.as_str()],
            )?;
            Ok(changed > 0)
        })
        .await
    }
}

#[async_trait]
impl UserDirectory for SqliteStore {
    async fn is_known_user(&self, user_id: &UserId) -> Result<bool, StoreError> {
        let user_id = user_id.clone();
        self.blocking(move |conn| {
            let exists = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                params![user_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
        .await
    }
}
