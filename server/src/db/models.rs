/// Database row types.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.
use rusqlite::Row;

/// Column list matching `MessageRow::from_row`.
pub const MESSAGE_COLUMNS: &str = "id, sender_id, recipient_id, channel_id, message_type, \
     content, file_url, created_at, persisted_at, read";

/// Message record in the messages table.
/// Exactly one of `recipient_id` / `channel_id` is set.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: Option<String>,
    pub channel_id: Option<String>,
    pub message_type: String,
    pub content: Option<String>,
    pub file_url: Option<String>,
    pub created_at: String,
    pub persisted_at: String,
    pub read: bool,
}

impl MessageRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            sender_id: row.get(1)?,
            recipient_id: row.get(2)?,
            channel_id: row.get(3)?,
            message_type: row.get(4)?,
            content: row.get(5)?,
            file_url: row.get(6)?,
            created_at: row.get(7)?,
            persisted_at: row.get(8)?,
            read: row.get(9)?,
        })
    }
}
