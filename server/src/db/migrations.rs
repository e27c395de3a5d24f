use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Tracked through the SQLite user_version pragma, so no migration table is needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: Users known to the chat engine
-- Rows are written by the account layer; the engine only reads them.

CREATE TABLE users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX idx_users_username ON users(username);
",
        ),
        M::up(
            "-- Migration 2: Direct and channel messages

CREATE TABLE messages (
    id TEXT PRIMARY KEY,
    sender_id TEXT NOT NULL,
    recipient_id TEXT,
    channel_id TEXT,
    message_type TEXT NOT NULL CHECK (message_type IN ('text', 'file', 'system')),
    content TEXT,
    file_url TEXT,
    created_at TEXT NOT NULL,
    persisted_at TEXT NOT NULL,
    read INTEGER NOT NULL DEFAULT 0,
    CHECK ((recipient_id IS NULL) <> (channel_id IS NULL)),
    CHECK (message_type <> 'file' OR file_url IS NOT NULL),
    CHECK (message_type = 'file' OR content IS NOT NULL)
);

CREATE INDEX idx_messages_direct ON messages(sender_id, recipient_id, persisted_at);
CREATE INDEX idx_messages_channel ON messages(channel_id, persisted_at);
CREATE INDEX idx_messages_unread ON messages(recipient_id, read);
",
        ),
    ])
}
