pub mod migrations;
pub mod models;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Shared SQLite handle. rusqlite is synchronous, so callers lock it from
/// `tokio::task::spawn_blocking`.
pub type DbPool = Arc<Mutex<Connection>>;

const DB_FILE: &str = "huddle.db";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("failed to create data directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] rusqlite_migration::Error),
}

/// Open (or create) `data_dir/huddle.db` in WAL mode and migrate it.
pub fn init_db(data_dir: &str) -> Result<DbPool, DbError> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join(DB_FILE);
    let mut conn = Connection::open(&db_path)?;

    // WAL keeps history reads from blocking appends
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(Duration::from_secs(5))?;

    migrations::migrations().to_latest(&mut conn)?;

    tracing::info!("Database initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}

/// Migrated in-memory database, for tests and throwaway runs.
pub fn init_memory_db() -> Result<DbPool, DbError> {
    let mut conn = Connection::open_in_memory()?;
    migrations::migrations().to_latest(&mut conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}
