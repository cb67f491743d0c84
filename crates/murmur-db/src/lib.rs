pub mod conversations;
pub mod messages;
pub mod migrations;
pub mod users;

mod rows;

use std::path::Path;
use std::sync::Mutex;

use murmur_types::events::ErrorCode;
use rusqlite::Connection;
use thiserror::Error;
use tracing::info;

pub use messages::NewMessage;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    LockPoisoned,
}

impl DbError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(..) => ErrorCode::NotFound,
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::Validation(_) => ErrorCode::Validation,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::Sqlite(_) | Self::LockPoisoned => ErrorCode::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Single-writer SQLite store. Every repository call takes the connection
/// lock for its whole read-check-write sequence, which is what makes
/// find-or-create and the deletion-mark upsert atomic.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|_| DbError::LockPoisoned)?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|_| DbError::LockPoisoned)?;
        f(&mut conn)
    }
}
