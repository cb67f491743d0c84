use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use crate::rows::millis;
use crate::{Database, DbError, Result};

impl Database {
    /// Persist the user-level online flag. Creates the profile row on first use.
    pub fn update_online_flag(&self, user_id: Uuid, online: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_profiles (user_id, is_online, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                     is_online = excluded.is_online,
                     updated_at = excluded.updated_at",
                params![user_id.to_string(), online, millis(Utc::now())],
            )?;
            Ok(())
        })
    }

    pub fn is_online(&self, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let online: Option<bool> = conn
                .query_row(
                    "SELECT is_online FROM user_profiles WHERE user_id = ?1",
                    [user_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(online.unwrap_or(false))
        })
    }

    /// Register or move a push token. A device belongs to one user at a time.
    /// The row is replaced rather than updated so that `rowid` keeps tracking
    /// registration order when two writes share a millisecond.
    pub fn register_device(&self, user_id: Uuid, device_id: &str, token: &str) -> Result<()> {
        if device_id.trim().is_empty() || token.trim().is_empty() {
            return Err(DbError::Validation(
                "device id and token are required".into(),
            ));
        }

        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO device_tokens (device_id, user_id, token, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![device_id, user_id.to_string(), token, millis(Utc::now())],
            )?;
            Ok(())
        })
    }

    /// Most recently registered push token for a user, if any.
    pub fn device_token_for(&self, user_id: Uuid) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let token = conn
                .query_row(
                    "SELECT token FROM device_tokens
                     WHERE user_id = ?1
                     ORDER BY updated_at DESC, rowid DESC
                     LIMIT 1",
                    [user_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(token)
        })
    }
}
