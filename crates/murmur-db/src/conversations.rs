use chrono::{DateTime, Utc};
use murmur_types::models::{Conversation, DeletionMark, RequestStatus};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;
use uuid::Uuid;

use crate::rows::{millis, opt_uuid_at, parsed_at, time_at, uuid_at};
use crate::{Database, DbError, Result};

const CONVERSATION_COLUMNS: &str = "id, user_low, user_high, request_status, initiator_id, \
     responder_id, is_suggestion_active, created_at";

/// Sort a participant pair so that both directions of first contact resolve
/// to the same row.
pub fn normalize_pair(a: Uuid, b: Uuid) -> Result<(Uuid, Uuid)> {
    if a == b {
        return Err(DbError::Validation(
            "a conversation needs two distinct participants".into(),
        ));
    }
    Ok(if a < b { (a, b) } else { (b, a) })
}

impl Database {
    /// Find the conversation for an unordered pair, creating it on first contact.
    /// Returns the conversation and whether this call created it.
    pub fn find_or_create_conversation(&self, a: Uuid, b: Uuid) -> Result<(Conversation, bool)> {
        let (low, high) = normalize_pair(a, b)?;
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO conversations (id, user_low, user_high, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    Uuid::new_v4().to_string(),
                    low.to_string(),
                    high.to_string(),
                    millis(Utc::now())
                ],
            )?;

            let id: String = conn
                .query_row(
                    "SELECT id FROM conversations WHERE user_low = ?1 AND user_high = ?2",
                    params![low.to_string(), high.to_string()],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| {
                    DbError::Conflict(format!("conversation for {} / {} vanished", low, high))
                })?;

            let conversation = query_conversation(conn, &id)?
                .ok_or_else(|| DbError::NotFound("conversation", id.clone()))?;

            if inserted == 1 {
                debug!("Created conversation {} for {} / {}", conversation.id, low, high);
            }
            Ok((conversation, inserted == 1))
        })
    }

    pub fn get_conversation(&self, id: Uuid) -> Result<Conversation> {
        self.with_conn(|conn| {
            query_conversation(conn, &id.to_string())?
                .ok_or_else(|| DbError::NotFound("conversation", id.to_string()))
        })
    }

    pub fn conversations_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM conversations
                 WHERE user_low = ?1 OR user_high = ?1
                 ORDER BY created_at",
                CONVERSATION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut conversations = stmt
                .query_map([user_id.to_string()], conversation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            for conversation in &mut conversations {
                conversation.deletion_marks = load_marks(conn, &conversation.id.to_string())?;
            }
            Ok(conversations)
        })
    }

    /// Record (or refresh) `user_id`'s soft deletion of a conversation.
    pub fn mark_soft_deleted(&self, conversation_id: Uuid, user_id: Uuid) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        self.mark_soft_deleted_at(conversation_id, user_id, now)?;
        Ok(now)
    }

    pub fn mark_soft_deleted_at(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let conversation = query_conversation(conn, &conversation_id.to_string())?
                .ok_or_else(|| DbError::NotFound("conversation", conversation_id.to_string()))?;
            if !conversation.has_participant(user_id) {
                return Err(DbError::Unauthorized(format!(
                    "user {} is not a participant of conversation {}",
                    user_id, conversation_id
                )));
            }

            // Single upsert statement: one mark per (conversation, user).
            conn.execute(
                "INSERT INTO conversation_deletions (conversation_id, user_id, deleted_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(conversation_id, user_id) DO UPDATE SET deleted_at = excluded.deleted_at",
                params![conversation_id.to_string(), user_id.to_string(), millis(at)],
            )?;
            Ok(())
        })
    }

    /// Accept or reject a pending conversation request. Only the recorded
    /// responder may do this, and only once.
    pub fn set_request_status(
        &self,
        conversation_id: Uuid,
        responding_user: Uuid,
        status: RequestStatus,
    ) -> Result<Conversation> {
        if status == RequestStatus::Pending {
            return Err(DbError::Validation(
                "a request can only be accepted or rejected".into(),
            ));
        }

        self.with_conn(|conn| {
            let id = conversation_id.to_string();
            let conversation = query_conversation(conn, &id)?
                .ok_or_else(|| DbError::NotFound("conversation", id.clone()))?;

            if conversation.responder != Some(responding_user) {
                return Err(DbError::Unauthorized(format!(
                    "user {} is not the responder of conversation {}",
                    responding_user, conversation_id
                )));
            }
            if conversation.request_status != RequestStatus::Pending {
                return Err(DbError::Conflict(format!(
                    "conversation {} request is already {}",
                    conversation_id, conversation.request_status
                )));
            }

            let changed = conn.execute(
                "UPDATE conversations SET request_status = ?2
                 WHERE id = ?1 AND request_status = 'pending'",
                params![id, status.as_str()],
            )?;
            if changed == 0 {
                return Err(DbError::Conflict(format!(
                    "conversation {} request changed concurrently",
                    conversation_id
                )));
            }

            query_conversation(conn, &id)?.ok_or_else(|| DbError::NotFound("conversation", id))
        })
    }

    /// Turn the suggestion flag off. Returns true if this call flipped it.
    pub fn set_suggestion_inactive(&self, conversation_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let id = conversation_id.to_string();
            let changed = conn.execute(
                "UPDATE conversations SET is_suggestion_active = 0
                 WHERE id = ?1 AND is_suggestion_active = 1",
                [&id],
            )?;
            if changed == 0 && !conversation_exists(conn, &id)? {
                return Err(DbError::NotFound("conversation", id));
            }
            Ok(changed == 1)
        })
    }

    /// First message wins: sets initiator/responder only while both are unset.
    /// Returns true if this call wrote them.
    pub fn backfill_initiator_responder(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        receiver_id: Uuid,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let id = conversation_id.to_string();
            let conversation = query_conversation(conn, &id)?
                .ok_or_else(|| DbError::NotFound("conversation", id.clone()))?;
            if conversation.other_participant(sender_id) != Some(receiver_id) {
                return Err(DbError::Validation(format!(
                    "{} and {} are not the participants of conversation {}",
                    sender_id, receiver_id, conversation_id
                )));
            }

            let changed = conn.execute(
                "UPDATE conversations SET initiator_id = ?2, responder_id = ?3
                 WHERE id = ?1 AND initiator_id IS NULL AND responder_id IS NULL",
                params![id, sender_id.to_string(), receiver_id.to_string()],
            )?;
            Ok(changed == 1)
        })
    }
}

fn conversation_exists(conn: &Connection, id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM conversations WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn query_conversation(conn: &Connection, id: &str) -> Result<Option<Conversation>> {
    let sql = format!("SELECT {} FROM conversations WHERE id = ?1", CONVERSATION_COLUMNS);
    let conversation = conn
        .query_row(&sql, [id], conversation_from_row)
        .optional()?;

    match conversation {
        Some(mut conversation) => {
            conversation.deletion_marks = load_marks(conn, id)?;
            Ok(Some(conversation))
        }
        None => Ok(None),
    }
}

fn load_marks(conn: &Connection, conversation_id: &str) -> Result<Vec<DeletionMark>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, deleted_at FROM conversation_deletions WHERE conversation_id = ?1",
    )?;
    let marks = stmt
        .query_map([conversation_id], |row| {
            Ok(DeletionMark {
                user_id: uuid_at(row, 0)?,
                deleted_at: time_at(row, 1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(marks)
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: uuid_at(row, 0)?,
        participants: [uuid_at(row, 1)?, uuid_at(row, 2)?],
        request_status: parsed_at(row, 3)?,
        initiator: opt_uuid_at(row, 4)?,
        responder: opt_uuid_at(row, 5)?,
        is_suggestion_active: row.get(6)?,
        deletion_marks: Vec::new(),
        created_at: time_at(row, 7)?,
    })
}
