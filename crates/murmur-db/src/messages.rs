use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use murmur_types::models::{DeliveryState, Message, Reaction, ReplySnapshot};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use tracing::debug;
use uuid::Uuid;

use crate::conversations::query_conversation;
use crate::rows::{millis, opt_time_at, opt_uuid_at, parsed_at, time_at, uuid_at};
use crate::{Database, DbError, Result};

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, receiver_id, body, message_type, \
     attachment_url, client_ref, reply_type, reply_body, reply_owner, delivery_state, \
     created_at, edited_at";

/// A message about to be persisted. `created_at` defaults to now.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub body: String,
    pub message_type: Option<String>,
    pub attachment_url: Option<String>,
    pub client_ref: Option<String>,
    pub reply_to: Option<ReplySnapshot>,
    pub delivery_state: DeliveryState,
    pub created_at: Option<DateTime<Utc>>,
}

impl Database {
    /// Persist a message and pre-seed one empty reaction slot per participant.
    pub fn append_message(&self, new: NewMessage) -> Result<Message> {
        self.with_conn_mut(|conn| {
            let conversation = query_conversation(conn, &new.conversation_id.to_string())?
                .ok_or_else(|| DbError::NotFound("conversation", new.conversation_id.to_string()))?;
            if conversation.other_participant(new.sender_id) != Some(new.receiver_id) {
                return Err(DbError::Validation(format!(
                    "{} -> {} does not match the participants of conversation {}",
                    new.sender_id, new.receiver_id, new.conversation_id
                )));
            }

            let id = Uuid::new_v4();
            let created_at = new.created_at.unwrap_or_else(Utc::now);
            let (reply_type, reply_body, reply_owner) = match &new.reply_to {
                Some(reply) => (
                    reply.message_type.clone(),
                    Some(reply.body.clone()),
                    reply.owner.map(|o| o.to_string()),
                ),
                None => (None, None, None),
            };

            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, body,
                     message_type, attachment_url, client_ref, reply_type, reply_body,
                     reply_owner, delivery_state, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    id.to_string(),
                    new.conversation_id.to_string(),
                    new.sender_id.to_string(),
                    new.receiver_id.to_string(),
                    new.body,
                    new.message_type,
                    new.attachment_url,
                    new.client_ref,
                    reply_type,
                    reply_body,
                    reply_owner,
                    new.delivery_state.as_str(),
                    millis(created_at),
                ],
            )?;
            for user in [new.sender_id, new.receiver_id] {
                tx.execute(
                    "INSERT INTO message_reactions (message_id, user_id) VALUES (?1, ?2)",
                    params![id.to_string(), user.to_string()],
                )?;
            }
            tx.commit()?;

            query_message(conn, &id.to_string())?
                .ok_or_else(|| DbError::NotFound("message", id.to_string()))
        })
    }

    pub fn get_message(&self, id: Uuid) -> Result<Message> {
        self.with_conn(|conn| {
            query_message(conn, &id.to_string())?
                .ok_or_else(|| DbError::NotFound("message", id.to_string()))
        })
    }

    /// Move every message addressed to `receiver_id` in a conversation whose
    /// state is in `from` to `to`. Returns true if any row changed.
    ///
    /// Rejected outright if any `from` state is not strictly before `to`.
    pub fn bulk_advance_state(
        &self,
        receiver_id: Uuid,
        conversation_id: Uuid,
        from: &[DeliveryState],
        to: DeliveryState,
    ) -> Result<bool> {
        if from.is_empty() {
            return Err(DbError::Validation("no source states given".into()));
        }
        if let Some(bad) = from.iter().find(|state| !state.can_advance_to(to)) {
            return Err(DbError::Validation(format!(
                "cannot move messages from {} to {}",
                bad, to
            )));
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (0..from.len()).map(|i| format!("?{}", i + 4)).collect();
            let sql = format!(
                "UPDATE messages SET delivery_state = ?1
                 WHERE receiver_id = ?2 AND conversation_id = ?3 AND delivery_state IN ({})",
                placeholders.join(", ")
            );
            let mut values = vec![
                to.as_str().to_string(),
                receiver_id.to_string(),
                conversation_id.to_string(),
            ];
            values.extend(from.iter().map(|s| s.as_str().to_string()));

            let changed = conn.execute(&sql, params_from_iter(values))?;
            debug!(
                "Advanced {} messages to {} for {} in {}",
                changed, to, receiver_id, conversation_id
            );
            Ok(changed > 0)
        })
    }

    /// Catch-up when a receiver becomes reachable: every `sent` message
    /// addressed to them becomes `delivered`. Returns the distinct
    /// (conversation, sender) pairs that were affected.
    pub fn mark_all_delivered(&self, receiver_id: Uuid) -> Result<Vec<(Uuid, Uuid)>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let affected = {
                let mut stmt = tx.prepare(
                    "SELECT DISTINCT conversation_id, sender_id FROM messages
                     WHERE receiver_id = ?1 AND delivery_state = 'sent'",
                )?;
                stmt.query_map([receiver_id.to_string()], |row| {
                    Ok((uuid_at(row, 0)?, uuid_at(row, 1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?
            };
            if !affected.is_empty() {
                tx.execute(
                    "UPDATE messages SET delivery_state = 'delivered'
                     WHERE receiver_id = ?1 AND delivery_state = 'sent'",
                    [receiver_id.to_string()],
                )?;
            }
            tx.commit()?;
            Ok(affected)
        })
    }

    /// Newest-first history as seen by `viewer_id`: anything at or before the
    /// viewer's deletion mark is left out.
    pub fn list_recent(
        &self,
        conversation_id: Uuid,
        viewer_id: Uuid,
        limit: u32,
    ) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let cutoff = deletion_cutoff(conn, conversation_id, viewer_id)?;
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE conversation_id = ?1 AND created_at > ?2
                 ORDER BY created_at DESC, seq DESC
                 LIMIT ?3",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut messages = stmt
                .query_map(
                    params![conversation_id.to_string(), cutoff, limit],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            attach_reactions(conn, &mut messages)?;
            Ok(messages)
        })
    }

    /// Page of messages strictly older than `before_id`, newest first.
    /// Ordering is `(created_at, seq)`, so the page boundary is stable even
    /// when several messages share a timestamp.
    pub fn list_before(
        &self,
        conversation_id: Uuid,
        viewer_id: Uuid,
        before_id: Uuid,
        limit: u32,
    ) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let cursor: Option<(i64, i64)> = conn
                .query_row(
                    "SELECT created_at, seq FROM messages WHERE id = ?1 AND conversation_id = ?2",
                    params![before_id.to_string(), conversation_id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let (cursor_at, cursor_seq) =
                cursor.ok_or_else(|| DbError::NotFound("message", before_id.to_string()))?;

            let cutoff = deletion_cutoff(conn, conversation_id, viewer_id)?;
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE conversation_id = ?1
                   AND created_at > ?2
                   AND (created_at < ?3 OR (created_at = ?3 AND seq < ?4))
                 ORDER BY created_at DESC, seq DESC
                 LIMIT ?5",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut messages = stmt
                .query_map(
                    params![conversation_id.to_string(), cutoff, cursor_at, cursor_seq, limit],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            attach_reactions(conn, &mut messages)?;
            Ok(messages)
        })
    }

    /// Replace a message body. Only the original sender may edit.
    pub fn edit_body(&self, message_id: Uuid, requester_id: Uuid, new_body: &str) -> Result<Message> {
        if new_body.trim().is_empty() {
            return Err(DbError::Validation("message body cannot be empty".into()));
        }

        self.with_conn(|conn| {
            let id = message_id.to_string();
            let message =
                query_message(conn, &id)?.ok_or_else(|| DbError::NotFound("message", id.clone()))?;
            if message.sender_id != requester_id {
                return Err(DbError::Unauthorized(format!(
                    "user {} did not author message {}",
                    requester_id, message_id
                )));
            }

            conn.execute(
                "UPDATE messages SET body = ?2, edited_at = ?3 WHERE id = ?1",
                params![id, new_body, millis(Utc::now())],
            )?;
            query_message(conn, &id)?.ok_or_else(|| DbError::NotFound("message", id))
        })
    }

    /// Delete a batch of messages from one conversation. All-or-nothing:
    /// every id must exist there and be authored by `requester_id`.
    /// Returns the (deduplicated) ids that were removed.
    pub fn delete_many(
        &self,
        conversation_id: Uuid,
        message_ids: &[Uuid],
        requester_id: Uuid,
    ) -> Result<Vec<Uuid>> {
        if message_ids.is_empty() {
            return Err(DbError::Validation("no message ids given".into()));
        }

        let mut seen = HashSet::new();
        let ids: Vec<Uuid> = message_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            for id in &ids {
                let row: Option<(Uuid, Uuid)> = tx
                    .query_row(
                        "SELECT conversation_id, sender_id FROM messages WHERE id = ?1",
                        [id.to_string()],
                        |row| Ok((uuid_at(row, 0)?, uuid_at(row, 1)?)),
                    )
                    .optional()?;
                match row {
                    Some((conv, _)) if conv != conversation_id => {
                        return Err(DbError::NotFound("message", id.to_string()));
                    }
                    Some((_, sender)) if sender != requester_id => {
                        return Err(DbError::Unauthorized(format!(
                            "user {} did not author message {}",
                            requester_id, id
                        )));
                    }
                    Some(_) => {}
                    None => return Err(DbError::NotFound("message", id.to_string())),
                }
            }

            for id in &ids {
                tx.execute("DELETE FROM messages WHERE id = ?1", [id.to_string()])?;
            }
            tx.commit()?;
            Ok(ids)
        })
    }

    /// Set `user_id`'s reaction on a message. An empty reaction clears it.
    /// Only users with a pre-seeded slot (the participants) can react.
    pub fn set_reaction(&self, message_id: Uuid, user_id: Uuid, reaction: &str) -> Result<Message> {
        self.with_conn(|conn| {
            let id = message_id.to_string();
            if query_message(conn, &id)?.is_none() {
                return Err(DbError::NotFound("message", id));
            }

            let value = (!reaction.is_empty()).then_some(reaction);
            let changed = conn.execute(
                "UPDATE message_reactions SET reaction = ?3 WHERE message_id = ?1 AND user_id = ?2",
                params![id, user_id.to_string(), value],
            )?;
            if changed == 0 {
                return Err(DbError::Unauthorized(format!(
                    "user {} has no reaction slot on message {}",
                    user_id, message_id
                )));
            }
            query_message(conn, &id)?.ok_or_else(|| DbError::NotFound("message", id))
        })
    }

    /// Messages to `user_id` not yet seen, after the user's deletion mark.
    pub fn unread_count(&self, conversation_id: Uuid, user_id: Uuid) -> Result<u32> {
        self.with_conn(|conn| {
            let cutoff = deletion_cutoff(conn, conversation_id, user_id)?;
            let count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE conversation_id = ?1 AND receiver_id = ?2
                   AND delivery_state IN ('sent', 'delivered')
                   AND created_at > ?3",
                params![conversation_id.to_string(), user_id.to_string(), cutoff],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}

/// Timestamp (ms) at or before which the viewer must not see messages.
fn deletion_cutoff(conn: &Connection, conversation_id: Uuid, user_id: Uuid) -> Result<i64> {
    let deleted_at: Option<i64> = conn
        .query_row(
            "SELECT deleted_at FROM conversation_deletions
             WHERE conversation_id = ?1 AND user_id = ?2",
            params![conversation_id.to_string(), user_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(deleted_at.unwrap_or(i64::MIN))
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<Message>> {
    let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
    let message = conn.query_row(&sql, [id], message_from_row).optional()?;
    match message {
        Some(message) => {
            let mut batch = vec![message];
            attach_reactions(conn, &mut batch)?;
            Ok(batch.pop())
        }
        None => Ok(None),
    }
}

/// Batch-load reaction slots for a page of messages.
fn attach_reactions(conn: &Connection, messages: &mut [Message]) -> Result<()> {
    if messages.is_empty() {
        return Ok(());
    }

    let placeholders: Vec<String> = (1..=messages.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT message_id, user_id, reaction FROM message_reactions
         WHERE message_id IN ({})
         ORDER BY rowid",
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let ids: Vec<String> = messages.iter().map(|m| m.id.to_string()).collect();

    let mut by_message: HashMap<Uuid, Vec<Reaction>> = HashMap::new();
    let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
        Ok((
            uuid_at(row, 0)?,
            Reaction {
                user_id: uuid_at(row, 1)?,
                reaction: row.get(2)?,
            },
        ))
    })?;
    for row in rows {
        let (message_id, reaction) = row?;
        by_message.entry(message_id).or_default().push(reaction);
    }

    for message in messages.iter_mut() {
        message.reactions = by_message.remove(&message.id).unwrap_or_default();
    }
    Ok(())
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let reply_body: Option<String> = row.get(9)?;
    let reply_to = match reply_body {
        Some(body) => Some(ReplySnapshot {
            message_type: row.get(8)?,
            body,
            owner: opt_uuid_at(row, 10)?,
        }),
        None => None,
    };

    Ok(Message {
        id: uuid_at(row, 0)?,
        conversation_id: uuid_at(row, 1)?,
        sender_id: uuid_at(row, 2)?,
        receiver_id: uuid_at(row, 3)?,
        body: row.get(4)?,
        message_type: row.get(5)?,
        attachment_url: row.get(6)?,
        client_ref: row.get(7)?,
        reply_to,
        delivery_state: parsed_at(row, 11)?,
        reactions: Vec::new(),
        created_at: time_at(row, 12)?,
        edited_at: opt_time_at(row, 13)?,
    })
}
