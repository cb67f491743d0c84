use axum::{Extension, Json, extract::State};
use murmur_db::Database;
use murmur_types::api::{ChatPeer, ChatSummary, Claims, DeleteChatsRequest, DeleteChatsResponse};
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::{AppState, blocking};

/// The caller's chat list, most recently active first.
pub async fn list_chats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ChatSummary>>, ApiError> {
    let user_id = claims.sub;
    let page = state.history_page;
    let chats = blocking(&state, move |db| build_chat_list(db, user_id, page)).await?;
    Ok(Json(chats))
}

fn build_chat_list(db: &Database, user_id: Uuid, page: u32) -> murmur_db::Result<Vec<ChatSummary>> {
    let mut chats = Vec::new();
    for conversation in db.conversations_for_user(user_id)? {
        // Only conversations that carried a first message show up
        if conversation.initiator.is_none() || conversation.responder.is_none() {
            continue;
        }
        let Some(peer) = conversation.other_participant(user_id) else {
            continue;
        };

        let messages = db.list_recent(conversation.id, user_id, page)?;
        chats.push(ChatSummary {
            conversation_id: conversation.id,
            user: ChatPeer {
                id: peer,
                is_online: db.is_online(peer)?,
            },
            request_status: conversation.request_status,
            initiator: conversation.initiator,
            responder: conversation.responder,
            is_suggestion_active: conversation.is_suggestion_active,
            deleted_at: conversation.deleted_at(user_id),
            unread_count: db.unread_count(conversation.id, user_id)?,
            latest_message_at: messages.first().map(|m| m.created_at),
            messages,
        });
    }

    chats.sort_by(|a, b| b.latest_message_at.cmp(&a.latest_message_at));
    Ok(chats)
}

/// Soft-delete chats for the caller only. Every id is checked before any
/// mark is written.
pub async fn delete_chats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<DeleteChatsRequest>,
) -> Result<Json<DeleteChatsResponse>, ApiError> {
    if req.chat_ids.is_empty() {
        return Err(ApiError::Validation("chat_ids cannot be empty".into()));
    }

    let user_id = claims.sub;
    let ids = req.chat_ids;
    let deleted = blocking(&state, move |db| {
        for id in &ids {
            let conversation = db.get_conversation(*id)?;
            if !conversation.has_participant(user_id) {
                return Err(murmur_db::DbError::Unauthorized(format!(
                    "not a participant of conversation {}",
                    id
                )));
            }
        }
        for id in &ids {
            db.mark_soft_deleted(*id, user_id)?;
        }
        Ok(ids.len())
    })
    .await?;

    info!("{} ({}) deleted {} chats", claims.username, user_id, deleted);
    Ok(Json(DeleteChatsResponse { deleted }))
}
