use chrono::Utc;
use murmur_types::events::{GatewayCommand, GatewayEvent, SendPrivateMessage};
use murmur_types::models::{PresenceRecord, RequestStatus};
use tracing::{debug, info};
use uuid::Uuid;

use crate::GatewayState;
use crate::auth::check_command_token;
use crate::delivery::OutgoingMessage;
use crate::error::{GatewayError, Result, blocking};
use crate::notify::NotificationJob;
use crate::registry::ConnectionId;

/// The authenticated identity behind one socket.
#[derive(Debug, Clone)]
pub struct Session {
    pub conn_id: ConnectionId,
    pub user_id: Uuid,
    pub username: String,
}

/// Run one inbound command. Errors go back to the caller's connection only.
pub async fn handle_command(state: &GatewayState, session: &Session, cmd: GatewayCommand) -> Result<()> {
    check_command_token(cmd.token(), &state.jwt_secret, session.user_id)?;
    if let Some(claimed) = cmd.claimed_user() {
        if claimed != session.user_id {
            return Err(GatewayError::Unauthorized(format!(
                "cannot act as user {}",
                claimed
            )));
        }
    }

    let dispatcher = state.engine.dispatcher();
    let db = state.engine.db();
    let user_id = session.user_id;

    if !dispatcher.is_current(user_id, session.conn_id).await {
        return Err(GatewayError::Unauthorized(format!(
            "connection {} was superseded",
            session.conn_id
        )));
    }

    match cmd {
        GatewayCommand::OnlineStatus { online_status, .. } => {
            blocking(db, move |db| db.update_online_flag(user_id, online_status)).await?;
        }

        GatewayCommand::JoinRoom {
            target_user_id,
            wants_history,
            ..
        } => {
            let (conversation, created) = blocking(db, move |db| {
                db.find_or_create_conversation(user_id, target_user_id)
            })
            .await?;
            let conversation_id = conversation.id;
            info!(
                "{} ({}) joined conversation {} with {}{}",
                session.username,
                user_id,
                conversation_id,
                target_user_id,
                if created { " (new)" } else { "" }
            );

            dispatcher.join_room(conversation_id, session.conn_id).await;
            dispatcher
                .set_presence(session.conn_id, user_id, PresenceRecord::focused(conversation_id))
                .await;

            dispatcher
                .publish_to_room(
                    conversation_id,
                    GatewayEvent::ChatJoined {
                        conversation_id,
                        target_user_id,
                        is_suggestion_active: conversation.is_suggestion_active,
                        request_status: conversation.request_status,
                    },
                )
                .await;

            if wants_history {
                let limit = state.history_page;
                let messages = blocking(db, move |db| {
                    db.list_recent(conversation_id, user_id, limit)
                })
                .await?;
                dispatcher
                    .send_to_connection(
                        session.conn_id,
                        GatewayEvent::PreviousMsg {
                            conversation_id,
                            messages,
                        },
                    )
                    .await;
            }

            state.engine.mark_seen(user_id, conversation_id).await?;
        }

        GatewayCommand::LeaveChat {
            conversation_id, ..
        } => {
            dispatcher
                .clear_focus(session.conn_id, user_id, conversation_id)
                .await;
            dispatcher.leave_room(conversation_id, session.conn_id).await;
            debug!("{} ({}) left conversation {}", session.username, user_id, conversation_id);
        }

        GatewayCommand::LeaveApp => {
            dispatcher
                .set_presence(session.conn_id, user_id, PresenceRecord::offline())
                .await;
            blocking(db, move |db| db.update_online_flag(user_id, false)).await?;
            notify_peers(state, user_id, false).await?;
        }

        GatewayCommand::OpenApp => {
            dispatcher
                .set_presence(session.conn_id, user_id, PresenceRecord::online())
                .await;
            blocking(db, move |db| db.update_online_flag(user_id, true)).await?;
            state.engine.catch_up_delivered(user_id).await?;
            notify_peers(state, user_id, true).await?;
        }

        GatewayCommand::GetOnlineUsers => {
            let user_ids = dispatcher.online_users().await;
            dispatcher
                .send_to_connection(session.conn_id, GatewayEvent::CurrentOnlineUsers { user_ids })
                .await;
        }

        GatewayCommand::BlockUser {
            other_user_id,
            conversation_id,
            ..
        } => {
            require_peer(state, user_id, other_user_id, conversation_id).await?;
            dispatcher
                .publish_to_user(other_user_id, GatewayEvent::GotBlocked { conversation_id, user_id })
                .await;
        }

        GatewayCommand::UnblockUser {
            other_user_id,
            conversation_id,
            ..
        } => {
            require_peer(state, user_id, other_user_id, conversation_id).await?;
            dispatcher
                .publish_to_user(
                    other_user_id,
                    GatewayEvent::GotUnBlocked { conversation_id, user_id },
                )
                .await;
        }

        GatewayCommand::SendPrivateMessage(msg) => {
            let outgoing = outgoing_from(session, msg)?;
            state.engine.send(outgoing).await?;
        }

        GatewayCommand::ReactOnPrivateMessage {
            message_id,
            conversation_id,
            reaction,
            ..
        } => {
            let message = blocking(db, move |db| db.get_message(message_id)).await?;
            if message.conversation_id != conversation_id {
                return Err(GatewayError::Db(murmur_db::DbError::NotFound(
                    "message",
                    message_id.to_string(),
                )));
            }
            let value = reaction.clone();
            blocking(db, move |db| db.set_reaction(message_id, user_id, &value)).await?;
            dispatcher
                .publish_to_room(
                    conversation_id,
                    GatewayEvent::ReactionUpdated {
                        conversation_id,
                        message_id,
                        user_id,
                        reaction,
                    },
                )
                .await;
        }

        GatewayCommand::ReadAllMessages {
            conversation_id, ..
        } => {
            state.engine.mark_seen(user_id, conversation_id).await?;
            dispatcher
                .publish_to_room(
                    conversation_id,
                    GatewayEvent::AllMessagesRead {
                        conversation_id,
                        user_id,
                    },
                )
                .await;
        }

        GatewayCommand::GetPreviousMessages {
            conversation_id,
            last_message_id,
        } => {
            let conversation = blocking(db, move |db| db.get_conversation(conversation_id)).await?;
            if !conversation.has_participant(user_id) {
                return Err(GatewayError::Unauthorized(format!(
                    "not a participant of conversation {}",
                    conversation_id
                )));
            }
            let limit = state.history_page;
            let messages = blocking(db, move |db| {
                db.list_before(conversation_id, user_id, last_message_id, limit)
            })
            .await?;
            dispatcher
                .send_to_connection(
                    session.conn_id,
                    GatewayEvent::PreviousMessages {
                        conversation_id,
                        messages,
                    },
                )
                .await;
        }

        GatewayCommand::StartTyping {
            conversation_id, ..
        } => {
            require_joined(state, session, conversation_id).await?;
            dispatcher
                .publish_to_room(
                    conversation_id,
                    GatewayEvent::TypingStart {
                        conversation_id,
                        user_id,
                    },
                )
                .await;
        }

        GatewayCommand::StopTyping {
            conversation_id, ..
        } => {
            require_joined(state, session, conversation_id).await?;
            dispatcher
                .publish_to_room(
                    conversation_id,
                    GatewayEvent::TypingStop {
                        conversation_id,
                        user_id,
                    },
                )
                .await;
        }

        GatewayCommand::UpdateMessage {
            message_id, body, ..
        } => {
            let message = blocking(db, move |db| db.edit_body(message_id, user_id, &body)).await?;
            dispatcher
                .publish_to_room(
                    message.conversation_id,
                    GatewayEvent::MessageUpdated {
                        conversation_id: message.conversation_id,
                        message_id,
                        edited_at: message.edited_at.unwrap_or_else(Utc::now),
                        body: message.body,
                    },
                )
                .await;
        }

        GatewayCommand::DeleteMessages {
            message_ids,
            conversation_id,
            ..
        } => {
            let deleted = blocking(db, move |db| {
                db.delete_many(conversation_id, &message_ids, user_id)
            })
            .await?;
            info!(
                "{} ({}) deleted {} messages in {}",
                session.username,
                user_id,
                deleted.len(),
                conversation_id
            );
            dispatcher
                .publish_to_room(
                    conversation_id,
                    GatewayEvent::MessagesDeleted {
                        conversation_id,
                        message_ids: deleted,
                    },
                )
                .await;
        }

        GatewayCommand::AcceptChat {
            conversation_id, ..
        } => {
            let conversation = blocking(db, move |db| {
                db.set_request_status(conversation_id, user_id, RequestStatus::Accepted)
            })
            .await?;
            dispatcher
                .publish_to_room(conversation_id, GatewayEvent::ChatRequestAccepted { conversation_id })
                .await;

            if let Some(initiator) = conversation.initiator {
                let username = session.username.clone();
                state
                    .engine
                    .notify_user(initiator, move |token| {
                        NotificationJob::chat_accepted(&username, token, conversation_id)
                    })
                    .await;
            }
        }

        GatewayCommand::RejectChat {
            conversation_id, ..
        } => {
            blocking(db, move |db| {
                db.set_request_status(conversation_id, user_id, RequestStatus::Rejected)
            })
            .await?;
            dispatcher
                .publish_to_room(conversation_id, GatewayEvent::ChatRequestRejected { conversation_id })
                .await;
        }
    }

    Ok(())
}

/// Tell the other participant of each of the user's conversations that the
/// user came online or went offline.
pub async fn notify_peers(state: &GatewayState, user_id: Uuid, online: bool) -> Result<()> {
    let conversations = blocking(state.engine.db(), move |db| db.conversations_for_user(user_id)).await?;
    for conversation in conversations {
        let Some(peer) = conversation.other_participant(user_id) else {
            continue;
        };
        let event = if online {
            GatewayEvent::UserOnline {
                conversation_id: conversation.id,
                user_id,
            }
        } else {
            GatewayEvent::UserOffline {
                conversation_id: conversation.id,
                user_id,
            }
        };
        state.engine.dispatcher().publish_to_user(peer, event).await;
    }
    Ok(())
}

fn outgoing_from(session: &Session, msg: SendPrivateMessage) -> Result<OutgoingMessage> {
    if msg.receiver_id == session.user_id {
        return Err(GatewayError::Validation("cannot message yourself".into()));
    }
    Ok(OutgoingMessage {
        sender_id: session.user_id,
        sender_name: session.username.clone(),
        receiver_id: msg.receiver_id,
        conversation_id: msg.conversation_id,
        body: msg.message,
        message_type: msg.message_type,
        attachment_url: msg.media_url,
        client_ref: msg.client_ref,
        reply_to: msg.reply_to,
        is_first_message: msg.is_first_msg,
        toggle_suggestion: msg.change_suggestion_status,
    })
}

async fn require_peer(
    state: &GatewayState,
    user_id: Uuid,
    other_user_id: Uuid,
    conversation_id: Uuid,
) -> Result<()> {
    let conversation =
        blocking(state.engine.db(), move |db| db.get_conversation(conversation_id)).await?;
    if conversation.other_participant(user_id) != Some(other_user_id) {
        return Err(GatewayError::Unauthorized(format!(
            "{} and {} do not share conversation {}",
            user_id, other_user_id, conversation_id
        )));
    }
    Ok(())
}

async fn require_joined(state: &GatewayState, session: &Session, conversation_id: Uuid) -> Result<()> {
    if state
        .engine
        .dispatcher()
        .is_joined(conversation_id, session.conn_id)
        .await
    {
        Ok(())
    } else {
        Err(GatewayError::Unauthorized(format!(
            "join conversation {} first",
            conversation_id
        )))
    }
}
