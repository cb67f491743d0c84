use std::sync::Arc;

use murmur_db::{Database, NewMessage};
use murmur_types::events::GatewayEvent;
use murmur_types::models::{DeliveryState, Message, PresenceRecord, ReplySnapshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatcher::Dispatcher;
use crate::error::{GatewayError, Result, blocking};
use crate::notify::{NotificationJob, Notifier};

/// What a send does for the receiver, decided from their presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPlan {
    pub state: DeliveryState,
    pub notify: bool,
}

/// Offline or unknown: sent + push. Online elsewhere: delivered + push.
/// Focused on this conversation: seen, no push.
pub fn classify(presence: Option<&PresenceRecord>, conversation_id: Uuid) -> DeliveryPlan {
    match presence {
        Some(record) if record.online => {
            if record.current_conversation_id == Some(conversation_id) {
                DeliveryPlan {
                    state: DeliveryState::Seen,
                    notify: false,
                }
            } else {
                DeliveryPlan {
                    state: DeliveryState::Delivered,
                    notify: true,
                }
            }
        }
        _ => DeliveryPlan {
            state: DeliveryState::Sent,
            notify: true,
        },
    }
}

/// A validated send request. The sender is always the authenticated user.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub sender_id: Uuid,
    pub sender_name: String,
    pub receiver_id: Uuid,
    pub conversation_id: Uuid,
    pub body: String,
    pub message_type: Option<String>,
    pub attachment_url: Option<String>,
    pub client_ref: Option<String>,
    pub reply_to: Option<ReplySnapshot>,
    pub is_first_message: bool,
    pub toggle_suggestion: bool,
}

#[derive(Clone)]
pub struct DeliveryEngine {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    notifier: Arc<dyn Notifier>,
}

impl DeliveryEngine {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            db,
            dispatcher,
            notifier,
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Classify against the receiver's current presence, persist, then fan out.
    ///
    /// Presence is read once up front; if it changes before the insert the
    /// state may lag, and the bulk mark-seen on join corrects it.
    pub async fn send(&self, out: OutgoingMessage) -> Result<Message> {
        if out.body.trim().is_empty() && out.attachment_url.is_none() {
            return Err(GatewayError::Validation(
                "message needs a body or an attachment".into(),
            ));
        }

        let conversation_id = out.conversation_id;
        let conversation = blocking(&self.db, move |db| db.get_conversation(conversation_id)).await?;
        if !conversation.has_participant(out.sender_id) {
            return Err(GatewayError::Unauthorized(format!(
                "not a participant of conversation {}",
                conversation_id
            )));
        }

        let presence = self.dispatcher.delivery_snapshot(out.receiver_id).await;
        let plan = classify(presence.as_ref(), conversation_id);

        let new = NewMessage {
            conversation_id,
            sender_id: out.sender_id,
            receiver_id: out.receiver_id,
            body: out.body.clone(),
            message_type: out.message_type.clone(),
            attachment_url: out.attachment_url.clone(),
            client_ref: out.client_ref.clone(),
            reply_to: out.reply_to.clone(),
            delivery_state: plan.state,
            created_at: None,
        };
        let message = blocking(&self.db, move |db| db.append_message(new)).await?;
        debug!(
            "Message {} in {} persisted as {}",
            message.id, conversation_id, message.delivery_state
        );

        // From here on the message exists; fan-out failures are only logged.
        self.dispatcher
            .publish_to_room(
                conversation_id,
                GatewayEvent::GetPrivateMessage {
                    message: message.clone(),
                    change_suggestion_status: out.toggle_suggestion,
                },
            )
            .await;

        if out.is_first_message {
            let (sender, receiver) = (out.sender_id, out.receiver_id);
            if let Err(e) = blocking(&self.db, move |db| {
                db.backfill_initiator_responder(conversation_id, sender, receiver)
            })
            .await
            {
                warn!("Initiator backfill for {} failed: {}", conversation_id, e);
            }
            self.dispatcher
                .publish_to_user(
                    out.receiver_id,
                    GatewayEvent::NewUserMsg {
                        conversation_id,
                        sender_id: out.sender_id,
                    },
                )
                .await;
        }

        if out.toggle_suggestion {
            if let Err(e) =
                blocking(&self.db, move |db| db.set_suggestion_inactive(conversation_id)).await
            {
                warn!("Suggestion toggle for {} failed: {}", conversation_id, e);
            }
        }

        if plan.notify {
            let (sender_id, message_id) = (out.sender_id, message.id);
            self.notify_user(out.receiver_id, move |token| {
                NotificationJob::chat_message(
                    &out.sender_name,
                    &out.body,
                    token,
                    conversation_id,
                    sender_id,
                    message_id,
                )
            })
            .await;
        }

        Ok(message)
    }

    /// Everything addressed to `viewer_id` in the conversation becomes seen.
    /// The other participant hears about it only if something changed.
    pub async fn mark_seen(&self, viewer_id: Uuid, conversation_id: Uuid) -> Result<bool> {
        let conversation = blocking(&self.db, move |db| db.get_conversation(conversation_id)).await?;
        let other = conversation.other_participant(viewer_id).ok_or_else(|| {
            GatewayError::Unauthorized(format!(
                "not a participant of conversation {}",
                conversation_id
            ))
        })?;

        let changed = blocking(&self.db, move |db| {
            db.bulk_advance_state(
                viewer_id,
                conversation_id,
                &[DeliveryState::Sent, DeliveryState::Delivered],
                DeliveryState::Seen,
            )
        })
        .await?;

        if changed {
            self.dispatcher
                .publish_to_user(
                    other,
                    GatewayEvent::AllMessageSee {
                        conversation_id,
                        seen_by: viewer_id,
                    },
                )
                .await;
        }
        Ok(changed)
    }

    /// The receiver just became reachable: `sent` becomes `delivered` across
    /// all their conversations, and each affected sender is told.
    pub async fn catch_up_delivered(&self, receiver_id: Uuid) -> Result<usize> {
        let affected = blocking(&self.db, move |db| db.mark_all_delivered(receiver_id)).await?;
        for (conversation_id, sender_id) in &affected {
            self.dispatcher
                .publish_to_user(
                    *sender_id,
                    GatewayEvent::AllMessageDelivered {
                        conversation_id: *conversation_id,
                        delivered_to: receiver_id,
                    },
                )
                .await;
        }
        if !affected.is_empty() {
            info!(
                "Caught up {} conversations to delivered for {}",
                affected.len(),
                receiver_id
            );
        }
        Ok(affected.len())
    }

    /// Enqueue a push for `user_id` if they have a device token.
    pub async fn notify_user<F>(&self, user_id: Uuid, build: F)
    where
        F: FnOnce(String) -> NotificationJob,
    {
        match blocking(&self.db, move |db| db.device_token_for(user_id)).await {
            Ok(Some(token)) => {
                let job = build(token);
                info!("Enqueueing notification for {}", user_id);
                self.notifier.enqueue(job);
            }
            Ok(None) => debug!("No device token for {}, skipping notification", user_id),
            Err(e) => warn!("Device token lookup for {} failed: {}", user_id, e),
        }
    }
}
