//! Hand-off to the push-notification side. The gateway only decides when a
//! job is due; transport and retries belong to whoever drains the queue.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const PREVIEW_CHARS: usize = 75;
const FALLBACK_TEXT: &str = "New Message";
const ACCEPTED_TITLE: &str = "Request accepted";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationJob {
    pub title: String,
    pub body: String,
    pub target_token: String,
    pub data: NotificationData,
}

impl NotificationJob {
    pub fn chat_message(
        sender_name: &str,
        body: &str,
        target_token: String,
        conversation_id: Uuid,
        sender_id: Uuid,
        message_id: Uuid,
    ) -> Self {
        let title = if sender_name.is_empty() {
            FALLBACK_TEXT.to_string()
        } else {
            sender_name.to_string()
        };
        Self {
            title,
            body: preview(body),
            target_token,
            data: NotificationData {
                kind: "chat".into(),
                payload: json!({
                    "conversation_id": conversation_id,
                    "sender_id": sender_id,
                    "sender_name": sender_name,
                    "message_id": message_id,
                }),
            },
        }
    }

    pub fn chat_accepted(responder_name: &str, target_token: String, conversation_id: Uuid) -> Self {
        Self {
            title: ACCEPTED_TITLE.to_string(),
            body: format!("{} has accepted your chat request", responder_name),
            target_token,
            data: NotificationData {
                kind: "chat".into(),
                payload: json!({ "conversation_id": conversation_id }),
            },
        }
    }
}

/// Message text as shown in a push: cut at 75 characters with "..." appended.
pub fn preview(body: &str) -> String {
    if body.is_empty() {
        return FALLBACK_TEXT.to_string();
    }
    if body.chars().count() >= PREVIEW_CHARS {
        let cut: String = body.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", cut)
    } else {
        body.to_string()
    }
}

/// Fire-and-forget sink for notification jobs.
pub trait Notifier: Send + Sync {
    fn enqueue(&self, job: NotificationJob);
}

/// In-process queue; `run_dispatch_loop` drains the receiving end.
#[derive(Clone)]
pub struct QueueNotifier {
    tx: mpsc::UnboundedSender<NotificationJob>,
}

impl QueueNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NotificationJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for QueueNotifier {
    fn enqueue(&self, job: NotificationJob) {
        debug!("Queueing notification '{}'", job.title);
        if self.tx.send(job).is_err() {
            warn!("Notification queue closed, dropping job");
        }
    }
}

/// Worker draining the queue. Push transport is external, so each job is
/// logged and handed off here.
pub async fn run_dispatch_loop(mut rx: mpsc::UnboundedReceiver<NotificationJob>) {
    while let Some(job) = rx.recv().await {
        info!(
            "Dispatching {} notification '{}' to token {}",
            job.data.kind,
            job.title,
            job.target_token.chars().take(8).collect::<String>()
        );
    }
    debug!("Notification queue drained, worker exiting");
}
