use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::ErrorCode;
use crate::models::{Message, RequestStatus};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the WebSocket upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Chats --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteChatsRequest {
    pub chat_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteChatsResponse {
    pub deleted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPeer {
    pub id: Uuid,
    pub is_online: bool,
}

/// One row of the chat list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSummary {
    pub conversation_id: Uuid,
    pub user: ChatPeer,
    pub request_status: RequestStatus,
    pub initiator: Option<Uuid>,
    pub responder: Option<Uuid>,
    pub is_suggestion_active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Newest first, already filtered by the caller's deletion mark.
    pub messages: Vec<Message>,
    pub unread_count: u32,
    pub latest_message_at: Option<DateTime<Utc>>,
}

// -- Devices --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterDeviceRequest {
    pub device_id: String,
    pub token: String,
}

// -- Errors --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}
