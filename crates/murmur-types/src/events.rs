use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, ReplySnapshot, RequestStatus};

/// Machine-readable error codes carried by `GatewayEvent::Error` and REST error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    NotFound,
    Validation,
    Conflict,
    Internal,
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the authenticated connection
    #[serde(rename = "connected")]
    Connected { user_id: Uuid, username: String },

    /// A user opened a connection (global broadcast)
    #[serde(rename = "userConnected")]
    UserConnected { user_id: Uuid },

    /// A user's last connection went away (global broadcast)
    #[serde(rename = "userDisconnected")]
    UserDisconnected { user_id: Uuid },

    /// Presence snapshot for the caller
    #[serde(rename = "currentOnlineUsers")]
    CurrentOnlineUsers { user_ids: Vec<Uuid> },

    /// A conversation peer came online
    #[serde(rename = "userOnline")]
    UserOnline { conversation_id: Uuid, user_id: Uuid },

    /// A conversation peer went offline
    #[serde(rename = "userOffline")]
    UserOffline { conversation_id: Uuid, user_id: Uuid },

    #[serde(rename = "chatJoined")]
    ChatJoined {
        conversation_id: Uuid,
        target_user_id: Uuid,
        is_suggestion_active: bool,
        request_status: RequestStatus,
    },

    /// Recent history replayed on join, newest first
    #[serde(rename = "previousMsg")]
    PreviousMsg {
        conversation_id: Uuid,
        messages: Vec<Message>,
    },

    /// One page of older history, newest first
    #[serde(rename = "previousMessages")]
    PreviousMessages {
        conversation_id: Uuid,
        messages: Vec<Message>,
    },

    /// Everything the other participant sent has been seen by `seen_by`
    #[serde(rename = "allMessageSee")]
    AllMessageSee { conversation_id: Uuid, seen_by: Uuid },

    /// Everything sent to `delivered_to` in this conversation reached a device
    #[serde(rename = "allMessageDelivered")]
    AllMessageDelivered {
        conversation_id: Uuid,
        delivered_to: Uuid,
    },

    #[serde(rename = "allMessagesRead")]
    AllMessagesRead { conversation_id: Uuid, user_id: Uuid },

    /// A message was posted to a conversation room
    #[serde(rename = "GetPrivateMessage")]
    GetPrivateMessage {
        message: Message,
        change_suggestion_status: bool,
    },

    /// First message from a new contact, sent directly to the receiver
    #[serde(rename = "NewUserMsg")]
    NewUserMsg { conversation_id: Uuid, sender_id: Uuid },

    #[serde(rename = "GotBlocked")]
    GotBlocked { conversation_id: Uuid, user_id: Uuid },

    #[serde(rename = "GotUnBlocked")]
    GotUnBlocked { conversation_id: Uuid, user_id: Uuid },

    #[serde(rename = "typingStart")]
    TypingStart { conversation_id: Uuid, user_id: Uuid },

    #[serde(rename = "typingStop")]
    TypingStop { conversation_id: Uuid, user_id: Uuid },

    #[serde(rename = "messageUpdated")]
    MessageUpdated {
        conversation_id: Uuid,
        message_id: Uuid,
        body: String,
        edited_at: DateTime<Utc>,
    },

    #[serde(rename = "messagesDeleted")]
    MessagesDeleted {
        conversation_id: Uuid,
        message_ids: Vec<Uuid>,
    },

    #[serde(rename = "reactionUpdated")]
    ReactionUpdated {
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        reaction: String,
    },

    #[serde(rename = "chatRequestAccepted")]
    ChatRequestAccepted { conversation_id: Uuid },

    #[serde(rename = "chatRequestRejected")]
    ChatRequestRejected { conversation_id: Uuid },

    /// A command from this connection was rejected
    #[serde(rename = "error")]
    Error {
        code: ErrorCode,
        message: String,
        command: Option<String>,
    },
}

/// Commands sent FROM client TO server over WebSocket.
///
/// Optional `token` fields are re-verified against the connection's identity
/// when present. Optional identity fields (`user_id`, `sender_id`) must match
/// the authenticated user when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Update the profile-level online flag
    #[serde(rename = "onlineStatus")]
    OnlineStatus {
        #[serde(default)]
        token: Option<String>,
        online_status: bool,
    },

    /// Enter the conversation with `target_user_id`, creating it on first contact
    #[serde(rename = "joinRoom", alias = "joinChat")]
    JoinRoom {
        target_user_id: Uuid,
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        wants_history: bool,
    },

    #[serde(rename = "leaveChat")]
    LeaveChat {
        conversation_id: Uuid,
        #[serde(default)]
        user_id: Option<Uuid>,
    },

    /// App moved to background: offline but still connected
    #[serde(rename = "leaveApp")]
    LeaveApp,

    /// App back in foreground
    #[serde(rename = "openApp")]
    OpenApp,

    #[serde(rename = "getOnlineUsers")]
    GetOnlineUsers,

    #[serde(rename = "blockUser")]
    BlockUser {
        other_user_id: Uuid,
        conversation_id: Uuid,
        #[serde(default)]
        user_id: Option<Uuid>,
    },

    #[serde(rename = "UnblockUser")]
    UnblockUser {
        other_user_id: Uuid,
        conversation_id: Uuid,
        #[serde(default)]
        user_id: Option<Uuid>,
    },

    #[serde(rename = "sendPrivateMessage")]
    SendPrivateMessage(SendPrivateMessage),

    #[serde(rename = "reactOnPrivateMessage")]
    ReactOnPrivateMessage {
        message_id: Uuid,
        conversation_id: Uuid,
        reaction: String,
        #[serde(default)]
        token: Option<String>,
    },

    #[serde(rename = "readAllMessages")]
    ReadAllMessages {
        conversation_id: Uuid,
        #[serde(default)]
        token: Option<String>,
    },

    /// Cursor pagination: messages strictly older than `last_message_id`
    #[serde(rename = "getPreviousMessages")]
    GetPreviousMessages {
        conversation_id: Uuid,
        last_message_id: Uuid,
    },

    #[serde(rename = "startTyping")]
    StartTyping {
        conversation_id: Uuid,
        #[serde(default)]
        token: Option<String>,
    },

    #[serde(rename = "stopTyping")]
    StopTyping {
        conversation_id: Uuid,
        #[serde(default)]
        token: Option<String>,
    },

    #[serde(rename = "updateMessage")]
    UpdateMessage {
        message_id: Uuid,
        body: String,
        #[serde(default)]
        sender_id: Option<Uuid>,
    },

    #[serde(rename = "deleteMessages")]
    DeleteMessages {
        message_ids: Vec<Uuid>,
        conversation_id: Uuid,
        #[serde(default)]
        sender_id: Option<Uuid>,
    },

    #[serde(rename = "acceptChat")]
    AcceptChat {
        conversation_id: Uuid,
        #[serde(default)]
        token: Option<String>,
    },

    #[serde(rename = "rejectChat")]
    RejectChat {
        conversation_id: Uuid,
        #[serde(default)]
        token: Option<String>,
    },
}

impl GatewayCommand {
    /// Wire name of the command, used when reporting errors back.
    pub fn name(&self) -> &'static str {
        match self {
            Self::OnlineStatus { .. } => "onlineStatus",
            Self::JoinRoom { .. } => "joinRoom",
            Self::LeaveChat { .. } => "leaveChat",
            Self::LeaveApp => "leaveApp",
            Self::OpenApp => "openApp",
            Self::GetOnlineUsers => "getOnlineUsers",
            Self::BlockUser { .. } => "blockUser",
            Self::UnblockUser { .. } => "UnblockUser",
            Self::SendPrivateMessage(_) => "sendPrivateMessage",
            Self::ReactOnPrivateMessage { .. } => "reactOnPrivateMessage",
            Self::ReadAllMessages { .. } => "readAllMessages",
            Self::GetPreviousMessages { .. } => "getPreviousMessages",
            Self::StartTyping { .. } => "startTyping",
            Self::StopTyping { .. } => "stopTyping",
            Self::UpdateMessage { .. } => "updateMessage",
            Self::DeleteMessages { .. } => "deleteMessages",
            Self::AcceptChat { .. } => "acceptChat",
            Self::RejectChat { .. } => "rejectChat",
        }
    }

    /// The per-command token, if the client sent one.
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::OnlineStatus { token, .. }
            | Self::JoinRoom { token, .. }
            | Self::ReactOnPrivateMessage { token, .. }
            | Self::ReadAllMessages { token, .. }
            | Self::StartTyping { token, .. }
            | Self::StopTyping { token, .. }
            | Self::AcceptChat { token, .. }
            | Self::RejectChat { token, .. } => token.as_deref(),
            Self::SendPrivateMessage(msg) => msg.token.as_deref(),
            _ => None,
        }
    }

    /// The identity the client claims to act as, if the payload names one.
    pub fn claimed_user(&self) -> Option<Uuid> {
        match self {
            Self::LeaveChat { user_id, .. }
            | Self::BlockUser { user_id, .. }
            | Self::UnblockUser { user_id, .. } => *user_id,
            Self::UpdateMessage { sender_id, .. } | Self::DeleteMessages { sender_id, .. } => {
                *sender_id
            }
            Self::SendPrivateMessage(msg) => msg.sender_id,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendPrivateMessage {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub sender_id: Option<Uuid>,
    pub receiver_id: Uuid,
    pub conversation_id: Uuid,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub client_ref: Option<String>,
    #[serde(default)]
    pub reply_to: Option<ReplySnapshot>,
    #[serde(default)]
    pub is_first_msg: bool,
    #[serde(default)]
    pub change_suggestion_status: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_from_tagged_json() {
        let target = Uuid::new_v4();
        let raw = format!(
            r#"{{"type":"joinChat","data":{{"target_user_id":"{}","wants_history":true}}}}"#,
            target
        );
        match serde_json::from_str::<GatewayCommand>(&raw).unwrap() {
            GatewayCommand::JoinRoom {
                target_user_id,
                token,
                wants_history,
            } => {
                assert_eq!(target_user_id, target);
                assert!(token.is_none());
                assert!(wants_history);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let cmd: GatewayCommand = serde_json::from_str(r#"{"type":"openApp"}"#).unwrap();
        assert_eq!(cmd.name(), "openApp");
    }

    #[test]
    fn send_private_message_defaults() {
        let raw = format!(
            r#"{{"type":"sendPrivateMessage","data":{{"receiver_id":"{}","conversation_id":"{}","message":"hi"}}}}"#,
            Uuid::new_v4(),
            Uuid::new_v4()
        );
        let cmd: GatewayCommand = serde_json::from_str(&raw).unwrap();
        assert!(cmd.claimed_user().is_none());
        let GatewayCommand::SendPrivateMessage(msg) = cmd else {
            panic!("expected sendPrivateMessage");
        };
        assert!(!msg.is_first_msg);
        assert!(!msg.change_suggestion_status);
        assert!(msg.reply_to.is_none());
    }

    #[test]
    fn events_serialize_with_wire_names() {
        let event = GatewayEvent::Error {
            code: ErrorCode::NotFound,
            message: "conversation not found".into(),
            command: Some("joinRoom".into()),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["data"]["code"], "not_found");
    }
}
