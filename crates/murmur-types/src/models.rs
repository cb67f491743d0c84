use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery state of a single message, ordered `Sent < Delivered < Seen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Sent,
    Delivered,
    Seen,
}

impl DeliveryState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Seen => "seen",
        }
    }

    /// A transition is only allowed strictly forward.
    pub fn can_advance_to(self, next: DeliveryState) -> bool {
        next > self
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "seen" => Ok(Self::Seen),
            other => Err(format!("unknown delivery state '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown request status '{}'", other)),
        }
    }
}

/// Per-user soft deletion of a conversation. Messages at or before
/// `deleted_at` are hidden from that user only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionMark {
    pub user_id: Uuid,
    pub deleted_at: DateTime<Utc>,
}

/// A private conversation between exactly two users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    /// Normalized (sorted) participant pair.
    pub participants: [Uuid; 2],
    pub request_status: RequestStatus,
    pub initiator: Option<Uuid>,
    pub responder: Option<Uuid>,
    pub is_suggestion_active: bool,
    pub deletion_marks: Vec<DeletionMark>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participants.contains(&user_id)
    }

    /// The participant that is not `user_id`, or `None` if `user_id` is not in the pair.
    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        match self.participants {
            [a, b] if a == user_id => Some(b),
            [a, b] if b == user_id => Some(a),
            _ => None,
        }
    }

    pub fn deleted_at(&self, user_id: Uuid) -> Option<DateTime<Utc>> {
        self.deletion_marks
            .iter()
            .find(|mark| mark.user_id == user_id)
            .map(|mark| mark.deleted_at)
    }
}

/// Frozen copy of the message being replied to, taken at reply time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplySnapshot {
    #[serde(default)]
    pub message_type: Option<String>,
    pub body: String,
    #[serde(default)]
    pub owner: Option<Uuid>,
}

/// One reaction slot. Slots for both participants exist from creation;
/// `reaction` stays `None` until the user reacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: Uuid,
    pub reaction: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub body: String,
    pub message_type: Option<String>,
    pub attachment_url: Option<String>,
    /// Client-generated id echoed back so the sender can resolve its pending tick.
    pub client_ref: Option<String>,
    pub reply_to: Option<ReplySnapshot>,
    pub delivery_state: DeliveryState,
    pub reactions: Vec<Reaction>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
}

/// Live presence of a user: reachable or not, and which conversation has focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub online: bool,
    pub current_conversation_id: Option<Uuid>,
}

impl PresenceRecord {
    pub fn online() -> Self {
        Self {
            online: true,
            current_conversation_id: None,
        }
    }

    pub fn focused(conversation_id: Uuid) -> Self {
        Self {
            online: true,
            current_conversation_id: Some(conversation_id),
        }
    }

    pub fn offline() -> Self {
        Self::default()
    }
}
