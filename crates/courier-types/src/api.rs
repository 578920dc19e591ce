use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Message, MessageContent, UserProfile};
use crate::{ConversationId, MessageId, UserId};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the gateway handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub exp: usize,
}

// -- Envelopes --

/// Success envelope: `{"data": ..., "code": 200}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
    pub code: u16,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self { data, code: 200 }
    }

    pub fn created(data: T) -> Self {
        Self { data, code: 201 }
    }
}

/// Failure envelope: `{"errors": [...], "code": 4xx/5xx}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub errors: Vec<String>,
    pub code: u16,
}

// -- Queries --

fn first_page() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "first_page")]
    pub page: i64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub peer_id: UserId,
    #[serde(default = "first_page")]
    pub page: i64,
}

// -- Messages --

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub peer_id: UserId,
    #[serde(flatten)]
    pub body: MessageContent,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub id: MessageId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub page: i64,
    pub messages: Vec<Message>,
}

// -- Conversation list --

/// Peer fields shown next to a conversation row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerView {
    pub id: UserId,
    pub name: String,
    pub avatar: String,
    pub gender: String,
    pub is_vip: bool,
}

impl PeerView {
    /// Placeholder for a peer the directory no longer knows about.
    pub fn unknown(id: UserId) -> Self {
        Self {
            id,
            name: String::new(),
            avatar: String::new(),
            gender: String::new(),
            is_vip: false,
        }
    }
}

impl From<UserProfile> for PeerView {
    fn from(p: UserProfile) -> Self {
        Self {
            id: p.id,
            name: p.name,
            avatar: p.avatar,
            gender: p.gender,
            is_vip: p.is_vip,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationView {
    pub peer: PeerView,
    pub conversation_id: Option<ConversationId>,
    pub last_message: Message,
    /// Messages from this peer the requester has not pulled yet.
    pub unread: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationListResponse {
    pub total: u64,
    pub page: i64,
    pub conversations: Vec<ConversationView>,
}
