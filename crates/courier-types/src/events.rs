use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::models::{Message, MessageContent};
use crate::{ConversationId, MessageId, UserId};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Handshake finished, the session is live
    Ready {
        user_id: UserId,
        peer_id: UserId,
        conversation_id: ConversationId,
    },

    /// A batch of newly arrived messages from the peer, newest first
    Messages { messages: Vec<Message> },

    /// A `SendMessage` was stored
    MessageAck {
        id: MessageId,
        created_at: DateTime<Utc>,
    },

    /// A `SendMessage` was not stored
    SendFailed {
        errors: Vec<String>,
        code: u16,
        retryable: bool,
    },

    /// Protocol or handshake error. Handshake errors are followed by a close.
    Error { errors: Vec<String>, code: u16 },
}

impl GatewayEvent {
    pub fn error(err: &ChatError) -> Self {
        Self::Error {
            errors: vec![err.client_message()],
            code: err.code(),
        }
    }

    pub fn send_failed(err: &ChatError) -> Self {
        Self::SendFailed {
            errors: vec![err.client_message()],
            code: err.code(),
            retryable: err.is_retryable(),
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Store a message addressed to the session's peer
    SendMessage(MessageContent),
}
