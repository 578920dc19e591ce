//! Database row types. These map directly to SQLite rows and are converted
//! into courier-types models before leaving the crate.

use chrono::{DateTime, SecondsFormat, Utc};
use courier_types::models::Message;
use courier_types::{ChatError, ChatResult, ConversationId, MessageId, UserId};

pub struct MessageRow {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub image: String,
    pub video: String,
    pub is_read: bool,
    pub created_at: String,
}

impl MessageRow {
    pub fn into_message(self) -> ChatResult<Message> {
        let created_at = parse_timestamp(&self.created_at).ok_or_else(|| {
            ChatError::Fatal(format!(
                "corrupt created_at '{}' on message {}",
                self.created_at, self.id
            ))
        })?;

        Ok(Message {
            id: self.id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            content: self.content,
            image: self.image,
            video: self.video,
            is_read: self.is_read,
            created_at,
        })
    }
}

/// One line of a user's conversation list: the peer and the latest message
/// exchanged with them.
#[derive(Debug, Clone)]
pub struct InboxRow {
    pub peer_id: UserId,
    pub conversation_id: Option<ConversationId>,
    pub last_message: Message,
}

#[derive(Debug, Clone)]
pub struct InboxPage {
    /// Distinct peers across all pages.
    pub total: u64,
    pub rows: Vec<InboxRow>,
}

/// Fixed-width UTC timestamps keep lexical order equal to chronological order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
