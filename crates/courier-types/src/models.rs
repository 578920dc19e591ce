use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ChatError, ChatResult};
use crate::{MessageId, UserId};

/// Upper bound on the text part of a message, counted in characters.
pub const MAX_TEXT_CHARS: usize = 250;

/// A direct message between two users. Immutable apart from `is_read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub image: String,
    pub video: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// What a sender supplies. Any of the three parts may be empty, but not all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub video: String,
}

impl MessageContent {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> ChatResult<()> {
        let text = self.content.trim();
        let image = self.image.trim();
        let video = self.video.trim();

        if text.is_empty() && image.is_empty() && video.is_empty() {
            return Err(ChatError::invalid(
                "message must carry content, an image or a video",
            ));
        }
        if self.content.chars().count() > MAX_TEXT_CHARS {
            return Err(ChatError::invalid(format!(
                "content exceeds {MAX_TEXT_CHARS} characters"
            )));
        }
        if !image.is_empty() && !is_media_url(image) {
            return Err(ChatError::invalid("image is not a valid URL"));
        }
        if !video.is_empty() && !is_media_url(video) {
            return Err(ChatError::invalid("video is not a valid URL"));
        }
        Ok(())
    }
}

fn is_media_url(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

/// Display fields served by the user directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub avatar: String,
    pub gender: String,
    pub is_vip: bool,
}
