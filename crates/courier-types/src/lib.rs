pub mod api;
pub mod error;
pub mod events;
pub mod models;

pub use error::{ChatError, ChatResult};

/// Stable numeric identifier of a user in the directory.
pub type UserId = i64;
pub type ConversationId = i64;
pub type MessageId = i64;
