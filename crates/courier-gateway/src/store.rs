use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use courier_db::Database;
use courier_types::models::{Message, MessageContent};
use courier_types::{ChatResult, ConversationId, UserId};

/// The storage operations a live session needs.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn user_exists(&self, user: UserId) -> ChatResult<bool>;

    async fn resolve(&self, a: UserId, b: UserId) -> ChatResult<ConversationId>;

    async fn append(
        &self,
        sender: UserId,
        receiver: UserId,
        body: MessageContent,
    ) -> ChatResult<Message>;

    async fn pull_unread(&self, receiver: UserId, sender: UserId) -> ChatResult<Vec<Message>>;
}

/// `ChatStore` over the shared SQLite database. Every call runs on the
/// blocking pool under the database's call timeout.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn user_exists(&self, user: UserId) -> ChatResult<bool> {
        self.db.call(move |db| db.user_exists(user)).await
    }

    async fn resolve(&self, a: UserId, b: UserId) -> ChatResult<ConversationId> {
        self.db.call(move |db| db.resolve_conversation(a, b)).await
    }

    async fn append(
        &self,
        sender: UserId,
        receiver: UserId,
        body: MessageContent,
    ) -> ChatResult<Message> {
        self.db
            .call(move |db| db.append_message(sender, receiver, &body, Utc::now()))
            .await
    }

    async fn pull_unread(&self, receiver: UserId, sender: UserId) -> ChatResult<Vec<Message>> {
        self.db.call(move |db| db.pull_unread(receiver, sender)).await
    }
}
