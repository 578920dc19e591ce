use courier_types::{ChatError, ChatResult, ConversationId, UserId};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::users::ensure_user;
use crate::{Database, SqlExt};

/// Attempts at create-or-fetch before a persistent conflict is treated as corruption.
const MAX_RESOLVE_ATTEMPTS: usize = 3;

impl Database {
    /// Find or create the single conversation linking two users.
    pub fn resolve_conversation(&self, a: UserId, b: UserId) -> ChatResult<ConversationId> {
        self.with_conn(|conn| resolve(conn, a, b))
    }

    pub fn find_conversation(&self, a: UserId, b: UserId) -> ChatResult<Option<ConversationId>> {
        self.with_conn(|conn| query_conversation(conn, a, b))
    }
}

pub(crate) fn resolve(conn: &Connection, a: UserId, b: UserId) -> ChatResult<ConversationId> {
    if a == b {
        return Err(ChatError::invalid("cannot open a conversation with yourself"));
    }
    ensure_user(conn, a)?;
    ensure_user(conn, b)?;

    for attempt in 1..=MAX_RESOLVE_ATTEMPTS {
        if let Some(id) = query_conversation(conn, a, b)? {
            return Ok(id);
        }

        match create_conversation(conn, a, b) {
            Ok(id) => {
                info!("Created conversation {} for users {} and {}", id, a, b);
                return Ok(id);
            }
            // Another writer created the pair first; our transaction rolled back.
            Err(ChatError::Conflict(reason)) => {
                debug!(attempt, "conversation create lost a race for ({}, {}): {}", a, b, reason);
            }
            Err(e) => return Err(e),
        }
    }

    Err(ChatError::Fatal(format!(
        "conversation for users {} and {} still conflicting after {} attempts",
        a, b, MAX_RESOLVE_ATTEMPTS
    )))
}

/// Order-independent lookup through the participant links.
fn query_conversation(conn: &Connection, a: UserId, b: UserId) -> ChatResult<Option<ConversationId>> {
    conn.query_row(
        "SELECT p1.conversation_id
         FROM participants p1
         JOIN participants p2 ON p1.conversation_id = p2.conversation_id
         WHERE p1.user_id = ?1 AND p2.user_id = ?2
         LIMIT 1",
        [a, b],
        |row| row.get(0),
    )
    .optional()
}

/// Conversation row and both participant links commit together or not at all.
fn create_conversation(conn: &Connection, a: UserId, b: UserId) -> ChatResult<ConversationId> {
    let (low, high) = if a < b { (a, b) } else { (b, a) };

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate).db()?;
    tx.execute(
        "INSERT INTO conversations (user_low, user_high) VALUES (?1, ?2)",
        [low, high],
    )
    .db()?;
    let id = tx.last_insert_rowid();
    tx.execute(
        "INSERT INTO participants (user_id, conversation_id) VALUES (?1, ?3), (?2, ?3)",
        [a, b, id],
    )
    .db()?;
    tx.commit().db()?;

    Ok(id)
}
