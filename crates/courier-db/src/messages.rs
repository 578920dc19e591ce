use chrono::{DateTime, Utc};
use courier_types::models::{Message, MessageContent};
use courier_types::{ChatError, ChatResult, UserId};
use rusqlite::{Connection, Row};

use crate::models::{MessageRow, format_timestamp};
use crate::users::ensure_user;
use crate::{Database, SqlExt};

pub(crate) const MESSAGE_COLUMNS: &str =
    "id, sender_id, receiver_id, content, image, video, is_read, created_at";

impl Database {
    // -- Messages --

    /// Validate and store a message from `sender` to `receiver`, unread.
    pub fn append_message(
        &self,
        sender: UserId,
        receiver: UserId,
        body: &MessageContent,
        at: DateTime<Utc>,
    ) -> ChatResult<Message> {
        if sender == receiver {
            return Err(ChatError::invalid("cannot send a message to yourself"));
        }
        body.validate()?;

        self.with_conn(|conn| {
            ensure_user(conn, sender)?;
            ensure_user(conn, receiver)?;
            insert_message(conn, sender, receiver, body, at)
        })
    }

    /// Page `page` (from 1) of every message exchanged between two users,
    /// oldest first, ties broken by insertion order.
    pub fn list_between(
        &self,
        a: UserId,
        b: UserId,
        page: i64,
        page_size: u32,
    ) -> ChatResult<Vec<Message>> {
        let offset = page_offset(page, page_size)?;
        self.with_conn(|conn| query_between(conn, a, b, page_size, offset))
    }
}

/// Row offset of a 1-based page.
pub(crate) fn page_offset(page: i64, page_size: u32) -> ChatResult<i64> {
    if page < 1 {
        return Err(ChatError::invalid("page must be an integer greater than 0"));
    }
    if page_size == 0 {
        return Err(ChatError::invalid("page size must be greater than 0"));
    }
    (page - 1)
        .checked_mul(i64::from(page_size))
        .ok_or_else(|| ChatError::invalid("page is out of range"))
}

pub(crate) fn read_message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        content: row.get(3)?,
        image: row.get(4)?,
        video: row.get(5)?,
        is_read: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn insert_message(
    conn: &Connection,
    sender: UserId,
    receiver: UserId,
    body: &MessageContent,
    at: DateTime<Utc>,
) -> ChatResult<Message> {
    let created_at = format_timestamp(at);
    conn.execute(
        "INSERT INTO messages (sender_id, receiver_id, content, image, video, is_read, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
        rusqlite::params![
            sender,
            receiver,
            body.content,
            body.image.trim(),
            body.video.trim(),
            created_at
        ],
    )
    .db()?;

    MessageRow {
        id: conn.last_insert_rowid(),
        sender_id: sender,
        receiver_id: receiver,
        content: body.content.clone(),
        image: body.image.trim().to_string(),
        video: body.video.trim().to_string(),
        is_read: false,
        created_at,
    }
    .into_message()
}

fn query_between(
    conn: &Connection,
    a: UserId,
    b: UserId,
    limit: u32,
    offset: i64,
) -> ChatResult<Vec<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM messages
         WHERE (sender_id = ?1 AND receiver_id = ?2)
            OR (sender_id = ?2 AND receiver_id = ?1)
         ORDER BY created_at ASC, id ASC
         LIMIT ?3 OFFSET ?4"
    );

    let mut stmt = conn.prepare(&sql).db()?;
    let rows = stmt
        .query_map(rusqlite::params![a, b, limit, offset], read_message_row)
        .db()?
        .collect::<Result<Vec<_>, _>>()
        .db()?;

    rows.into_iter().map(MessageRow::into_message).collect()
}
