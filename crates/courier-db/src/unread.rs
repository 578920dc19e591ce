use std::collections::HashMap;

use courier_types::models::Message;
use courier_types::{ChatResult, UserId};
use rusqlite::Connection;

use crate::messages::{MESSAGE_COLUMNS, read_message_row};
use crate::models::MessageRow;
use crate::{Database, SqlExt};

impl Database {
    /// Claim every unread message `sender` addressed to `receiver` and mark it
    /// read in the same statement. Returns the claimed messages as they were
    /// before the flip, newest first. A claimed message is never returned again.
    pub fn pull_unread(&self, receiver: UserId, sender: UserId) -> ChatResult<Vec<Message>> {
        self.with_conn(|conn| claim_unread(conn, receiver, sender))
    }

    pub fn unread_count(&self, receiver: UserId, sender: UserId) -> ChatResult<u32> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE receiver_id = ?1 AND sender_id = ?2 AND is_read = 0",
                [receiver, sender],
                |row| row.get(0),
            )
            .db()
        })
    }
}

fn claim_unread(conn: &Connection, receiver: UserId, sender: UserId) -> ChatResult<Vec<Message>> {
    let sql = format!(
        "UPDATE messages SET is_read = 1
         WHERE receiver_id = ?1 AND sender_id = ?2 AND is_read = 0
         RETURNING {MESSAGE_COLUMNS}"
    );

    let mut stmt = conn.prepare(&sql).db()?;
    let rows = stmt
        .query_map([receiver, sender], read_message_row)
        .db()?
        .collect::<Result<Vec<_>, _>>()
        .db()?;

    let mut claimed = rows
        .into_iter()
        .map(|row| {
            // RETURNING yields post-update values; report the pre-claim state.
            MessageRow {
                is_read: false,
                ..row
            }
            .into_message()
        })
        .collect::<ChatResult<Vec<_>>>()?;

    // RETURNING order is unspecified.
    claimed.sort_by(|x, y| (y.created_at, y.id).cmp(&(x.created_at, x.id)));
    Ok(claimed)
}

/// Unread counts addressed to `receiver`, keyed by sender.
pub(crate) fn unread_by_sender(
    conn: &Connection,
    receiver: UserId,
) -> ChatResult<HashMap<UserId, u32>> {
    let mut stmt = conn
        .prepare(
            "SELECT sender_id, COUNT(*) FROM messages
             WHERE receiver_id = ?1 AND is_read = 0
             GROUP BY sender_id",
        )
        .db()?;

    let counts = stmt
        .query_map([receiver], |row| Ok((row.get(0)?, row.get(1)?)))
        .db()?
        .collect::<Result<HashMap<_, _>, _>>()
        .db()?;

    Ok(counts)
}
