use std::collections::HashMap;

use courier_types::models::UserProfile;
use courier_types::{ChatResult, UserId};
use rusqlite::Connection;

use crate::messages::{page_offset, read_message_row};
use crate::models::{InboxPage, InboxRow, MessageRow};
use crate::unread::unread_by_sender;
use crate::users::query_profiles;
use crate::{Database, SqlExt};

/// A page of the inbox with everything the list screen needs, fetched under
/// one lock so counts and rows agree.
pub struct InboxSnapshot {
    pub page: InboxPage,
    pub profiles: HashMap<UserId, UserProfile>,
    pub unread: HashMap<UserId, u32>,
}

impl Database {
    /// Distinct peers of `user` ranked by their latest exchanged message, newest first.
    pub fn list_conversations(
        &self,
        user: UserId,
        page: i64,
        page_size: u32,
    ) -> ChatResult<InboxPage> {
        let offset = page_offset(page, page_size)?;
        self.with_conn(|conn| query_inbox(conn, user, page_size, offset))
    }

    /// `list_conversations` plus peer profiles and per-peer unread counts.
    pub fn inbox_snapshot(
        &self,
        user: UserId,
        page: i64,
        page_size: u32,
    ) -> ChatResult<InboxSnapshot> {
        let offset = page_offset(page, page_size)?;
        self.with_conn(|conn| {
            let page = query_inbox(conn, user, page_size, offset)?;
            let peer_ids: Vec<UserId> = page.rows.iter().map(|r| r.peer_id).collect();
            let profiles = query_profiles(conn, &peer_ids)?
                .into_iter()
                .map(|p| (p.id, p))
                .collect();
            let unread = unread_by_sender(conn, user)?;
            Ok(InboxSnapshot {
                page,
                profiles,
                unread,
            })
        })
    }
}

fn query_inbox(conn: &Connection, user: UserId, limit: u32, offset: i64) -> ChatResult<InboxPage> {
    let total: i64 = conn
        .query_row(
            "SELECT COUNT(DISTINCT CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END)
             FROM messages
             WHERE sender_id = ?1 OR receiver_id = ?1",
            [user],
            |row| row.get(0),
        )
        .db()?;

    // Latest message per peer in one pass; (created_at, id) is the total order.
    let mut stmt = conn
        .prepare(
            "WITH exchanged AS (
                 SELECT m.*,
                        CASE WHEN m.sender_id = ?1 THEN m.receiver_id ELSE m.sender_id END AS peer_id
                 FROM messages m
                 WHERE m.sender_id = ?1 OR m.receiver_id = ?1
             ),
             ranked AS (
                 SELECT *,
                        ROW_NUMBER() OVER (
                            PARTITION BY peer_id ORDER BY created_at DESC, id DESC
                        ) AS rn
                 FROM exchanged
             )
             SELECT r.id, r.sender_id, r.receiver_id, r.content, r.image, r.video,
                    r.is_read, r.created_at, r.peer_id, c.id
             FROM ranked r
             LEFT JOIN conversations c
                    ON c.user_low = MIN(?1, r.peer_id) AND c.user_high = MAX(?1, r.peer_id)
             WHERE r.rn = 1
             ORDER BY r.created_at DESC, r.id DESC
             LIMIT ?2 OFFSET ?3",
        )
        .db()?;

    let rows = stmt
        .query_map(rusqlite::params![user, limit, offset], |row| {
            Ok((
                read_message_row(row)?,
                row.get::<_, UserId>(8)?,
                row.get::<_, Option<i64>>(9)?,
            ))
        })
        .db()?
        .collect::<Result<Vec<_>, _>>()
        .db()?;

    let rows = rows
        .into_iter()
        .map(|(message, peer_id, conversation_id)| {
            Ok(InboxRow {
                peer_id,
                conversation_id,
                last_message: MessageRow::into_message(message)?,
            })
        })
        .collect::<ChatResult<Vec<_>>>()?;

    Ok(InboxPage {
        total: total.max(0) as u64,
        rows,
    })
}
