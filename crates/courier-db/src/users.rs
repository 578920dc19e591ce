use courier_types::models::UserProfile;
use courier_types::{ChatError, ChatResult, UserId};
use rusqlite::Connection;

use crate::{Database, SqlExt};

impl Database {
    // -- Directory --

    /// Seed a directory entry. Account management itself lives outside this service.
    pub fn create_user(
        &self,
        name: &str,
        avatar: &str,
        gender: &str,
        is_vip: bool,
    ) -> ChatResult<UserId> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (name, avatar, gender, is_vip) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![name, avatar, gender, is_vip],
            )
            .db()?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn user_exists(&self, id: UserId) -> ChatResult<bool> {
        self.with_conn(|conn| query_user_exists(conn, id))
    }

    /// Batch-fetch display fields for a set of users. Unknown ids are skipped.
    pub fn profiles(&self, ids: &[UserId]) -> ChatResult<Vec<UserProfile>> {
        self.with_conn(|conn| query_profiles(conn, ids))
    }
}

pub(crate) fn query_user_exists(conn: &Connection, id: UserId) -> ChatResult<bool> {
    conn.query_row("SELECT 1 FROM users WHERE id = ?1", [id], |_| Ok(()))
        .optional()
        .map(|row| row.is_some())
}

pub(crate) fn ensure_user(conn: &Connection, id: UserId) -> ChatResult<()> {
    if query_user_exists(conn, id)? {
        Ok(())
    } else {
        Err(ChatError::not_found(format!("user {} does not exist", id)))
    }
}

pub(crate) fn query_profiles(conn: &Connection, ids: &[UserId]) -> ChatResult<Vec<UserProfile>> {
    if ids.is_empty() {
        return Ok(vec![]);
    }

    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT id, name, avatar, gender, is_vip FROM users WHERE id IN ({})",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql).db()?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(ids.iter()), |row| {
            Ok(UserProfile {
                id: row.get(0)?,
                name: row.get(1)?,
                avatar: row.get(2)?,
                gender: row.get(3)?,
                is_vip: row.get(4)?,
            })
        })
        .db()?
        .collect::<Result<Vec<_>, _>>()
        .db()?;

    Ok(rows)
}
