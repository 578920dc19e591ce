use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL DEFAULT '',
            avatar      TEXT NOT NULL DEFAULT '',
            gender      TEXT NOT NULL DEFAULT '',
            is_vip      INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        -- One row per unordered pair; the UNIQUE pair is what makes
        -- concurrent first contact collapse onto a single conversation.
        CREATE TABLE IF NOT EXISTS conversations (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_low    INTEGER NOT NULL REFERENCES users(id),
            user_high   INTEGER NOT NULL REFERENCES users(id),
            CHECK (user_low < user_high),
            UNIQUE (user_low, user_high)
        );

        CREATE TABLE IF NOT EXISTS participants (
            user_id         INTEGER NOT NULL REFERENCES users(id),
            conversation_id INTEGER NOT NULL REFERENCES conversations(id),
            PRIMARY KEY (user_id, conversation_id)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_conversation
            ON participants(conversation_id);

        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_id   INTEGER NOT NULL REFERENCES users(id),
            receiver_id INTEGER NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL DEFAULT '',
            image       TEXT NOT NULL DEFAULT '',
            video       TEXT NOT NULL DEFAULT '',
            is_read     INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL,
            CHECK (sender_id <> receiver_id)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(sender_id, receiver_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_unread
            ON messages(receiver_id, sender_id, is_read);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
