pub mod conversations;
pub mod inbox;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod unread;
pub mod users;

use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use courier_types::{ChatError, ChatResult};
use rusqlite::{Connection, ErrorCode, ffi};
use tokio::task::JoinError;
use tracing::{debug, info};

/// Default bound on how long a storage call may wait for the connection.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Database {
    conn: Mutex<Connection>,
    call_timeout: Duration,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(DEFAULT_CALL_TIMEOUT)?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_conn<F, T>(&self, f: F) -> ChatResult<T>
    where
        F: FnOnce(&Connection) -> ChatResult<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    fn lock(&self) -> ChatResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ChatError::Fatal(format!("DB lock poisoned: {}", e)))
    }

    /// Run blocking storage work off the async runtime.
    ///
    /// The timeout bounds how long a call may queue for the connection. A call
    /// that times out while queued surfaces as `Transient` and never runs `f`.
    /// Once admitted, `f` runs to completion and its result is returned.
    pub async fn call<F, T>(self: &Arc<Self>, f: F) -> ChatResult<T>
    where
        F: FnOnce(&Database) -> ChatResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(self);
        let limit = self.call_timeout;
        let state = Arc::new(AtomicU8::new(CALL_QUEUED));
        let worker_state = Arc::clone(&state);

        let mut task = tokio::task::spawn_blocking(move || {
            drop(db.lock()?);
            if worker_state
                .compare_exchange(CALL_QUEUED, CALL_STARTED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                debug!("Skipping storage call abandoned after timeout");
                return Err(ChatError::Transient("storage call abandoned".into()));
            }
            f(&db)
        });

        match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => join_result(joined),
            Err(_) => {
                let abandoned = state
                    .compare_exchange(CALL_QUEUED, CALL_ABANDONED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok();
                if abandoned {
                    return Err(ChatError::Transient(format!(
                        "storage call exceeded {} ms",
                        limit.as_millis()
                    )));
                }
                join_result(task.await)
            }
        }
    }
}

const CALL_QUEUED: u8 = 0;
const CALL_STARTED: u8 = 1;
const CALL_ABANDONED: u8 = 2;

fn join_result<T>(joined: std::result::Result<ChatResult<T>, JoinError>) -> ChatResult<T> {
    joined.unwrap_or_else(|e| Err(ChatError::Fatal(format!("storage task failed: {}", e))))
}

/// Maps rusqlite results onto the shared error taxonomy.
pub(crate) trait SqlExt<T> {
    fn db(self) -> ChatResult<T>;
    fn optional(self) -> ChatResult<Option<T>>;
}

impl<T> SqlExt<T> for std::result::Result<T, rusqlite::Error> {
    fn db(self) -> ChatResult<T> {
        self.map_err(map_sql_err)
    }

    fn optional(self) -> ChatResult<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(map_sql_err(e)),
        }
    }
}

pub(crate) fn map_sql_err(e: rusqlite::Error) -> ChatError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) => match err.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                ChatError::Transient(e.to_string())
            }
            ErrorCode::ConstraintViolation
                if err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                ChatError::Conflict(e.to_string())
            }
            _ => ChatError::Fatal(e.to_string()),
        },
        _ => ChatError::Fatal(e.to_string()),
    }
}
