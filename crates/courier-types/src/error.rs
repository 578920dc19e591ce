use thiserror::Error;

pub type ChatResult<T> = Result<T, ChatError>;

/// Failure taxonomy shared by the store, the REST handlers and the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    /// Lost a race while creating a row guarded by a uniqueness constraint.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Storage timed out or was unreachable. Safe to retry.
    #[error("temporarily unavailable: {0}")]
    Transient(String),

    #[error("internal error: {0}")]
    Fatal(String),
}

impl ChatError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Status code used in `{errors, code}` payloads, HTTP and WebSocket alike.
    pub fn code(&self) -> u16 {
        match self {
            Self::InvalidArgument(_) => 400,
            Self::Auth(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Transient(_) => 503,
            Self::Fatal(_) => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Whether a live gateway connection must be torn down after this error.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::NotFound(_) | Self::Fatal(_))
    }

    /// Text shown to clients. Internal details of `Fatal` stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            Self::Fatal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}
