pub mod auth;
pub mod connection;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use axum::{Router, routing::get};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use auth::Authenticator;
use store::ChatStore;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Delay between the end of one unread poll and the start of the next.
    pub poll_interval: Duration,
    /// Server Ping cadence. Two unanswered Pings drop the connection.
    pub heartbeat_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}

/// Shared by every gateway connection.
#[derive(Clone)]
pub struct GatewayState {
    pub store: Arc<dyn ChatStore>,
    pub auth: Arc<dyn Authenticator>,
    pub config: GatewayConfig,
    /// Parent of every connection's cancellation token.
    pub shutdown: CancellationToken,
    /// Every upgraded session runs as a task tracked here.
    pub sessions: TaskTracker,
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/gateway", get(connection::ws_upgrade))
        .with_state(state)
}
