mod config;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use courier_api::ApiState;
use courier_db::Database;
use courier_gateway::auth::{Authenticator, JwtAuthenticator};
use courier_gateway::store::SqliteStore;
use courier_gateway::{GatewayConfig, GatewayState};

use config::Config;

const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?.with_call_timeout(config.db_timeout));

    // Shared state
    let auth: Arc<dyn Authenticator> = Arc::new(JwtAuthenticator::new(&config.jwt_secret));
    let shutdown = CancellationToken::new();
    let sessions = TaskTracker::new();

    let gateway_state = GatewayState {
        store: Arc::new(SqliteStore::new(db.clone())),
        auth: auth.clone(),
        config: GatewayConfig {
            poll_interval: config.poll_interval,
            ..GatewayConfig::default()
        },
        shutdown: shutdown.clone(),
        sessions: sessions.clone(),
    };

    let api_state = ApiState {
        db,
        auth,
        page_size: config.page_size,
    };

    let app = Router::new()
        .merge(courier_api::routes(api_state))
        .merge(courier_gateway::router(gateway_state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!(
        "Courier server listening on {} (poll every {} ms)",
        addr,
        config.poll_interval.as_millis()
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    // Upgraded sockets outlive `serve`; let each session send its Close frame.
    sessions.close();
    if tokio::time::timeout(SESSION_DRAIN_TIMEOUT, sessions.wait()).await.is_err() {
        warn!("{} gateway session(s) still open at exit", sessions.len());
    }

    info!("Courier server stopped");
    Ok(())
}

/// Resolves on ctrl-c after cancelling every gateway session.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for ctrl-c, running until killed: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, closing gateway sessions");
    shutdown.cancel();
}
