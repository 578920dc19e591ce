pub mod conversations;
pub mod error;
pub mod messages;
pub mod middleware;

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use courier_db::Database;
use courier_gateway::auth::Authenticator;

pub use error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<Database>,
    pub auth: Arc<dyn Authenticator>,
    /// Rows per page for history and the conversation list.
    pub page_size: u32,
}

pub fn routes(state: ApiState) -> Router {
    let protected = Router::new()
        .route("/conversations", get(conversations::list_conversations))
        .route(
            "/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state);

    Router::new().route("/health", get(health)).merge(protected)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
