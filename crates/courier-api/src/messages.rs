use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::Utc;
use tracing::debug;

use courier_types::ChatError;
use courier_types::api::{
    Envelope, HistoryQuery, HistoryResponse, SendMessageRequest, SendMessageResponse,
};

use crate::ApiState;
use crate::error::ApiResult;
use crate::middleware::AuthUser;

/// GET /messages?peer_id=N&page=N
pub async fn get_messages(
    State(state): State<ApiState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Json<Envelope<HistoryResponse>>> {
    let Query(HistoryQuery { peer_id, page }) = query?;
    if peer_id == user_id {
        return Err(ChatError::invalid("cannot read a conversation with yourself").into());
    }
    let page_size = state.page_size;

    let messages = state
        .db
        .call(move |db| {
            if !db.user_exists(peer_id)? {
                return Err(ChatError::not_found(format!("user {} does not exist", peer_id)));
            }
            db.list_between(user_id, peer_id, page, page_size)
        })
        .await?;

    Ok(Json(Envelope::ok(HistoryResponse { page, messages })))
}

/// POST /messages
pub async fn send_message(
    State(state): State<ApiState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(SendMessageRequest { peer_id, body }) = payload?;
    body.validate()?;

    // First exchange creates the conversation.
    let message = state
        .db
        .call(move |db| {
            db.resolve_conversation(user_id, peer_id)?;
            db.append_message(user_id, peer_id, &body, Utc::now())
        })
        .await?;

    debug!("User {} stored message {} for {} via REST", user_id, message.id, peer_id);

    let response = SendMessageResponse {
        id: message.id,
        created_at: message.created_at,
    };
    Ok((StatusCode::CREATED, Json(Envelope::created(response))))
}
