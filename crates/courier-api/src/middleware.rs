use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use courier_gateway::auth::bearer_token;
use courier_types::{ChatError, UserId};

use crate::ApiState;
use crate::error::ApiResult;

/// The authenticated caller, inserted into request extensions by `require_auth`.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

/// Verify the `Authorization: Bearer` credential before any handler runs.
pub async fn require_auth(
    State(state): State<ApiState>,
    mut req: Request,
    next: Next,
) -> ApiResult<Response> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_owned)
        .ok_or_else(|| ChatError::Auth("missing bearer token".into()))?;

    let user_id = state.auth.verify(&token).await?;

    req.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(req).await)
}
