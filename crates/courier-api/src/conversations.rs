use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::{Extension, Json};

use courier_db::inbox::InboxSnapshot;
use courier_types::api::{
    ConversationListResponse, ConversationView, Envelope, PageQuery, PeerView,
};

use crate::ApiState;
use crate::error::ApiResult;
use crate::middleware::AuthUser;

/// GET /conversations?page=N
pub async fn list_conversations(
    State(state): State<ApiState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> ApiResult<Json<Envelope<ConversationListResponse>>> {
    let Query(PageQuery { page }) = query?;
    let page_size = state.page_size;

    let snapshot = state
        .db
        .call(move |db| db.inbox_snapshot(user_id, page, page_size))
        .await?;

    Ok(Json(Envelope::ok(build_list(snapshot, page))))
}

fn build_list(snapshot: InboxSnapshot, page: i64) -> ConversationListResponse {
    let InboxSnapshot {
        page: inbox,
        mut profiles,
        unread,
    } = snapshot;

    let conversations = inbox
        .rows
        .into_iter()
        .map(|row| ConversationView {
            peer: profiles
                .remove(&row.peer_id)
                .map(PeerView::from)
                .unwrap_or_else(|| PeerView::unknown(row.peer_id)),
            conversation_id: row.conversation_id,
            unread: unread.get(&row.peer_id).copied().unwrap_or(0),
            last_message: row.last_message,
        })
        .collect();

    ConversationListResponse {
        total: inbox.total,
        page,
        conversations,
    }
}
