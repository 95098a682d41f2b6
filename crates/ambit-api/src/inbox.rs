// Inbox routes

use axum::extract::{Path, Query, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::common::{ok, ApiError, ApiResult};
use crate::state::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/inbox", get(list_inbox))
        .route("/api/inbox/:message_id/read", put(mark_read))
        .route("/api/inbox/read-all", put(mark_all_read))
        .route(
            "/api/agent-inbox/:agent_id",
            get(list_agent_inbox).post(send_agent_message),
        )
        .route(
            "/api/agent-inbox/:agent_id/:message_id/responded",
            put(mark_agent_responded),
        )
        .with_state(state)
}

#[derive(Deserialize)]
struct InboxQuery {
    user_id: String,
    #[serde(default)]
    unread_only: bool,
    #[serde(default)]
    limit: Option<i64>,
}

async fn list_inbox(State(state): State<AppState>, Query(query): Query<InboxQuery>) -> ApiResult {
    let messages = state
        .db
        .list_inbox(&query.user_id, query.unread_only, query.limit.unwrap_or(50))
        .await?;
    Ok(ok(json!(messages
        .iter()
        .map(|message| {
            json!({
                "message_id": message.message_id,
                "title": message.title,
                "content": message.content,
                "message_type": message.message_type,
                "source_type": message.source_type,
                "source_id": message.source_id,
                "event_id": message.event_id,
                "is_read": message.is_read,
                "created_at": message.created_at,
            })
        })
        .collect::<Vec<_>>())))
}

#[derive(Deserialize)]
struct UserBody {
    user_id: String,
}

async fn mark_read(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Json(body): Json<UserBody>,
) -> ApiResult {
    if !state.db.mark_inbox_read(&message_id, &body.user_id).await? {
        return Err(ApiError::not_found("message"));
    }
    Ok(ok(json!({ "message_id": message_id, "is_read": true })))
}

async fn mark_all_read(State(state): State<AppState>, Json(body): Json<UserBody>) -> ApiResult {
    let updated = state.db.mark_all_inbox_read(&body.user_id).await?;
    Ok(ok(json!({ "updated": updated })))
}

// ============================================
// Agent-to-agent inbox
// ============================================

#[derive(Deserialize)]
struct AgentInboxQuery {
    #[serde(default)]
    limit: Option<i64>,
}

async fn list_agent_inbox(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<AgentInboxQuery>,
) -> ApiResult {
    let messages = state
        .db
        .list_agent_messages(&agent_id, query.limit.unwrap_or(50))
        .await?;
    Ok(ok(json!(messages
        .iter()
        .map(|message| {
            json!({
                "message_id": message.message_id,
                "from_agent_id": message.from_agent_id,
                "title": message.title,
                "content": message.content,
                "if_response": message.if_response,
                "created_at": message.created_at,
            })
        })
        .collect::<Vec<_>>())))
}

#[derive(Deserialize)]
struct SendAgentMessageRequest {
    #[serde(default)]
    from_agent_id: Option<String>,
    title: String,
    content: String,
    source_id: String,
}

async fn send_agent_message(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(body): Json<SendAgentMessageRequest>,
) -> ApiResult {
    let message = state
        .db
        .create_agent_message(
            &agent_id,
            body.from_agent_id.as_deref(),
            &body.title,
            &body.content,
            &body.source_id,
        )
        .await?;
    Ok(ok(json!({ "message_id": message.message_id })))
}

async fn mark_agent_responded(
    State(state): State<AppState>,
    Path((_agent_id, message_id)): Path<(String, String)>,
) -> ApiResult {
    if !state.db.mark_agent_message_responded(&message_id).await? {
        return Err(ApiError::not_found("message"));
    }
    Ok(ok(json!({ "message_id": message_id, "if_response": true })))
}
