// MCP endpoint management routes

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use ambit_storage::{CreateMcpUrl, McpUrlRow};
use ambit_worker::mcp::validate_endpoint;

use crate::common::{ok, ApiError, ApiResult};
use crate::state::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/agents/:agent_id/mcps",
            get(list_mcps).post(create_mcp),
        )
        .route(
            "/api/agents/:agent_id/mcps/:mcp_id",
            axum::routing::put(update_mcp).delete(delete_mcp),
        )
        .route(
            "/api/agents/:agent_id/mcps/:mcp_id/validate",
            post(validate_one),
        )
        .route(
            "/api/agents/:agent_id/mcps/validate-all",
            post(validate_all),
        )
        .with_state(state)
}

fn mcp_json(row: &McpUrlRow) -> serde_json::Value {
    json!({
        "mcp_id": row.mcp_id,
        "name": row.name,
        "url": row.url,
        "description": row.description,
        "is_enabled": row.is_enabled,
        "connection_status": row.connection_status,
        "last_check_time": row.last_check_time,
        "last_error": row.last_error,
    })
}

#[derive(Deserialize)]
struct UserQuery {
    user_id: String,
}

async fn list_mcps(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<UserQuery>,
) -> ApiResult {
    let rows = state
        .db
        .list_mcp_urls(&agent_id, &query.user_id, false)
        .await?;
    Ok(ok(json!(rows.iter().map(mcp_json).collect::<Vec<_>>())))
}

#[derive(Deserialize)]
struct CreateMcpRequest {
    user_id: String,
    name: String,
    url: String,
    #[serde(default)]
    description: Option<String>,
}

async fn create_mcp(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(body): Json<CreateMcpRequest>,
) -> ApiResult {
    if body.name.trim().is_empty() || body.url.trim().is_empty() {
        return Err(ApiError::bad_request("name and url are required"));
    }
    let row = state
        .db
        .create_mcp_url(CreateMcpUrl {
            agent_id,
            user_id: body.user_id,
            name: body.name,
            url: body.url,
            description: body.description,
        })
        .await?;
    Ok(ok(mcp_json(&row)))
}

#[derive(Deserialize)]
struct UpdateMcpRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    is_enabled: Option<bool>,
}

async fn update_mcp(
    State(state): State<AppState>,
    Path((_agent_id, mcp_id)): Path<(String, String)>,
    Json(body): Json<UpdateMcpRequest>,
) -> ApiResult {
    let row = state
        .db
        .update_mcp_url(
            &mcp_id,
            body.name.as_deref(),
            body.url.as_deref(),
            body.description.as_deref(),
            body.is_enabled,
        )
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("mcp"))?;
    Ok(ok(mcp_json(&row)))
}

async fn delete_mcp(
    State(state): State<AppState>,
    Path((_agent_id, mcp_id)): Path<(String, String)>,
) -> ApiResult {
    if !state.db.delete_mcp_url(&mcp_id).await? {
        return Err(ApiError::not_found("mcp"));
    }
    Ok(ok(json!({ "deleted": mcp_id })))
}

async fn validate_one(
    State(state): State<AppState>,
    Path((_agent_id, mcp_id)): Path<(String, String)>,
) -> ApiResult {
    let row = state
        .db
        .get_mcp_url(&mcp_id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("mcp"))?;

    let checked = check_and_record(&state, &row).await?;
    Ok(ok(mcp_json(&checked)))
}

async fn validate_all(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<UserQuery>,
) -> ApiResult {
    let rows = state
        .db
        .list_mcp_urls(&agent_id, &query.user_id, true)
        .await?;
    let mut results = Vec::with_capacity(rows.len());
    for row in &rows {
        results.push(mcp_json(&check_and_record(&state, row).await?));
    }
    Ok(ok(json!(results)))
}

async fn check_and_record(state: &AppState, row: &McpUrlRow) -> Result<McpUrlRow, ApiError> {
    let (status, error) = match validate_endpoint(&row.url).await {
        Ok(()) => ("connected", None),
        Err(e) => ("failed", Some(e)),
    };
    state
        .db
        .record_mcp_check(&row.mcp_id, status, error.as_deref())
        .await?;
    state
        .db
        .get_mcp_url(&row.mcp_id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("mcp"))
}
