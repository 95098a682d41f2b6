// Per-agent resource routes: awareness, social network, chat history,
// workspace files

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use ambit_core::ids::generate_instance_id;
use ambit_core::types::ModuleClass;
use ambit_storage::MemoryScope;

use crate::common::{ok, ApiError, ApiResult};
use crate::state::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/agents/:agent_id/awareness",
            get(get_awareness).put(put_awareness),
        )
        .route("/api/agents/:agent_id/social-network", get(social_network))
        .route(
            "/api/agents/:agent_id/social-network/search",
            get(social_search),
        )
        .route(
            "/api/agents/:agent_id/social-network/:user_id",
            get(social_entity),
        )
        .route("/api/agents/:agent_id/chat-history", get(chat_history))
        .route(
            "/api/agents/:agent_id/simple-chat-history",
            get(simple_chat_history),
        )
        .route(
            "/api/agents/:agent_id/files",
            get(list_files).post(write_file).delete(delete_file),
        )
        .with_state(state)
}

// ============================================
// Awareness
// ============================================

async fn get_awareness(State(state): State<AppState>, Path(agent_id): Path<String>) -> ApiResult {
    ensure_agent(&state, &agent_id).await?;
    if let Some(row) = state.db.get_awareness(&agent_id).await? {
        return Ok(ok(json!({ "awareness": row.awareness })));
    }

    // Autocreate: the awareness instance and an empty row
    let instances = state
        .db
        .get_instances_by_agent(&agent_id, Some(ModuleClass::Awareness), Some(true))
        .await?;
    let instance_id = match instances.into_iter().next() {
        Some(row) => row.instance_id,
        None => {
            state.factory.create_agent_level_instances(&agent_id).await?;
            state
                .db
                .get_instances_by_agent(&agent_id, Some(ModuleClass::Awareness), Some(true))
                .await?
                .into_iter()
                .next()
                .map(|row| row.instance_id)
                .unwrap_or_else(|| generate_instance_id(ModuleClass::Awareness))
        }
    };
    let row = state.db.upsert_awareness(&instance_id, &agent_id, "").await?;
    Ok(ok(json!({ "awareness": row.awareness })))
}

#[derive(Deserialize)]
struct PutAwarenessRequest {
    awareness: String,
}

async fn put_awareness(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(body): Json<PutAwarenessRequest>,
) -> ApiResult {
    ensure_agent(&state, &agent_id).await?;
    let instances = state
        .db
        .get_instances_by_agent(&agent_id, Some(ModuleClass::Awareness), Some(true))
        .await?;
    let instance_id = match instances.into_iter().next() {
        Some(row) => row.instance_id,
        None => {
            state.factory.create_agent_level_instances(&agent_id).await?;
            state
                .db
                .get_instances_by_agent(&agent_id, Some(ModuleClass::Awareness), Some(true))
                .await?
                .into_iter()
                .next()
                .map(|row| row.instance_id)
                .ok_or_else(|| ApiError::internal("awareness instance creation failed"))?
        }
    };
    let row = state
        .db
        .upsert_awareness(&instance_id, &agent_id, &body.awareness)
        .await?;
    Ok(ok(json!({ "awareness": row.awareness })))
}

// ============================================
// Social network
// ============================================

#[derive(Deserialize)]
struct SocialQuery {
    #[serde(default)]
    limit: Option<i64>,
}

async fn social_network(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<SocialQuery>,
) -> ApiResult {
    let Some(instance_id) = social_instance_id(&state, &agent_id).await? else {
        return Ok(ok(json!([])));
    };
    let entities = state
        .db
        .list_social_entities(&instance_id, query.limit.unwrap_or(50))
        .await?;
    Ok(ok(entities_json(&entities)))
}

#[derive(Deserialize)]
struct SocialSearchQuery {
    q: String,
    #[serde(default)]
    limit: Option<i64>,
}

/// Substring matches first, then semantic hits over entity embeddings for
/// anything the text scan missed. Embedding failures degrade to text-only.
async fn social_search(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<SocialSearchQuery>,
) -> ApiResult {
    let Some(instance_id) = social_instance_id(&state, &agent_id).await? else {
        return Ok(ok(json!([])));
    };
    let limit = query.limit.unwrap_or(20);
    let mut entities = state
        .db
        .search_social_entities(&instance_id, &query.q, limit)
        .await?;

    match state.llm.embed(&query.q).await {
        Ok(query_vec) => {
            let semantic = state
                .db
                .search_social_entities_semantic(&instance_id, &query_vec, limit as usize, 0.3)
                .await?;
            for (entity, _) in semantic {
                if !entities.iter().any(|e| e.entity_id == entity.entity_id) {
                    entities.push(entity);
                }
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, "Query embedding failed, text search only");
        }
    }
    entities.truncate(limit as usize);
    Ok(ok(entities_json(&entities)))
}

async fn social_entity(
    State(state): State<AppState>,
    Path((agent_id, user_id)): Path<(String, String)>,
) -> ApiResult {
    let Some(instance_id) = social_instance_id(&state, &agent_id).await? else {
        return Err(ApiError::not_found("entity"));
    };
    let entity = state
        .db
        .get_social_entity(&instance_id, &user_id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("entity"))?;
    Ok(ok(entities_json(&[entity])))
}

async fn social_instance_id(
    state: &AppState,
    agent_id: &str,
) -> Result<Option<String>, ApiError> {
    ensure_agent(state, agent_id).await?;
    let instances = state
        .db
        .get_instances_by_agent(agent_id, Some(ModuleClass::SocialNetwork), None)
        .await?;
    Ok(instances.into_iter().next().map(|row| row.instance_id))
}

fn entities_json(entities: &[ambit_storage::SocialEntityRow]) -> Value {
    json!(entities
        .iter()
        .map(|entity| {
            json!({
                "entity_id": entity.entity_id,
                "entity_name": entity.entity_name,
                "entity_type": entity.entity_type,
                "entity_description": entity.entity_description,
                "tags": entity.tag_list(),
                "relationship_strength": entity.relationship_strength,
                "interaction_count": entity.interaction_count,
                "related_job_ids": entity.related_jobs(),
            })
        })
        .collect::<Vec<_>>())
}

// ============================================
// Chat history
// ============================================

#[derive(Deserialize)]
struct ChatHistoryQuery {
    user_id: String,
    #[serde(default)]
    limit: Option<i64>,
}

/// Joined narratives -> events feed for one user
async fn chat_history(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<ChatHistoryQuery>,
) -> ApiResult {
    ensure_agent(&state, &agent_id).await?;
    let Some(narrative) = state
        .db
        .find_narrative_by_actor(&agent_id, &query.user_id)
        .await?
    else {
        return Ok(ok(json!({ "narrative_id": null, "events": [] })));
    };

    let events = state
        .db
        .list_events_for_narrative(&narrative.narrative_id, query.limit.unwrap_or(100))
        .await?;
    Ok(ok(json!({
        "narrative_id": narrative.narrative_id,
        "events": events
            .iter()
            .map(|event| {
                json!({
                    "event_id": event.event_id,
                    "trigger": event.trigger,
                    "trigger_source": event.trigger_source,
                    "final_output": event.final_output,
                    "created_at": event.created_at,
                })
            })
            .collect::<Vec<_>>(),
    })))
}

#[derive(Deserialize)]
struct SimpleChatHistoryQuery {
    user_id: String,
    #[serde(default)]
    limit: Option<usize>,
}

/// Cross-narrative message feed from the chat instances' JSON memory (the
/// short-term memory source), most recent first
async fn simple_chat_history(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<SimpleChatHistoryQuery>,
) -> ApiResult {
    ensure_agent(&state, &agent_id).await?;
    let instances = state
        .db
        .get_instances_by_agent(&agent_id, Some(ModuleClass::Chat), None)
        .await?;

    let mut messages: Vec<Value> = Vec::new();
    for row in instances {
        if row.user_id.as_deref() != Some(query.user_id.as_str()) {
            continue;
        }
        if let Some(Value::Array(items)) = state
            .db
            .get_memory(MemoryScope::Instance, "chat", &row.instance_id)
            .await?
        {
            for item in items {
                let mut tagged = item;
                if let Some(object) = tagged.as_object_mut() {
                    object.insert("instance_id".into(), json!(row.instance_id));
                }
                messages.push(tagged);
            }
        }
    }
    messages.reverse();
    messages.truncate(query.limit.unwrap_or(50));
    Ok(ok(json!(messages)))
}

// ============================================
// Workspace files
// ============================================

#[derive(Deserialize)]
struct FileQuery {
    user_id: String,
    #[serde(default)]
    path: Option<String>,
}

/// Workspace root for an (agent, user) pair
fn workspace_dir(state: &AppState, agent_id: &str, user_id: &str) -> std::path::PathBuf {
    state
        .base_working_path
        .join(format!("{agent_id}_{user_id}"))
}

/// Reject traversal: the resolved path must stay inside the workspace
fn safe_join(
    root: &std::path::Path,
    relative: &str,
) -> Result<std::path::PathBuf, ApiError> {
    if relative.contains("..") || relative.starts_with('/') || relative.starts_with('\\') {
        return Err(ApiError::bad_request("invalid path"));
    }
    Ok(root.join(relative))
}

async fn list_files(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<FileQuery>,
) -> ApiResult {
    ensure_agent(&state, &agent_id).await?;
    let dir = workspace_dir(&state, &agent_id, &query.user_id);
    let mut entries = Vec::new();
    let mut reader = match tokio::fs::read_dir(&dir).await {
        Ok(reader) => reader,
        Err(_) => return Ok(ok(json!([]))),
    };
    while let Ok(Some(entry)) = reader.next_entry().await {
        let metadata = entry.metadata().await.ok();
        entries.push(json!({
            "name": entry.file_name().to_string_lossy(),
            "is_dir": metadata.as_ref().map(|m| m.is_dir()).unwrap_or(false),
            "size": metadata.map(|m| m.len()).unwrap_or(0),
        }));
    }
    Ok(ok(json!(entries)))
}

#[derive(Deserialize)]
struct WriteFileRequest {
    user_id: String,
    path: String,
    content: String,
}

async fn write_file(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(body): Json<WriteFileRequest>,
) -> ApiResult {
    ensure_agent(&state, &agent_id).await?;
    let root = workspace_dir(&state, &agent_id, &body.user_id);
    let target = safe_join(&root, &body.path)?;
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
    }
    tokio::fs::write(&target, body.content.as_bytes())
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(ok(json!({ "path": body.path })))
}

async fn delete_file(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<FileQuery>,
) -> ApiResult {
    ensure_agent(&state, &agent_id).await?;
    let Some(path) = query.path else {
        return Err(ApiError::bad_request("path is required"));
    };
    let root = workspace_dir(&state, &agent_id, &query.user_id);
    let target = safe_join(&root, &path)?;
    tokio::fs::remove_file(&target)
        .await
        .map_err(|_| ApiError::not_found("file"))?;
    Ok(ok(json!({ "deleted": path })))
}

async fn ensure_agent(state: &AppState, agent_id: &str) -> Result<(), ApiError> {
    state
        .db
        .get_agent(agent_id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("agent"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_traversal_is_rejected() {
        let root = std::path::Path::new("/data/agent_1_user_1");
        assert!(safe_join(root, "notes/todo.md").is_ok());
        assert!(safe_join(root, "../other_user/secret").is_err());
        assert!(safe_join(root, "/etc/passwd").is_err());
        assert!(safe_join(root, "a/../../b").is_err());
    }
}
