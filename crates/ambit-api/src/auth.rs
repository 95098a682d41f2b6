// Auth and agent lifecycle routes
//
// Login is a user-existence check; user creation is gated by the admin
// secret. Agent deletion runs the leaf-first cascade.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use ambit_storage::{CreateAgent, CreateUser, UpdateAgent};

use crate::common::{ok, ApiError, ApiResult};
use crate::state::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/create-user", post(create_user))
        .route("/api/auth/agents", post(create_agent).get(list_agents))
        .route(
            "/api/auth/agents/:agent_id",
            get(get_agent).put(update_agent).delete(delete_agent),
        )
        .with_state(state)
}

#[derive(Deserialize)]
struct LoginRequest {
    user_id: String,
}

async fn login(State(state): State<AppState>, Json(body): Json<LoginRequest>) -> ApiResult {
    let user = state
        .db
        .get_user(&body.user_id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("user"))?;
    state.db.touch_last_login(&user.user_id).await?;
    Ok(ok(json!({
        "user_id": user.user_id,
        "display_name": user.display_name,
        "timezone": user.timezone,
    })))
}

#[derive(Deserialize)]
struct CreateUserRequest {
    admin_secret: String,
    user_id: String,
    #[serde(default)]
    user_type: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
}

async fn create_user(
    State(state): State<AppState>,
    Json(body): Json<CreateUserRequest>,
) -> ApiResult {
    let Some(expected) = &state.admin_secret else {
        return Err(ApiError::unauthorized("user creation is disabled"));
    };
    if &body.admin_secret != expected {
        return Err(ApiError::unauthorized("invalid admin secret"));
    }
    if body.user_id.trim().is_empty() {
        return Err(ApiError::bad_request("user_id is required"));
    }

    let user = state
        .db
        .create_user(CreateUser {
            user_id: body.user_id,
            user_type: body.user_type.unwrap_or_else(|| "human".into()),
            display_name: body.display_name,
            timezone: body.timezone,
        })
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(ok(json!({ "user_id": user.user_id, "timezone": user.timezone })))
}

#[derive(Deserialize)]
struct CreateAgentRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    created_by: String,
    #[serde(default)]
    is_public: bool,
}

async fn create_agent(
    State(state): State<AppState>,
    Json(body): Json<CreateAgentRequest>,
) -> ApiResult {
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    state
        .db
        .get_user(&body.created_by)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("user"))?;

    let agent = state
        .db
        .create_agent(CreateAgent {
            name: body.name,
            description: body.description,
            created_by: body.created_by,
            is_public: body.is_public,
        })
        .await?;

    // Agent-level instances exist from the first moment
    state
        .factory
        .create_agent_level_instances(&agent.agent_id)
        .await?;

    Ok(ok(json!({
        "agent_id": agent.agent_id,
        "name": agent.name,
        "is_public": agent.is_public,
    })))
}

#[derive(Deserialize)]
struct ListAgentsQuery {
    user_id: String,
}

async fn list_agents(
    State(state): State<AppState>,
    axum::extract::Query(query): axum::extract::Query<ListAgentsQuery>,
) -> ApiResult {
    let agents = state.db.list_agents_for_user(&query.user_id).await?;
    Ok(ok(json!(agents
        .iter()
        .map(|agent| {
            json!({
                "agent_id": agent.agent_id,
                "name": agent.name,
                "description": agent.description,
                "created_by": agent.created_by,
                "is_public": agent.is_public,
            })
        })
        .collect::<Vec<_>>())))
}

async fn get_agent(State(state): State<AppState>, Path(agent_id): Path<String>) -> ApiResult {
    let agent = state
        .db
        .get_agent(&agent_id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("agent"))?;
    Ok(ok(json!({
        "agent_id": agent.agent_id,
        "name": agent.name,
        "description": agent.description,
        "created_by": agent.created_by,
        "is_public": agent.is_public,
        "created_at": agent.created_at,
    })))
}

#[derive(Deserialize)]
struct UpdateAgentRequest {
    user_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    is_public: Option<bool>,
}

async fn update_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(body): Json<UpdateAgentRequest>,
) -> ApiResult {
    let agent = state
        .db
        .get_agent(&agent_id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("agent"))?;
    if agent.created_by != body.user_id {
        return Err(ApiError::unauthorized("only the creator may modify an agent"));
    }

    let updated = state
        .db
        .update_agent(
            &agent_id,
            UpdateAgent {
                name: body.name,
                description: body.description,
                is_public: body.is_public,
            },
        )
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("agent"))?;
    Ok(ok(json!({ "agent_id": updated.agent_id, "name": updated.name })))
}

#[derive(Deserialize)]
struct DeleteAgentQuery {
    user_id: String,
}

async fn delete_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    axum::extract::Query(query): axum::extract::Query<DeleteAgentQuery>,
) -> ApiResult {
    let agent = state
        .db
        .get_agent(&agent_id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("agent"))?;
    if agent.created_by != query.user_id {
        return Err(ApiError::unauthorized("only the creator may delete an agent"));
    }

    let deleted = state.db.delete_agent_cascade(&agent_id).await?;
    if !deleted {
        return Err(ApiError::not_found("agent"));
    }
    Ok(ok(json!({ "deleted": agent_id })))
}
