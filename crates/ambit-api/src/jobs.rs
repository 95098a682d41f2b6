// Job routes: listing, cancellation and batch creation with a dependency
// graph (the complex endpoint drives the same sync pass as a user turn)

use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use ambit_core::plan::{PlannedInstance, PlannedJobConfig};
use ambit_core::types::{InstanceStatus, JobStatus, ModuleClass};
use ambit_storage::JobRow;
use ambit_worker::InstanceSync;

use crate::common::{ok, ApiError, ApiResult};
use crate::state::AppState;

#[derive(Clone)]
pub struct JobsState {
    pub app: AppState,
    pub sync: InstanceSync,
}

pub fn routes(state: JobsState) -> Router {
    Router::new()
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/complex", post(create_complex))
        .route("/api/jobs/search", get(search_jobs))
        .route("/api/jobs/:job_id", get(get_job))
        .route("/api/jobs/:job_id/cancel", put(cancel_job))
        .with_state(state)
}

fn job_json(job: &JobRow) -> serde_json::Value {
    json!({
        "job_id": job.job_id,
        "instance_id": job.instance_id,
        "agent_id": job.agent_id,
        "user_id": job.user_id,
        "job_type": job.job_type,
        "title": job.title,
        "description": job.description,
        "status": job.status,
        "trigger_config": job.trigger_config,
        "last_run_time": job.last_run_time,
        "next_run_time": job.next_run_time,
        "iteration_count": job.iteration_count,
        "last_error": job.last_error,
        "related_entity_id": job.related_entity_id,
        "narrative_id": job.narrative_id,
        "process": job.process,
        "created_at": job.created_at,
    })
}

#[derive(Deserialize)]
struct ListJobsQuery {
    user_id: String,
    #[serde(default)]
    agent_id: Option<String>,
}

async fn list_jobs(
    State(state): State<JobsState>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult {
    let jobs = state
        .app
        .db
        .list_jobs_for_user(&query.user_id, query.agent_id.as_deref())
        .await?;
    Ok(ok(json!(jobs.iter().map(job_json).collect::<Vec<_>>())))
}

#[derive(Deserialize)]
struct SearchJobsQuery {
    agent_id: String,
    q: String,
    #[serde(default)]
    limit: Option<usize>,
}

/// Semantic retrieval over job embeddings
async fn search_jobs(
    State(state): State<JobsState>,
    Query(query): Query<SearchJobsQuery>,
) -> ApiResult {
    let query_vec = state
        .app
        .llm
        .embed(&query.q)
        .await
        .map_err(ApiError::from)?;
    let scored = state
        .app
        .db
        .search_jobs_semantic(&query.agent_id, &query_vec, query.limit.unwrap_or(10), 0.3)
        .await?;
    Ok(ok(json!(scored
        .iter()
        .map(|(job, score)| {
            let mut value = job_json(job);
            value["score"] = json!(score);
            value
        })
        .collect::<Vec<_>>())))
}

async fn get_job(State(state): State<JobsState>, Path(job_id): Path<String>) -> ApiResult {
    let job = state
        .app
        .db
        .get_job(&job_id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("job"))?;
    Ok(ok(job_json(&job)))
}

#[derive(Deserialize)]
struct CancelRequest {
    user_id: String,
}

async fn cancel_job(
    State(state): State<JobsState>,
    Path(job_id): Path<String>,
    Json(body): Json<CancelRequest>,
) -> ApiResult {
    let job = state
        .app
        .db
        .transition_job_by_creator(&job_id, &body.user_id, JobStatus::Cancelled)
        .await
        .map_err(|e| ApiError::unauthorized(e.to_string()))?;
    state
        .app
        .db
        .update_instance_status(&job.instance_id, InstanceStatus::Cancelled)
        .await?;
    Ok(ok(job_json(&job)))
}

// ============================================
// Batch creation with a dependency graph
// ============================================

#[derive(Deserialize)]
struct ComplexJobSpec {
    task_key: String,
    title: String,
    payload: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    cron: Option<String>,
    #[serde(default)]
    interval_seconds: Option<i64>,
    #[serde(default)]
    scheduled_at: Option<String>,
    #[serde(default)]
    end_condition: Option<String>,
    #[serde(default)]
    max_iterations: Option<i32>,
    #[serde(default)]
    related_entity_id: Option<String>,
}

#[derive(Deserialize)]
struct ComplexRequest {
    agent_id: String,
    user_id: String,
    #[serde(default)]
    narrative_id: Option<String>,
    jobs: Vec<ComplexJobSpec>,
}

async fn create_complex(
    State(state): State<JobsState>,
    Json(body): Json<ComplexRequest>,
) -> ApiResult {
    if body.jobs.is_empty() {
        return Err(ApiError::bad_request("jobs must not be empty"));
    }

    let instances: Vec<PlannedInstance> = body
        .jobs
        .into_iter()
        .map(|spec| PlannedInstance {
            task_key: spec.task_key,
            instance_id: None,
            module_class: ModuleClass::Job,
            description: spec.description.unwrap_or_else(|| spec.title.clone()),
            status: InstanceStatus::Active,
            depends_on: spec.depends_on,
            dependencies: Vec::new(),
            job_config: Some(PlannedJobConfig {
                title: spec.title,
                payload: spec.payload,
                cron: spec.cron,
                interval_seconds: spec.interval_seconds,
                scheduled_at: spec.scheduled_at,
                end_condition: spec.end_condition,
                max_iterations: spec.max_iterations,
                related_entity_id: spec.related_entity_id,
            }),
            is_existing: false,
            similar_match: false,
            existing_job_id: None,
        })
        .collect();

    let outcome = state
        .sync
        .process(
            instances,
            &body.agent_id,
            &body.user_id,
            body.narrative_id.as_deref(),
        )
        .await
        .map_err(ApiError::from)?;

    Ok(ok(json!({
        "created_job_ids": outcome.created_job_ids,
        "key_to_id": outcome.key_to_id,
        "instances": outcome.instances,
    })))
}
