// Job repository: creation, the due-job query, the atomic claim, recovery

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde_json::json;

use ambit_core::types::JobStatus;

use super::Database;
use crate::models::{CreateJob, JobRow};

const JOB_COLUMNS: &str = "job_id, instance_id, agent_id, user_id, job_type, title, \
     description, payload, trigger_config, status, process, last_run_time, next_run_time, \
     last_error, iteration_count, related_entity_id, narrative_id, monitored_job_ids, \
     notification_method, embedding, created_at, updated_at";

impl Database {
    pub async fn create_job(&self, input: CreateJob) -> Result<JobRow> {
        input
            .trigger_config
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid trigger config: {e}"))?;
        if input.trigger_config.job_type() != input.job_type {
            bail!(
                "trigger config variant does not match job_type {}",
                input.job_type
            );
        }

        let embedding = input.embedding.as_ref().map(|v| json!(v));
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            INSERT INTO instance_jobs
                (job_id, instance_id, agent_id, user_id, job_type, title, description,
                 payload, trigger_config, status, process, next_run_time,
                 related_entity_id, narrative_id, monitored_job_ids, notification_method,
                 embedding)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'active', '[]'::jsonb, $10,
                    $11, $12, '[]'::jsonb, $13, $14)
            RETURNING {JOB_COLUMNS}
            "#,
        ))
        .bind(&input.job_id)
        .bind(&input.instance_id)
        .bind(&input.agent_id)
        .bind(&input.user_id)
        .bind(input.job_type.as_str())
        .bind(&input.title)
        .bind(&input.description)
        .bind(&input.payload)
        .bind(serde_json::to_value(&input.trigger_config)?)
        .bind(input.next_run_time)
        .bind(&input.related_entity_id)
        .bind(&input.narrative_id)
        .bind(input.notification_method.as_str())
        .bind(embedding)
        .fetch_one(self.pool())
        .await?;

        Ok(row)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobRow>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM instance_jobs WHERE job_id = $1",
        ))
        .bind(job_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    /// The job controlled by an instance (unique instance_id, 1:1)
    pub async fn get_job_by_instance(&self, instance_id: &str) -> Result<Option<JobRow>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM instance_jobs WHERE instance_id = $1",
        ))
        .bind(instance_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    pub async fn list_jobs_for_user(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
    ) -> Result<Vec<JobRow>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM instance_jobs
            WHERE user_id = $1 AND ($2::text IS NULL OR agent_id = $2)
            ORDER BY created_at DESC
            "#,
        ))
        .bind(user_id)
        .bind(agent_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// Non-terminal jobs bound to a narrative (duplicate-suppression input
    /// and the decider's job_info_map)
    pub async fn get_active_jobs_by_narrative(
        &self,
        narrative_id: &str,
        limit: i64,
    ) -> Result<Vec<JobRow>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM instance_jobs
            WHERE narrative_id = $1
              AND status NOT IN ('completed', 'failed', 'cancelled')
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        ))
        .bind(narrative_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// Jobs due for execution, oldest deadline first
    pub async fn get_due_jobs(&self) -> Result<Vec<JobRow>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM instance_jobs
            WHERE status IN ('pending', 'active')
              AND next_run_time IS NOT NULL
              AND next_run_time <= NOW()
            ORDER BY next_run_time ASC
            "#,
        ))
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// Atomic execution claim. Exactly one caller sees `true` per due run;
    /// everyone else must abandon the item without side effects.
    pub async fn try_acquire_job(&self, job_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE instance_jobs
            SET status = 'running', updated_at = NOW()
            WHERE job_id = $1 AND status IN ('pending', 'active')
            "#,
        )
        .bind(job_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Startup recovery: every `running` job belonged to a dead process
    pub async fn recover_all_running_jobs(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE instance_jobs SET status = 'active', updated_at = NOW() WHERE status = 'running'",
        )
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Sweep jobs stuck in `running` past the execution timeout
    pub async fn recover_stuck_jobs(&self, timeout_minutes: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE instance_jobs
            SET status = 'active', updated_at = NOW()
            WHERE status = 'running'
              AND updated_at < NOW() - ($1 * INTERVAL '1 minute')
            "#,
        )
        .bind(timeout_minutes)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn update_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE instance_jobs
            SET status = $2,
                last_error = COALESCE($3, last_error),
                updated_at = NOW()
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Post-run bookkeeping applied in one statement
    pub async fn finalize_job_run(
        &self,
        job_id: &str,
        status: JobStatus,
        next_run_time: Option<DateTime<Utc>>,
        last_run_time: DateTime<Utc>,
        iteration_count: i32,
        last_error: Option<&str>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE instance_jobs
            SET status = $2,
                next_run_time = $3,
                last_run_time = $4,
                iteration_count = $5,
                last_error = $6,
                updated_at = NOW()
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(next_run_time)
        .bind(last_run_time)
        .bind(iteration_count)
        .bind(last_error)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Record that a run happened without touching status or schedule
    /// (those belong to the interpretation hook when it succeeded)
    pub async fn record_job_run(
        &self,
        job_id: &str,
        last_run_time: DateTime<Utc>,
        iteration_count: i32,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE instance_jobs
            SET last_run_time = $2, iteration_count = $3, updated_at = NOW()
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(last_run_time)
        .bind(iteration_count)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Make a newly-unblocked job immediately due
    pub async fn set_job_due_now(&self, instance_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE instance_jobs
            SET next_run_time = NOW(), status = 'active', updated_at = NOW()
            WHERE instance_id = $1 AND status NOT IN ('completed', 'failed', 'cancelled', 'paused')
            "#,
        )
        .bind(instance_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Append one short note (an event id or progress marker) to process[]
    pub async fn append_job_process(&self, job_id: &str, note: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE instance_jobs
            SET process = process || $2::jsonb, updated_at = NOW()
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(json!([note]))
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Creator-only transitions (pause / cancel). `related_entity_id` grants
    /// execution identity, never authority.
    pub async fn transition_job_by_creator(
        &self,
        job_id: &str,
        user_id: &str,
        status: JobStatus,
    ) -> Result<JobRow> {
        if !matches!(status, JobStatus::Paused | JobStatus::Cancelled) {
            bail!("creator transitions are limited to paused and cancelled");
        }
        let job = self
            .get_job(job_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("job not found"))?;
        if job.user_id != user_id {
            bail!("only the creator may modify this job");
        }

        let next_run: Option<DateTime<Utc>> = None;
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE instance_jobs
            SET status = $2,
                next_run_time = CASE WHEN $2 = 'cancelled' THEN $3 ELSE next_run_time END,
                updated_at = NOW()
            WHERE job_id = $1
            RETURNING {JOB_COLUMNS}
            "#,
        ))
        .bind(job_id)
        .bind(status.as_str())
        .bind(next_run)
        .fetch_one(self.pool())
        .await?;

        Ok(row)
    }

    /// Insert a job-module instance, its job record and the optional
    /// narrative link inside one transaction.
    pub async fn create_job_with_instance(
        &self,
        instance: crate::models::CreateModuleInstance,
        job: CreateJob,
        narrative_id: Option<&str>,
    ) -> Result<JobRow> {
        job.trigger_config
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid trigger config: {e}"))?;

        let mut tx = self.store().transaction().await?;

        // A blocked instance's job starts pending; the dependency resolver
        // flips it to active with an immediate next_run_time
        let job_status = if instance.status == ambit_core::types::InstanceStatus::Blocked {
            "pending"
        } else {
            "active"
        };

        let embedding = instance.routing_embedding.as_ref().map(|v| json!(v));
        sqlx::query(
            r#"
            INSERT INTO module_instances
                (instance_id, module_class, agent_id, user_id, is_public, status,
                 description, dependencies, config, state, keywords, topic_hint,
                 routing_embedding, last_polled_status, callback_processed)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $6, FALSE)
            "#,
        )
        .bind(&instance.instance_id)
        .bind(instance.module_class.as_str())
        .bind(&instance.agent_id)
        .bind(&instance.user_id)
        .bind(instance.is_public)
        .bind(instance.status.as_str())
        .bind(&instance.description)
        .bind(json!(instance.dependencies))
        .bind(&instance.config)
        .bind(&instance.state)
        .bind(json!(instance.keywords))
        .bind(&instance.topic_hint)
        .bind(embedding)
        .execute(&mut *tx)
        .await?;

        let job_embedding = job.embedding.as_ref().map(|v| json!(v));
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            INSERT INTO instance_jobs
                (job_id, instance_id, agent_id, user_id, job_type, title, description,
                 payload, trigger_config, status, process, next_run_time,
                 related_entity_id, narrative_id, monitored_job_ids, notification_method,
                 embedding)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, '[]'::jsonb, $11,
                    $12, $13, '[]'::jsonb, $14, $15)
            RETURNING {JOB_COLUMNS}
            "#,
        ))
        .bind(&job.job_id)
        .bind(&job.instance_id)
        .bind(&job.agent_id)
        .bind(&job.user_id)
        .bind(job.job_type.as_str())
        .bind(&job.title)
        .bind(&job.description)
        .bind(&job.payload)
        .bind(serde_json::to_value(&job.trigger_config)?)
        .bind(job_status)
        .bind(job.next_run_time)
        .bind(&job.related_entity_id)
        .bind(&job.narrative_id)
        .bind(job.notification_method.as_str())
        .bind(job_embedding)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(narrative_id) = narrative_id {
            sqlx::query(
                r#"
                INSERT INTO instance_narrative_links (instance_id, narrative_id, link_type)
                VALUES ($1, $2, 'active')
                ON CONFLICT (instance_id, narrative_id) DO NOTHING
                "#,
            )
            .bind(&instance.instance_id)
            .bind(narrative_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(row)
    }

    /// Semantic scan over job embeddings
    pub async fn search_jobs_semantic(
        &self,
        agent_id: &str,
        query_vec: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<(JobRow, f32)>> {
        let scored = self
            .store()
            .semantic_search(
                "instance_jobs",
                "embedding",
                query_vec,
                &[("agent_id", agent_id.into())],
                limit,
                min_similarity,
            )
            .await?;

        let ids: Vec<String> = scored
            .iter()
            .filter_map(|(row, _)| row.get("job_id").and_then(|v| v.as_str()).map(String::from))
            .collect();
        let mut out = Vec::with_capacity(ids.len());
        for (id, (_, score)) in ids.iter().zip(scored.iter()) {
            if let Some(job) = self.get_job(id).await? {
                out.push((job, *score));
            }
        }
        Ok(out)
    }
}
