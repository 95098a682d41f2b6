// Module instance and narrative-link repositories

use anyhow::Result;
use serde_json::json;

use ambit_core::types::{InstanceStatus, LinkType, ModuleClass};

use super::Database;
use crate::models::{CreateModuleInstance, InstanceLinkRow, ModuleInstanceRow};

const INSTANCE_COLUMNS: &str = "instance_id, module_class, agent_id, user_id, is_public, \
     status, description, dependencies, config, state, keywords, topic_hint, \
     routing_embedding, last_polled_status, callback_processed, created_at, updated_at, \
     last_used_at, completed_at";

/// A completed instance the poller must resolve, with its active narrative
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CompletedInstanceInfo {
    pub instance_id: String,
    pub narrative_id: String,
    pub agent_id: String,
    pub user_id: Option<String>,
    pub module_class: String,
    pub status: String,
}

impl Database {
    // ============================================
    // Module instances
    // ============================================

    pub async fn create_instance(&self, input: CreateModuleInstance) -> Result<ModuleInstanceRow> {
        let embedding = input
            .routing_embedding
            .as_ref()
            .map(|v| json!(v));
        let row = sqlx::query_as::<_, ModuleInstanceRow>(&format!(
            r#"
            INSERT INTO module_instances
                (instance_id, module_class, agent_id, user_id, is_public, status,
                 description, dependencies, config, state, keywords, topic_hint,
                 routing_embedding, last_polled_status, callback_processed)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $6, FALSE)
            RETURNING {INSTANCE_COLUMNS}
            "#,
        ))
        .bind(&input.instance_id)
        .bind(input.module_class.as_str())
        .bind(&input.agent_id)
        .bind(&input.user_id)
        .bind(input.is_public)
        .bind(input.status.as_str())
        .bind(&input.description)
        .bind(json!(input.dependencies))
        .bind(&input.config)
        .bind(&input.state)
        .bind(json!(input.keywords))
        .bind(&input.topic_hint)
        .bind(embedding)
        .fetch_one(self.pool())
        .await?;

        Ok(row)
    }

    pub async fn get_instance(&self, instance_id: &str) -> Result<Option<ModuleInstanceRow>> {
        let row = sqlx::query_as::<_, ModuleInstanceRow>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM module_instances WHERE instance_id = $1",
        ))
        .bind(instance_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    /// Batch instance lookup preserving request order (single IN-query)
    pub async fn get_instances_by_ids(
        &self,
        ids: &[String],
    ) -> Result<Vec<Option<ModuleInstanceRow>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, ModuleInstanceRow>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM module_instances WHERE instance_id = ANY($1)",
        ))
        .bind(ids)
        .fetch_all(self.pool())
        .await?;

        let mut by_id: std::collections::HashMap<String, ModuleInstanceRow> = rows
            .into_iter()
            .map(|r| (r.instance_id.clone(), r))
            .collect();
        Ok(ids.iter().map(|id| by_id.remove(id)).collect())
    }

    pub async fn get_instances_by_agent(
        &self,
        agent_id: &str,
        module_class: Option<ModuleClass>,
        is_public: Option<bool>,
    ) -> Result<Vec<ModuleInstanceRow>> {
        let rows = sqlx::query_as::<_, ModuleInstanceRow>(&format!(
            r#"
            SELECT {INSTANCE_COLUMNS}
            FROM module_instances
            WHERE agent_id = $1
              AND ($2::text IS NULL OR module_class = $2)
              AND ($3::bool IS NULL OR is_public = $3)
            ORDER BY created_at ASC
            "#,
        ))
        .bind(agent_id)
        .bind(module_class.map(|c| c.as_str()))
        .bind(is_public)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// All public (agent-level) instances of an agent
    pub async fn get_public_instances(&self, agent_id: &str) -> Result<Vec<ModuleInstanceRow>> {
        self.get_instances_by_agent(agent_id, None, Some(true)).await
    }

    pub async fn update_instance_status(
        &self,
        instance_id: &str,
        status: InstanceStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE module_instances SET status = $2, updated_at = NOW() WHERE instance_id = $1",
        )
        .bind(instance_id)
        .bind(status.as_str())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Arm the instance for a background run: in_progress on both status
    /// mirrors, callback flag cleared.
    pub async fn mark_instance_for_execution(&self, instance_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE module_instances
            SET status = 'in_progress',
                last_polled_status = 'in_progress',
                callback_processed = FALSE,
                last_used_at = NOW(),
                updated_at = NOW()
            WHERE instance_id = $1
            "#,
        )
        .bind(instance_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Flip to a terminal status, preserving last_polled_status so the
    /// poller sees the change.
    pub async fn mark_instance_terminal(
        &self,
        instance_id: &str,
        status: InstanceStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE module_instances
            SET status = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE instance_id = $1
            "#,
        )
        .bind(instance_id)
        .bind(status.as_str())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Terminal flip that also arms the completion poller: used when a hook
    /// completes an instance outside a background run (the status mirrors
    /// are forced so the poller's work predicate matches).
    pub async fn complete_instance_for_callback(
        &self,
        instance_id: &str,
        status: InstanceStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE module_instances
            SET status = $2,
                last_polled_status = 'in_progress',
                callback_processed = FALSE,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE instance_id = $1
            "#,
        )
        .bind(instance_id)
        .bind(status.as_str())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Close out a poller cycle for one instance. Single-writer by
    /// construction; the poller is the only caller.
    pub async fn mark_callback_processed(
        &self,
        instance_id: &str,
        current_status: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE module_instances
            SET callback_processed = TRUE,
                last_polled_status = $2,
                updated_at = NOW()
            WHERE instance_id = $1
            "#,
        )
        .bind(instance_id)
        .bind(current_status)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// The poller's work query: terminal instances whose completion has not
    /// been resolved yet, joined to their active narrative link.
    pub async fn find_completed_unprocessed(
        &self,
        limit: i64,
    ) -> Result<Vec<CompletedInstanceInfo>> {
        let rows = sqlx::query_as::<_, CompletedInstanceInfo>(
            r#"
            SELECT
                mi.instance_id,
                inl.narrative_id,
                mi.agent_id,
                mi.user_id,
                mi.module_class,
                mi.status
            FROM module_instances mi
            INNER JOIN instance_narrative_links inl
                ON mi.instance_id = inl.instance_id
            WHERE mi.status IN ('completed', 'failed')
              AND mi.last_polled_status = 'in_progress'
              AND mi.callback_processed = FALSE
              AND inl.link_type = 'active'
            ORDER BY mi.completed_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// Blocked instances of a narrative (dependency resolution input)
    pub async fn get_blocked_instances(
        &self,
        narrative_id: &str,
    ) -> Result<Vec<ModuleInstanceRow>> {
        let rows = sqlx::query_as::<_, ModuleInstanceRow>(&format!(
            r#"
            SELECT {INSTANCE_COLUMNS}
            FROM module_instances mi
            WHERE mi.status = 'blocked'
              AND mi.instance_id IN (
                  SELECT instance_id FROM instance_narrative_links
                  WHERE narrative_id = $1 AND link_type = 'active'
              )
            "#,
        ))
        .bind(narrative_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    // ============================================
    // Instance ↔ narrative links
    // ============================================

    /// Idempotent link creation (unique on the pair)
    pub async fn link_instance_to_narrative(
        &self,
        instance_id: &str,
        narrative_id: &str,
        link_type: LinkType,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO instance_narrative_links (instance_id, narrative_id, link_type)
            VALUES ($1, $2, $3)
            ON CONFLICT (instance_id, narrative_id) DO UPDATE SET link_type = EXCLUDED.link_type
            "#,
        )
        .bind(instance_id)
        .bind(narrative_id)
        .bind(link_type.as_str())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    pub async fn get_links_for_narrative(
        &self,
        narrative_id: &str,
    ) -> Result<Vec<InstanceLinkRow>> {
        let rows = sqlx::query_as::<_, InstanceLinkRow>(
            r#"
            SELECT instance_id, narrative_id, link_type, created_at
            FROM instance_narrative_links
            WHERE narrative_id = $1 AND link_type = 'active'
            "#,
        )
        .bind(narrative_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }
}
