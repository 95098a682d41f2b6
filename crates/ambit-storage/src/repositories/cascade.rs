// Cascade agent deletion
//
// Visits tables leaf-first inside one transaction: dynamic memory tables
// (by instance then narrative) -> jobs -> links -> instance-scoped sub-tables ->
// instances -> events -> narratives -> mcp endpoints -> agent messages -> agent.

use anyhow::Result;
use tracing::info;

use super::Database;
use crate::store::validate_identifier;

impl Database {
    /// List the on-demand memory tables currently present
    async fn dynamic_memory_tables(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = 'public'
              AND (table_name LIKE 'json_format_event_memory_%'
                   OR table_name LIKE 'instance_json_format_memory_%')
            "#,
        )
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Delete an agent and everything it owns. Returns false when the agent
    /// does not exist. All steps share one transaction scope.
    pub async fn delete_agent_cascade(&self, agent_id: &str) -> Result<bool> {
        if self.get_agent(agent_id).await?.is_none() {
            return Ok(false);
        }

        let instance_ids: Vec<String> = sqlx::query_as::<_, (String,)>(
            "SELECT instance_id FROM module_instances WHERE agent_id = $1",
        )
        .bind(agent_id)
        .fetch_all(self.pool())
        .await?
        .into_iter()
        .map(|(id,)| id)
        .collect();

        let narrative_ids: Vec<String> = sqlx::query_as::<_, (String,)>(
            "SELECT narrative_id FROM narratives WHERE agent_id = $1",
        )
        .bind(agent_id)
        .fetch_all(self.pool())
        .await?
        .into_iter()
        .map(|(id,)| id)
        .collect();

        let dynamic_tables = self.dynamic_memory_tables().await?;

        let mut tx = self.store().transaction().await?;

        // 1. Dynamic memory tables, keyed by instance then by narrative
        for table in &dynamic_tables {
            let table = validate_identifier(table)?;
            if table.starts_with("instance_json_format_memory_") && !instance_ids.is_empty() {
                sqlx::query(&format!("DELETE FROM {table} WHERE instance_id = ANY($1)"))
                    .bind(&instance_ids)
                    .execute(&mut *tx)
                    .await?;
            }
            if table.starts_with("json_format_event_memory_") && !narrative_ids.is_empty() {
                sqlx::query(&format!("DELETE FROM {table} WHERE narrative_id = ANY($1)"))
                    .bind(&narrative_ids)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        // 2. Jobs, links and instance-scoped sub-tables
        sqlx::query("DELETE FROM instance_jobs WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;
        if !instance_ids.is_empty() {
            sqlx::query("DELETE FROM instance_narrative_links WHERE instance_id = ANY($1)")
                .bind(&instance_ids)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM instance_social_entities WHERE instance_id = ANY($1)")
                .bind(&instance_ids)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM instance_module_report_memory WHERE instance_id = ANY($1)")
                .bind(&instance_ids)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM instance_json_format_memory WHERE instance_id = ANY($1)")
                .bind(&instance_ids)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM instance_awareness WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM instance_rag_store WHERE display_name = $1")
            .bind(format!("agent_{agent_id}"))
            .execute(&mut *tx)
            .await?;

        // 3. Instances, events, narratives
        sqlx::query("DELETE FROM module_instances WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM events WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM narratives WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;

        // 4. Endpoints, messages, and the agent row itself
        sqlx::query("DELETE FROM mcp_urls WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM agent_messages WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM agents WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        info!(
            agent_id = %agent_id,
            instances = instance_ids.len(),
            narratives = narrative_ids.len(),
            "Agent cascade delete complete"
        );
        Ok(deleted > 0)
    }
}
