// MCP endpoint, RAG store and awareness repositories

use anyhow::Result;
use serde_json::Value;

use ambit_core::ids::generate_id;

use super::Database;
use crate::models::{AwarenessRow, CreateMcpUrl, McpUrlRow, RagStoreRow};

const MCP_COLUMNS: &str = "mcp_id, agent_id, user_id, name, url, description, is_enabled, \
     connection_status, last_check_time, last_error, created_at, updated_at";
const RAG_COLUMNS: &str =
    "display_name, store_name, keywords, file_count, uploaded_files, created_at, updated_at";
const AWARENESS_COLUMNS: &str = "instance_id, agent_id, awareness, created_at, updated_at";

impl Database {
    // ============================================
    // MCP endpoints
    // ============================================

    pub async fn create_mcp_url(&self, input: CreateMcpUrl) -> Result<McpUrlRow> {
        let mcp_id = generate_id("mcp");
        let row = sqlx::query_as::<_, McpUrlRow>(&format!(
            r#"
            INSERT INTO mcp_urls
                (mcp_id, agent_id, user_id, name, url, description, is_enabled, connection_status)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE, 'unknown')
            RETURNING {MCP_COLUMNS}
            "#,
        ))
        .bind(&mcp_id)
        .bind(&input.agent_id)
        .bind(&input.user_id)
        .bind(&input.name)
        .bind(&input.url)
        .bind(&input.description)
        .fetch_one(self.pool())
        .await?;

        Ok(row)
    }

    pub async fn get_mcp_url(&self, mcp_id: &str) -> Result<Option<McpUrlRow>> {
        let row = sqlx::query_as::<_, McpUrlRow>(&format!(
            "SELECT {MCP_COLUMNS} FROM mcp_urls WHERE mcp_id = $1",
        ))
        .bind(mcp_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    pub async fn list_mcp_urls(
        &self,
        agent_id: &str,
        user_id: &str,
        enabled_only: bool,
    ) -> Result<Vec<McpUrlRow>> {
        let rows = sqlx::query_as::<_, McpUrlRow>(&format!(
            r#"
            SELECT {MCP_COLUMNS}
            FROM mcp_urls
            WHERE agent_id = $1 AND user_id = $2 AND ($3 = FALSE OR is_enabled = TRUE)
            ORDER BY created_at ASC
            "#,
        ))
        .bind(agent_id)
        .bind(user_id)
        .bind(enabled_only)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    pub async fn update_mcp_url(
        &self,
        mcp_id: &str,
        name: Option<&str>,
        url: Option<&str>,
        description: Option<&str>,
        is_enabled: Option<bool>,
    ) -> Result<Option<McpUrlRow>> {
        let row = sqlx::query_as::<_, McpUrlRow>(&format!(
            r#"
            UPDATE mcp_urls
            SET
                name = COALESCE($2, name),
                url = COALESCE($3, url),
                description = COALESCE($4, description),
                is_enabled = COALESCE($5, is_enabled),
                updated_at = NOW()
            WHERE mcp_id = $1
            RETURNING {MCP_COLUMNS}
            "#,
        ))
        .bind(mcp_id)
        .bind(name)
        .bind(url)
        .bind(description)
        .bind(is_enabled)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    pub async fn delete_mcp_url(&self, mcp_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM mcp_urls WHERE mcp_id = $1")
            .bind(mcp_id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn record_mcp_check(
        &self,
        mcp_id: &str,
        connection_status: &str,
        last_error: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE mcp_urls
            SET connection_status = $2,
                last_check_time = NOW(),
                last_error = $3,
                updated_at = NOW()
            WHERE mcp_id = $1
            "#,
        )
        .bind(mcp_id)
        .bind(connection_status)
        .bind(last_error)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ============================================
    // RAG store (one per agent, keyed "agent_{agent_id}")
    // ============================================

    pub async fn get_or_create_rag_store(
        &self,
        agent_id: &str,
        store_name: &str,
    ) -> Result<RagStoreRow> {
        let display_name = format!("agent_{agent_id}");
        let row = sqlx::query_as::<_, RagStoreRow>(&format!(
            r#"
            INSERT INTO instance_rag_store (display_name, store_name, keywords, file_count, uploaded_files)
            VALUES ($1, $2, '[]'::jsonb, 0, '[]'::jsonb)
            ON CONFLICT (display_name) DO UPDATE SET updated_at = NOW()
            RETURNING {RAG_COLUMNS}
            "#,
        ))
        .bind(&display_name)
        .bind(store_name)
        .fetch_one(self.pool())
        .await?;

        Ok(row)
    }

    pub async fn get_rag_store(&self, agent_id: &str) -> Result<Option<RagStoreRow>> {
        let display_name = format!("agent_{agent_id}");
        let row = sqlx::query_as::<_, RagStoreRow>(&format!(
            "SELECT {RAG_COLUMNS} FROM instance_rag_store WHERE display_name = $1",
        ))
        .bind(&display_name)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    pub async fn update_rag_files(
        &self,
        agent_id: &str,
        uploaded_files: &Value,
        file_count: i32,
        keywords: Option<&Value>,
    ) -> Result<bool> {
        let display_name = format!("agent_{agent_id}");
        let result = sqlx::query(
            r#"
            UPDATE instance_rag_store
            SET uploaded_files = $2,
                file_count = $3,
                keywords = COALESCE($4, keywords),
                updated_at = NOW()
            WHERE display_name = $1
            "#,
        )
        .bind(&display_name)
        .bind(uploaded_files)
        .bind(file_count)
        .bind(keywords)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ============================================
    // Awareness (one row per agent's AwarenessModule instance)
    // ============================================

    pub async fn get_awareness(&self, agent_id: &str) -> Result<Option<AwarenessRow>> {
        let row = sqlx::query_as::<_, AwarenessRow>(&format!(
            "SELECT {AWARENESS_COLUMNS} FROM instance_awareness WHERE agent_id = $1",
        ))
        .bind(agent_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    pub async fn upsert_awareness(
        &self,
        instance_id: &str,
        agent_id: &str,
        awareness: &str,
    ) -> Result<AwarenessRow> {
        let row = sqlx::query_as::<_, AwarenessRow>(&format!(
            r#"
            INSERT INTO instance_awareness (instance_id, agent_id, awareness)
            VALUES ($1, $2, $3)
            ON CONFLICT (instance_id)
            DO UPDATE SET awareness = EXCLUDED.awareness, updated_at = NOW()
            RETURNING {AWARENESS_COLUMNS}
            "#,
        ))
        .bind(instance_id)
        .bind(agent_id)
        .bind(awareness)
        .fetch_one(self.pool())
        .await?;

        Ok(row)
    }
}
