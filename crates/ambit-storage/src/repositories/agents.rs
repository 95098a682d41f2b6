// Agent and user repositories

use anyhow::Result;
use chrono::Utc;

use ambit_core::ids::generate_id;
use ambit_core::timefmt::validate_timezone;

use super::Database;
use crate::models::{AgentRow, CreateAgent, CreateUser, UpdateAgent, UserRow};

const AGENT_COLUMNS: &str =
    "agent_id, name, description, created_by, is_public, created_at, updated_at";
const USER_COLUMNS: &str =
    "user_id, user_type, display_name, timezone, status, last_login_at, created_at, updated_at";

impl Database {
    // ============================================
    // Agents
    // ============================================

    pub async fn create_agent(&self, input: CreateAgent) -> Result<AgentRow> {
        let agent_id = generate_id("agent");
        let row = sqlx::query_as::<_, AgentRow>(&format!(
            r#"
            INSERT INTO agents (agent_id, name, description, created_by, is_public)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {AGENT_COLUMNS}
            "#,
        ))
        .bind(&agent_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.created_by)
        .bind(input.is_public)
        .fetch_one(self.pool())
        .await?;

        Ok(row)
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRow>> {
        let row = sqlx::query_as::<_, AgentRow>(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE agent_id = $1",
        ))
        .bind(agent_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    /// Agents visible to a user: their own plus any public agent
    pub async fn list_agents_for_user(&self, user_id: &str) -> Result<Vec<AgentRow>> {
        let rows = sqlx::query_as::<_, AgentRow>(&format!(
            r#"
            SELECT {AGENT_COLUMNS}
            FROM agents
            WHERE created_by = $1 OR is_public = TRUE
            ORDER BY created_at DESC
            "#,
        ))
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    pub async fn update_agent(
        &self,
        agent_id: &str,
        input: UpdateAgent,
    ) -> Result<Option<AgentRow>> {
        let row = sqlx::query_as::<_, AgentRow>(&format!(
            r#"
            UPDATE agents
            SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                is_public = COALESCE($4, is_public),
                updated_at = NOW()
            WHERE agent_id = $1
            RETURNING {AGENT_COLUMNS}
            "#,
        ))
        .bind(agent_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.is_public)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    // ============================================
    // Users
    // ============================================

    pub async fn create_user(&self, input: CreateUser) -> Result<UserRow> {
        let timezone = match input.timezone.as_deref() {
            Some(tz) => {
                validate_timezone(tz)?;
                tz.to_string()
            }
            None => "UTC".to_string(),
        };

        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (user_id, user_type, display_name, timezone, status)
            VALUES ($1, $2, $3, $4, 'active')
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(&input.user_id)
        .bind(&input.user_type)
        .bind(&input.display_name)
        .bind(&timezone)
        .fetch_one(self.pool())
        .await?;

        Ok(row)
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE user_id = $1",
        ))
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    /// The user's IANA timezone; missing users read as "UTC"
    pub async fn get_user_timezone(&self, user_id: &str) -> String {
        match self.get_user(user_id).await {
            Ok(Some(user)) => user.timezone,
            Ok(None) => "UTC".to_string(),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to load user timezone, using UTC");
                "UTC".to_string()
            }
        }
    }

    pub async fn touch_last_login(&self, user_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE users SET last_login_at = $2, updated_at = NOW() WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
