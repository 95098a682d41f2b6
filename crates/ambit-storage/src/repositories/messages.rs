// Inbox and agent-to-agent message repositories

use anyhow::Result;

use ambit_core::ids::generate_long_id;

use super::Database;
use crate::models::{AgentMessageRow, CreateInboxMessage, InboxMessageRow};

const INBOX_COLUMNS: &str = "message_id, user_id, title, content, message_type, \
     source_type, source_id, event_id, is_read, created_at";
const AGENT_MESSAGE_COLUMNS: &str = "message_id, agent_id, from_agent_id, title, content, \
     message_type, source_type, source_id, if_response, created_at";

impl Database {
    // ============================================
    // Inbox (append-only; is_read flips one way)
    // ============================================

    pub async fn create_inbox_message(
        &self,
        input: CreateInboxMessage,
    ) -> Result<InboxMessageRow> {
        let message_id = generate_long_id("msg");
        let row = sqlx::query_as::<_, InboxMessageRow>(&format!(
            r#"
            INSERT INTO inbox_table
                (message_id, user_id, title, content, message_type, source_type, source_id, event_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {INBOX_COLUMNS}
            "#,
        ))
        .bind(&message_id)
        .bind(&input.user_id)
        .bind(&input.title)
        .bind(&input.content)
        .bind(input.message_type.as_str())
        .bind(&input.source_type)
        .bind(&input.source_id)
        .bind(&input.event_id)
        .fetch_one(self.pool())
        .await?;

        Ok(row)
    }

    pub async fn list_inbox(
        &self,
        user_id: &str,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<InboxMessageRow>> {
        let rows = sqlx::query_as::<_, InboxMessageRow>(&format!(
            r#"
            SELECT {INBOX_COLUMNS}
            FROM inbox_table
            WHERE user_id = $1 AND ($2 = FALSE OR is_read = FALSE)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        ))
        .bind(user_id)
        .bind(unread_only)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    pub async fn mark_inbox_read(&self, message_id: &str, user_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE inbox_table SET is_read = TRUE WHERE message_id = $1 AND user_id = $2",
        )
        .bind(message_id)
        .bind(user_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_all_inbox_read(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE inbox_table SET is_read = TRUE WHERE user_id = $1 AND is_read = FALSE",
        )
        .bind(user_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    // ============================================
    // Agent messages
    // ============================================

    pub async fn create_agent_message(
        &self,
        agent_id: &str,
        from_agent_id: Option<&str>,
        title: &str,
        content: &str,
        source_id: &str,
    ) -> Result<AgentMessageRow> {
        let message_id = generate_long_id("amsg");
        let row = sqlx::query_as::<_, AgentMessageRow>(&format!(
            r#"
            INSERT INTO agent_messages
                (message_id, agent_id, from_agent_id, title, content, message_type, source_type, source_id)
            VALUES ($1, $2, $3, $4, $5, 'agent_message', 'agent', $6)
            RETURNING {AGENT_MESSAGE_COLUMNS}
            "#,
        ))
        .bind(&message_id)
        .bind(agent_id)
        .bind(from_agent_id)
        .bind(title)
        .bind(content)
        .bind(source_id)
        .fetch_one(self.pool())
        .await?;

        Ok(row)
    }

    pub async fn list_agent_messages(
        &self,
        agent_id: &str,
        limit: i64,
    ) -> Result<Vec<AgentMessageRow>> {
        let rows = sqlx::query_as::<_, AgentMessageRow>(&format!(
            r#"
            SELECT {AGENT_MESSAGE_COLUMNS}
            FROM agent_messages
            WHERE agent_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        ))
        .bind(agent_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    pub async fn mark_agent_message_responded(&self, message_id: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE agent_messages SET if_response = TRUE WHERE message_id = $1")
                .bind(message_id)
                .execute(self.pool())
                .await?;

        Ok(result.rows_affected() > 0)
    }
}
