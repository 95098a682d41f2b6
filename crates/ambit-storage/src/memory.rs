// Dynamic per-module JSON memory tables
//
// Two families, created on demand by the module that needs them:
//   instance_json_format_memory_{module}, keyed by instance_id (unique)
//   json_format_event_memory_{module}, keyed by narrative_id (unique)
// A missing table reads as empty memory; upserts are idempotent under the
// same payload.

use anyhow::Result;
use serde_json::Value;

use crate::repositories::Database;
use crate::store::{validate_identifier, SqlValue};

/// Memory table family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryScope {
    /// Keyed by instance_id
    Instance,
    /// Keyed by narrative_id
    Narrative,
}

impl MemoryScope {
    fn table_prefix(&self) -> &'static str {
        match self {
            MemoryScope::Instance => "instance_json_format_memory_",
            MemoryScope::Narrative => "json_format_event_memory_",
        }
    }

    fn key_column(&self) -> &'static str {
        match self {
            MemoryScope::Instance => "instance_id",
            MemoryScope::Narrative => "narrative_id",
        }
    }
}

/// Table name for a module's memory in a given scope. `module` is a short
/// lowercase tag ("chat", "job", …), validated before interpolation.
pub fn memory_table_name(scope: MemoryScope, module: &str) -> Result<String> {
    let module = validate_identifier(module)?;
    Ok(format!("{}{}", scope.table_prefix(), module.to_lowercase()))
}

impl Database {
    /// Create a memory table if it does not exist yet
    pub async fn ensure_memory_table(&self, scope: MemoryScope, module: &str) -> Result<()> {
        let table = memory_table_name(scope, module)?;
        let key = scope.key_column();
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                {key} TEXT PRIMARY KEY,
                memory TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        ))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Read a memory payload. A missing table or row reads as None; a
    /// corrupted payload reads as None with a warning.
    pub async fn get_memory(
        &self,
        scope: MemoryScope,
        module: &str,
        key: &str,
    ) -> Result<Option<Value>> {
        let table = memory_table_name(scope, module)?;
        let row = self
            .store()
            .get_one(&table, &[(scope.key_column(), SqlValue::from(key))])
            .await;

        let row = match row {
            Ok(row) => row,
            Err(e) => {
                // Transient infrastructure or a table that does not exist yet
                tracing::debug!(table = %table, error = %e, "Memory read failed, treating as empty");
                return Ok(None);
            }
        };

        Ok(row.and_then(|r| {
            let raw = r.get("memory")?.as_str()?.to_string();
            match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(table = %table, key = %key, error = %e, "Corrupted memory payload, treating as empty");
                    None
                }
            }
        }))
    }

    /// Write a memory payload, creating the table on first use. Idempotent
    /// under the same payload.
    pub async fn upsert_memory(
        &self,
        scope: MemoryScope,
        module: &str,
        key: &str,
        memory: &Value,
    ) -> Result<()> {
        self.ensure_memory_table(scope, module).await?;
        let table = memory_table_name(scope, module)?;
        let key_column = scope.key_column();
        sqlx::query(&format!(
            r#"
            INSERT INTO {table} ({key_column}, memory)
            VALUES ($1, $2)
            ON CONFLICT ({key_column})
            DO UPDATE SET memory = EXCLUDED.memory, updated_at = NOW()
            "#,
        ))
        .bind(key)
        .bind(serde_json::to_string(memory)?)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_are_scoped_and_validated() {
        assert_eq!(
            memory_table_name(MemoryScope::Instance, "chat").unwrap(),
            "instance_json_format_memory_chat"
        );
        assert_eq!(
            memory_table_name(MemoryScope::Narrative, "Chat").unwrap(),
            "json_format_event_memory_chat"
        );
        assert!(memory_table_name(MemoryScope::Instance, "chat; drop").is_err());
    }
}
