// Narrative and event repositories

use anyhow::Result;
use serde_json::json;

use ambit_core::ids::generate_id;
use ambit_core::types::NarrativeInfo;

use super::Database;
use crate::models::{CreateEvent, EventRow, NarrativeRow};

const NARRATIVE_COLUMNS: &str =
    "narrative_id, agent_id, narrative_info, created_at, updated_at";
const EVENT_COLUMNS: &str = "event_id, narrative_id, agent_id, user_id, trigger, \
     trigger_source, final_output, event_log, created_at";

impl Database {
    // ============================================
    // Narratives
    // ============================================

    pub async fn create_narrative(
        &self,
        agent_id: &str,
        info: &NarrativeInfo,
    ) -> Result<NarrativeRow> {
        let narrative_id = generate_id("nar");
        let row = sqlx::query_as::<_, NarrativeRow>(&format!(
            r#"
            INSERT INTO narratives (narrative_id, agent_id, narrative_info)
            VALUES ($1, $2, $3)
            RETURNING {NARRATIVE_COLUMNS}
            "#,
        ))
        .bind(&narrative_id)
        .bind(agent_id)
        .bind(serde_json::to_value(info)?)
        .fetch_one(self.pool())
        .await?;

        Ok(row)
    }

    pub async fn get_narrative(&self, narrative_id: &str) -> Result<Option<NarrativeRow>> {
        let row = sqlx::query_as::<_, NarrativeRow>(&format!(
            "SELECT {NARRATIVE_COLUMNS} FROM narratives WHERE narrative_id = $1",
        ))
        .bind(narrative_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    /// Find the narrative whose actors contain the given id, most recent
    /// first. Matches creator and participant roles alike, which is what
    /// routes inbound participant messages into the right narrative.
    pub async fn find_narrative_by_actor(
        &self,
        agent_id: &str,
        actor_id: &str,
    ) -> Result<Option<NarrativeRow>> {
        let actor_filter = json!([{ "id": actor_id }]);
        let row = sqlx::query_as::<_, NarrativeRow>(&format!(
            r#"
            SELECT {NARRATIVE_COLUMNS}
            FROM narratives
            WHERE agent_id = $1
              AND narrative_info->'actors' @> $2
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        ))
        .bind(agent_id)
        .bind(actor_filter)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    pub async fn save_narrative_info(
        &self,
        narrative_id: &str,
        info: &NarrativeInfo,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE narratives SET narrative_info = $2, updated_at = NOW() WHERE narrative_id = $1",
        )
        .bind(narrative_id)
        .bind(serde_json::to_value(info)?)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ============================================
    // Events
    // ============================================

    pub async fn create_event(&self, input: CreateEvent) -> Result<EventRow> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            INSERT INTO events (event_id, narrative_id, agent_id, user_id, trigger, trigger_source, final_output, event_log)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {EVENT_COLUMNS}
            "#,
        ))
        .bind(&input.event_id)
        .bind(&input.narrative_id)
        .bind(&input.agent_id)
        .bind(&input.user_id)
        .bind(&input.trigger)
        .bind(&input.trigger_source)
        .bind(&input.final_output)
        .bind(&input.event_log)
        .fetch_one(self.pool())
        .await?;

        Ok(row)
    }

    pub async fn get_event(&self, event_id: &str) -> Result<Option<EventRow>> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE event_id = $1",
        ))
        .bind(event_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    pub async fn list_events_for_narrative(
        &self,
        narrative_id: &str,
        limit: i64,
    ) -> Result<Vec<EventRow>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE narrative_id = $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        ))
        .bind(narrative_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }
}
