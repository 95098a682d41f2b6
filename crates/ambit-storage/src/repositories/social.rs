// Social entity repository (scoped to a SocialNetworkModule instance)

use anyhow::Result;
use serde_json::json;

use super::Database;
use crate::models::{CreateSocialEntity, SocialEntityRow};

const ENTITY_COLUMNS: &str = "entity_id, instance_id, entity_name, entity_description, \
     entity_type, identity_info, contact_info, tags, relationship_strength, \
     interaction_count, last_interaction_time, persona, related_job_ids, \
     expertise_domains, embedding, created_at, updated_at";

impl Database {
    pub async fn create_social_entity(
        &self,
        input: CreateSocialEntity,
    ) -> Result<SocialEntityRow> {
        let row = sqlx::query_as::<_, SocialEntityRow>(&format!(
            r#"
            INSERT INTO instance_social_entities
                (entity_id, instance_id, entity_name, entity_description, entity_type,
                 identity_info, contact_info, tags, relationship_strength,
                 interaction_count, related_job_ids, expertise_domains)
            VALUES ($1, $2, $3, $4, $5, '{{}}'::jsonb, '{{}}'::jsonb, $6, 0.0, 0,
                    '[]'::jsonb, '[]'::jsonb)
            ON CONFLICT (instance_id, entity_id) DO UPDATE SET updated_at = NOW()
            RETURNING {ENTITY_COLUMNS}
            "#,
        ))
        .bind(&input.entity_id)
        .bind(&input.instance_id)
        .bind(&input.entity_name)
        .bind(&input.entity_description)
        .bind(&input.entity_type)
        .bind(json!(input.tags))
        .fetch_one(self.pool())
        .await?;

        Ok(row)
    }

    pub async fn get_social_entity(
        &self,
        instance_id: &str,
        entity_id: &str,
    ) -> Result<Option<SocialEntityRow>> {
        let row = sqlx::query_as::<_, SocialEntityRow>(&format!(
            r#"
            SELECT {ENTITY_COLUMNS}
            FROM instance_social_entities
            WHERE instance_id = $1 AND entity_id = $2
            "#,
        ))
        .bind(instance_id)
        .bind(entity_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    pub async fn list_social_entities(
        &self,
        instance_id: &str,
        limit: i64,
    ) -> Result<Vec<SocialEntityRow>> {
        let rows = sqlx::query_as::<_, SocialEntityRow>(&format!(
            r#"
            SELECT {ENTITY_COLUMNS}
            FROM instance_social_entities
            WHERE instance_id = $1
            ORDER BY relationship_strength DESC, updated_at DESC
            LIMIT $2
            "#,
        ))
        .bind(instance_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// Append job ids to an entity's related_job_ids (deduplicated)
    pub async fn append_entity_related_jobs(
        &self,
        instance_id: &str,
        entity_id: &str,
        job_ids: &[String],
    ) -> Result<bool> {
        let entity = self.get_social_entity(instance_id, entity_id).await?;
        let Some(entity) = entity else {
            return Ok(false);
        };
        let mut related = entity.related_jobs();
        for job_id in job_ids {
            if !related.contains(job_id) {
                related.push(job_id.clone());
            }
        }

        let result = sqlx::query(
            r#"
            UPDATE instance_social_entities
            SET related_job_ids = $3, updated_at = NOW()
            WHERE instance_id = $1 AND entity_id = $2
            "#,
        )
        .bind(instance_id)
        .bind(entity_id)
        .bind(json!(related))
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn record_entity_interaction(
        &self,
        instance_id: &str,
        entity_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE instance_social_entities
            SET interaction_count = interaction_count + 1,
                last_interaction_time = NOW(),
                updated_at = NOW()
            WHERE instance_id = $1 AND entity_id = $2
            "#,
        )
        .bind(instance_id)
        .bind(entity_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Name/description substring search
    pub async fn search_social_entities(
        &self,
        instance_id: &str,
        query: &str,
        limit: i64,
    ) -> Result<Vec<SocialEntityRow>> {
        let pattern = format!("%{}%", query.trim().to_lowercase());
        let rows = sqlx::query_as::<_, SocialEntityRow>(&format!(
            r#"
            SELECT {ENTITY_COLUMNS}
            FROM instance_social_entities
            WHERE instance_id = $1
              AND (LOWER(entity_name) LIKE $2 OR LOWER(COALESCE(entity_description, '')) LIKE $2)
            ORDER BY relationship_strength DESC
            LIMIT $3
            "#,
        ))
        .bind(instance_id)
        .bind(&pattern)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// Semantic scan over entity embeddings
    pub async fn search_social_entities_semantic(
        &self,
        instance_id: &str,
        query_vec: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<(SocialEntityRow, f32)>> {
        let scored = self
            .store()
            .semantic_search(
                "instance_social_entities",
                "embedding",
                query_vec,
                &[("instance_id", instance_id.into())],
                limit,
                min_similarity,
            )
            .await?;

        let mut out = Vec::with_capacity(scored.len());
        for (row, score) in scored {
            let Some(entity_id) = row.get("entity_id").and_then(|v| v.as_str()) else {
                continue;
            };
            if let Some(entity) = self.get_social_entity(instance_id, entity_id).await? {
                out.push((entity, score));
            }
        }
        Ok(out)
    }
}
