// Social network module: entities the agent knows and their relationships

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use ambit_core::context::ContextData;
use ambit_core::error::{CoreError, Result};
use ambit_core::module::{Module, ModuleBinding, ModuleMeta};
use ambit_core::tools::{Tool, ToolExecutionResult};
use ambit_core::types::{ModuleClass, ModuleType};
use ambit_storage::{CreateSocialEntity, Database};

pub struct SocialNetworkModule {
    db: Database,
}

impl SocialNetworkModule {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Module for SocialNetworkModule {
    fn meta(&self) -> ModuleMeta {
        ModuleMeta {
            class: ModuleClass::SocialNetwork,
            module_type: ModuleType::Capability,
            description: "People and organizations the agent knows, with relationship state",
            topic_hint: "Social relationship network, user and entity information",
        }
    }

    fn instructions(&self, _binding: &ModuleBinding) -> String {
        "You maintain a social network of entities (people, organizations). Use \
         `social_entity_upsert` to record new contacts or update what you know, and \
         `social_entity_search` to look someone up before asking the user."
            .to_string()
    }

    fn tools(&self, binding: &ModuleBinding) -> Vec<Arc<dyn Tool>> {
        let instance_id = binding.instance.instance_id.clone();
        vec![
            Arc::new(SocialUpsertTool {
                db: self.db.clone(),
                instance_id: instance_id.clone(),
            }),
            Arc::new(SocialSearchTool {
                db: self.db.clone(),
                instance_id,
            }),
        ]
    }

    async fn hook_data_gathering(
        &self,
        binding: &ModuleBinding,
        mut ctx: ContextData,
    ) -> Result<ContextData> {
        let entities = self
            .db
            .list_social_entities(&binding.instance.instance_id, 10)
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?;
        if entities.is_empty() {
            return Ok(ctx);
        }
        let summary: Vec<Value> = entities
            .iter()
            .map(|entity| {
                json!({
                    "entity_id": entity.entity_id,
                    "name": entity.entity_name,
                    "type": entity.entity_type,
                    "tags": entity.tag_list(),
                    "interactions": entity.interaction_count,
                })
            })
            .collect();
        ctx.extra_data.insert("social_network".into(), json!(summary));
        Ok(ctx)
    }
}

struct SocialUpsertTool {
    db: Database,
    instance_id: String,
}

#[async_trait]
impl Tool for SocialUpsertTool {
    fn name(&self) -> &str {
        "social_entity_upsert"
    }

    fn description(&self) -> &str {
        "Create or refresh a social entity (person or organization)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "entity_id": { "type": "string" },
                "entity_name": { "type": "string" },
                "entity_type": { "type": "string", "description": "user, agent or organization" },
                "entity_description": { "type": "string" },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["entity_id", "entity_name"]
        })
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        let Some(entity_id) = arguments.get("entity_id").and_then(|v| v.as_str()) else {
            return ToolExecutionResult::tool_error("missing entity_id");
        };
        let Some(entity_name) = arguments.get("entity_name").and_then(|v| v.as_str()) else {
            return ToolExecutionResult::tool_error("missing entity_name");
        };
        let input = CreateSocialEntity {
            entity_id: entity_id.to_string(),
            instance_id: self.instance_id.clone(),
            entity_name: entity_name.to_string(),
            entity_description: arguments
                .get("entity_description")
                .and_then(|v| v.as_str())
                .map(String::from),
            entity_type: arguments
                .get("entity_type")
                .and_then(|v| v.as_str())
                .unwrap_or("user")
                .to_string(),
            tags: arguments
                .get("tags")
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|t| t.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default(),
        };
        match self.db.create_social_entity(input).await {
            Ok(entity) => {
                let _ = self
                    .db
                    .record_entity_interaction(&self.instance_id, &entity.entity_id)
                    .await;
                ToolExecutionResult::success(json!({ "entity_id": entity.entity_id }))
            }
            Err(e) => ToolExecutionResult::internal_error(e.to_string()),
        }
    }
}

struct SocialSearchTool {
    db: Database,
    instance_id: String,
}

#[async_trait]
impl Tool for SocialSearchTool {
    fn name(&self) -> &str {
        "social_entity_search"
    }

    fn description(&self) -> &str {
        "Search known entities by name or description."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        let Some(query) = arguments.get("query").and_then(|v| v.as_str()) else {
            return ToolExecutionResult::tool_error("missing query");
        };
        match self
            .db
            .search_social_entities(&self.instance_id, query, 10)
            .await
        {
            Ok(entities) => ToolExecutionResult::success(json!(entities
                .iter()
                .map(|entity| {
                    json!({
                        "entity_id": entity.entity_id,
                        "name": entity.entity_name,
                        "type": entity.entity_type,
                        "description": entity.entity_description,
                        "tags": entity.tag_list(),
                        "related_job_ids": entity.related_jobs(),
                    })
                })
                .collect::<Vec<_>>())),
            Err(e) => ToolExecutionResult::internal_error(e.to_string()),
        }
    }
}
