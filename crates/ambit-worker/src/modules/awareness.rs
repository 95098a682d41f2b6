// Awareness module: the agent's self-model

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use ambit_core::context::ContextData;
use ambit_core::error::{CoreError, Result};
use ambit_core::module::{Module, ModuleBinding, ModuleMeta};
use ambit_core::tools::{Tool, ToolExecutionResult};
use ambit_core::types::{ModuleClass, ModuleType};
use ambit_storage::Database;

pub struct AwarenessModule {
    db: Database,
}

impl AwarenessModule {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Module for AwarenessModule {
    fn meta(&self) -> ModuleMeta {
        ModuleMeta {
            class: ModuleClass::Awareness,
            module_type: ModuleType::Capability,
            description: "Agent self-awareness: goals, persona and cognitive state",
            topic_hint: "Agent's self-cognition, goals and state",
        }
    }

    fn instructions(&self, _binding: &ModuleBinding) -> String {
        "Your awareness text describes who you are and what you are working toward. \
         Update it with `awareness_update` when your goals or self-understanding change."
            .to_string()
    }

    fn tools(&self, binding: &ModuleBinding) -> Vec<Arc<dyn Tool>> {
        vec![Arc::new(AwarenessUpdateTool {
            db: self.db.clone(),
            agent_id: binding.instance.agent_id.clone(),
            instance_id: binding.instance.instance_id.clone(),
        })]
    }

    async fn hook_data_gathering(
        &self,
        binding: &ModuleBinding,
        mut ctx: ContextData,
    ) -> Result<ContextData> {
        let row = self
            .db
            .get_awareness(&binding.instance.agent_id)
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?;
        if let Some(row) = row {
            if !row.awareness.is_empty() {
                ctx.awareness = Some(row.awareness);
            }
        }
        Ok(ctx)
    }
}

struct AwarenessUpdateTool {
    db: Database,
    agent_id: String,
    instance_id: String,
}

#[async_trait]
impl Tool for AwarenessUpdateTool {
    fn name(&self) -> &str {
        "awareness_update"
    }

    fn description(&self) -> &str {
        "Replace the agent's awareness text."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "awareness": { "type": "string" } },
            "required": ["awareness"]
        })
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        let Some(awareness) = arguments.get("awareness").and_then(|v| v.as_str()) else {
            return ToolExecutionResult::tool_error("missing awareness");
        };
        match self
            .db
            .upsert_awareness(&self.instance_id, &self.agent_id, awareness)
            .await
        {
            Ok(_) => ToolExecutionResult::success(json!({ "updated": true })),
            Err(e) => ToolExecutionResult::internal_error(e.to_string()),
        }
    }
}
