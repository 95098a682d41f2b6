// Basic info module: time and environment context for the turn

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use ambit_core::context::ContextData;
use ambit_core::error::{CoreError, Result};
use ambit_core::module::{Module, ModuleBinding, ModuleMeta};
use ambit_core::timefmt::{format_in_timezone, resolve_timezone};
use ambit_core::tools::{Tool, ToolExecutionResult};
use ambit_core::types::{ModuleClass, ModuleType};
use ambit_storage::Database;

pub struct BasicInfoModule {
    db: Database,
}

impl BasicInfoModule {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Module for BasicInfoModule {
    fn meta(&self) -> ModuleMeta {
        ModuleMeta {
            class: ModuleClass::BasicInfo,
            module_type: ModuleType::Capability,
            description: "Current time, user profile and environment context",
            topic_hint: "Basic information, time, environment context",
        }
    }

    fn instructions(&self, _binding: &ModuleBinding) -> String {
        "Times in context are rendered in the user's timezone. Use `get_current_time` \
         when you need the exact current instant."
            .to_string()
    }

    fn tools(&self, _binding: &ModuleBinding) -> Vec<Arc<dyn Tool>> {
        vec![Arc::new(GetCurrentTimeTool)]
    }

    async fn hook_data_gathering(
        &self,
        _binding: &ModuleBinding,
        mut ctx: ContextData,
    ) -> Result<ContextData> {
        let user = self
            .db
            .get_user(&ctx.user_id)
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?;
        let tz = resolve_timezone(user.as_ref().map(|u| u.timezone.as_str()));

        ctx.extra_data.insert(
            "current_time".into(),
            json!(format_in_timezone(Utc::now(), tz)),
        );
        if let Some(user) = user {
            ctx.user_profile
                .insert("user_id".into(), json!(user.user_id));
            ctx.user_profile
                .insert("timezone".into(), json!(user.timezone));
            if let Some(name) = user.display_name {
                ctx.user_profile.insert("display_name".into(), json!(name));
            }
        }
        Ok(ctx)
    }
}

struct GetCurrentTimeTool;

#[async_trait]
impl Tool for GetCurrentTimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time (UTC, ISO-8601)."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: Value) -> ToolExecutionResult {
        ToolExecutionResult::success(json!({ "datetime": Utc::now().to_rfc3339() }))
    }
}
