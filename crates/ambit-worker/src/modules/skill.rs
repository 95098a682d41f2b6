// Skill module: always loaded, no database record
//
// Skills are named procedures the agent can follow; the set is static for
// now and the module only contributes instructions plus a listing tool.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use ambit_core::module::{Module, ModuleBinding, ModuleMeta};
use ambit_core::tools::{Tool, ToolExecutionResult};
use ambit_core::types::{ModuleClass, ModuleType};

const SKILLS: &[(&str, &str)] = &[
    (
        "summarize_thread",
        "Condense a long conversation into key points and open questions",
    ),
    (
        "draft_outreach",
        "Draft a personalized outreach message for a social entity",
    ),
    (
        "plan_research",
        "Break a research request into ordered background jobs",
    ),
];

pub struct SkillModule;

impl SkillModule {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SkillModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for SkillModule {
    fn meta(&self) -> ModuleMeta {
        ModuleMeta {
            class: ModuleClass::Skill,
            module_type: ModuleType::Capability,
            description: "Named procedures the agent can apply to common requests",
            topic_hint: "Reusable skills",
        }
    }

    fn instructions(&self, _binding: &ModuleBinding) -> String {
        let listing: Vec<String> = SKILLS
            .iter()
            .map(|(name, description)| format!("- {name}: {description}"))
            .collect();
        format!(
            "Available skills:\n{}\nApply a skill's procedure when a request matches it.",
            listing.join("\n")
        )
    }

    fn tools(&self, _binding: &ModuleBinding) -> Vec<Arc<dyn Tool>> {
        vec![Arc::new(SkillListTool)]
    }
}

struct SkillListTool;

#[async_trait]
impl Tool for SkillListTool {
    fn name(&self) -> &str {
        "skill_list"
    }

    fn description(&self) -> &str {
        "List the agent's available skills."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: Value) -> ToolExecutionResult {
        ToolExecutionResult::success(json!(SKILLS
            .iter()
            .map(|(name, description)| json!({ "name": name, "description": description }))
            .collect::<Vec<_>>()))
    }
}
