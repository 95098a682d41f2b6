// LLM-driven instance planner
//
// One structured call per user turn: current task instances, capability
// metadata, summary, history, awareness and the narrative's active jobs go
// in; an InstancePlan comes out. The post-LLM validation here is what the
// rest of the pipeline relies on.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use ambit_core::error::{CoreError, Result};
use ambit_core::llm::{LlmCallConfig, LlmClient, LlmMessage};
use ambit_core::module::ModuleMeta;
use ambit_core::plan::{ExecutionPath, InstancePlan, JobInfo};
use ambit_core::types::{ModuleClass, ModuleInstance};

use crate::config::RuntimeConfig;
use crate::prompts::{build_decider_prompt, DeciderPromptInputs, DECIDER_SYSTEM_PROMPT};
use crate::sync::derive_trigger;

/// Inputs for one planning call
pub struct DecisionInputs<'a> {
    pub user_input: &'a str,
    pub task_instances: &'a [ModuleInstance],
    pub capability_info: &'a [ModuleMeta],
    pub narrative_summary: &'a str,
    pub history_markdown: &'a str,
    pub awareness: &'a str,
    pub current_user_id: &'a str,
    pub job_info_map: &'a BTreeMap<String, JobInfo>,
}

#[derive(Clone)]
pub struct InstanceDecider {
    llm: Arc<dyn LlmClient>,
    config: RuntimeConfig,
}

impl InstanceDecider {
    pub fn new(llm: Arc<dyn LlmClient>, config: RuntimeConfig) -> Self {
        Self { llm, config }
    }

    pub async fn decide(&self, inputs: DecisionInputs<'_>) -> Result<InstancePlan> {
        let task_instances_json = serde_json::to_string_pretty(
            &inputs
                .task_instances
                .iter()
                .map(|inst| {
                    json!({
                        "instance_id": inst.instance_id,
                        "module_class": inst.module_class.as_str(),
                        "description": inst.description,
                        "status": inst.status.as_str(),
                        "dependencies": inst.dependencies,
                        "topic_hint": inst.topic_hint,
                    })
                })
                .collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".into());

        let capability_info = inputs
            .capability_info
            .iter()
            .map(|meta| format!("- {}: {}", meta.class.as_str(), meta.description))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = build_decider_prompt(&DeciderPromptInputs {
            user_input: inputs.user_input,
            task_instances_json,
            capability_info,
            narrative_summary: inputs.narrative_summary,
            history_markdown: inputs.history_markdown,
            awareness: inputs.awareness,
            current_user_id: inputs.current_user_id,
            job_info_map: inputs.job_info_map,
        });

        let mut call = LlmCallConfig::for_model(&self.config.model);
        call.timeout_secs = self.config.llm_timeout_secs;
        let raw = self
            .llm
            .structured(
                vec![
                    LlmMessage::system(DECIDER_SYSTEM_PROMPT),
                    LlmMessage::user(prompt),
                ],
                &call,
            )
            .await?;

        let plan: InstancePlan = serde_json::from_value(raw)
            .map_err(|e| CoreError::llm(format!("planner output did not match schema: {e}")))?;

        validate_plan(&plan)?;
        info!(
            execution_path = ?plan.execution_path,
            instances = plan.active_instances.len(),
            "Planner decision"
        );
        debug!(reasoning = %plan.reasoning, "Planner reasoning");
        Ok(plan)
    }
}

/// Decision invariants enforced after the LLM call
pub fn validate_plan(plan: &InstancePlan) -> Result<()> {
    if plan.execution_path == ExecutionPath::DirectTrigger && plan.direct_trigger.is_none() {
        return Err(CoreError::validation(
            "execution_path is direct_trigger but no direct_trigger was provided",
        ));
    }

    let keys: HashSet<&str> = plan
        .active_instances
        .iter()
        .map(|inst| inst.task_key.as_str())
        .collect();
    if keys.len() != plan.active_instances.len() {
        return Err(CoreError::validation("duplicate task_key in plan"));
    }

    let now = chrono::Utc::now();
    for inst in &plan.active_instances {
        for dep in &inst.depends_on {
            // References to out-of-plan instance ids are resolved by the
            // sync pass against history; a missing sibling task_key is fatal
            if !keys.contains(dep.as_str()) && !ambit_core::ids::is_valid_instance_id(dep) {
                return Err(CoreError::validation(format!(
                    "instance {:?} depends on unknown task_key {dep:?}",
                    inst.task_key
                )));
            }
        }

        if inst.module_class == ModuleClass::Job {
            let Some(config) = &inst.job_config else {
                return Err(CoreError::validation(format!(
                    "JobModule instance {:?} is missing job_config",
                    inst.task_key
                )));
            };
            if config.title.trim().is_empty() || config.payload.trim().is_empty() {
                return Err(CoreError::validation(format!(
                    "job {:?} needs a non-empty title and payload",
                    inst.task_key
                )));
            }
            derive_trigger(config, now).map_err(|e| {
                CoreError::validation(format!("job {:?}: {e}", inst.task_key))
            })?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambit_core::plan::{DirectTrigger, PlannedInstance, PlannedJobConfig};
    use ambit_core::types::InstanceStatus;

    fn job_instance(task_key: &str, depends_on: &[&str]) -> PlannedInstance {
        PlannedInstance {
            task_key: task_key.into(),
            instance_id: None,
            module_class: ModuleClass::Job,
            description: "d".into(),
            status: InstanceStatus::Active,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            dependencies: Vec::new(),
            job_config: Some(PlannedJobConfig {
                title: format!("{task_key} title"),
                payload: "payload".into(),
                ..Default::default()
            }),
            is_existing: false,
            similar_match: false,
            existing_job_id: None,
        }
    }

    fn plan_with(instances: Vec<PlannedInstance>) -> InstancePlan {
        InstancePlan {
            execution_path: ExecutionPath::AgentLoop,
            active_instances: instances,
            direct_trigger: None,
            reasoning: String::new(),
            changes_explanation: String::new(),
            relationship_graph: serde_json::Value::Null,
        }
    }

    #[test]
    fn direct_trigger_requires_payload() {
        let mut plan = plan_with(vec![]);
        plan.execution_path = ExecutionPath::DirectTrigger;
        assert!(validate_plan(&plan).is_err());

        plan.direct_trigger = Some(DirectTrigger {
            tool_name: "inbox_mark_read".into(),
            arguments: serde_json::json!({}),
        });
        assert!(validate_plan(&plan).is_ok());
    }

    #[test]
    fn missing_sibling_task_key_is_fatal() {
        let plan = plan_with(vec![job_instance("analyse", &["missing"])]);
        assert!(validate_plan(&plan).is_err());
    }

    #[test]
    fn out_of_plan_instance_id_dependency_is_allowed() {
        let plan = plan_with(vec![job_instance("analyse", &["job_fe7382f7"])]);
        assert!(validate_plan(&plan).is_ok());
    }

    #[test]
    fn job_without_config_is_fatal() {
        let mut inst = job_instance("orphan", &[]);
        inst.job_config = None;
        assert!(validate_plan(&plan_with(vec![inst])).is_err());
    }

    #[test]
    fn end_condition_without_interval_is_fatal() {
        let mut inst = job_instance("bad", &[]);
        inst.job_config.as_mut().unwrap().end_condition = Some("done".into());
        assert!(validate_plan(&plan_with(vec![inst])).is_err());
    }

    #[test]
    fn duplicate_task_keys_are_fatal() {
        let plan = plan_with(vec![job_instance("same", &[]), job_instance("same", &[])]);
        assert!(validate_plan(&plan).is_err());
    }
}
