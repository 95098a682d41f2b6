// Planner output types
//
// The instance decider returns one structured plan per user turn: an ordered
// set of instances (with task-key dependencies) plus an execution path.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{InstanceStatus, ModuleClass};

/// How the turn should execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPath {
    /// Full streamed agent loop
    AgentLoop,
    /// Fast path: invoke one tool with the given arguments, skip the loop
    DirectTrigger,
}

/// The single tool invocation of a direct-trigger turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectTrigger {
    pub tool_name: String,
    pub arguments: Value,
}

/// Job configuration attached to a planned JobModule instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlannedJobConfig {
    pub title: String,
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<i64>,
    /// ISO-8601 point in time for one-off jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_entity_id: Option<String>,
}

/// One instance in the plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedInstance {
    /// Semantic label chosen by the model, unique within the plan
    pub task_key: String,
    /// Present when reusing an existing instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub module_class: ModuleClass,
    pub description: String,
    #[serde(default = "default_planned_status")]
    pub status: InstanceStatus,
    /// Task keys this instance depends on (not instance ids)
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Instance ids, filled in by the sync pass
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_config: Option<PlannedJobConfig>,
    /// Set by the sync pass when the plan matched an existing job
    #[serde(default)]
    pub is_existing: bool,
    #[serde(default)]
    pub similar_match: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_job_id: Option<String>,
}

fn default_planned_status() -> InstanceStatus {
    InstanceStatus::Active
}

/// The full plan returned by the decider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstancePlan {
    pub execution_path: ExecutionPath,
    #[serde(default)]
    pub active_instances: Vec<PlannedInstance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_trigger: Option<DirectTrigger>,
    #[serde(default)]
    pub reasoning: String,
    /// JSON-encoded explanation of the diff against the previous turn
    #[serde(default)]
    pub changes_explanation: String,
    #[serde(default)]
    pub relationship_graph: Value,
}

/// Per-job context the decider receives about the narrative's active jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_entity_id: Option<String>,
    pub job_type: String,
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plan_deserializes_from_model_output() {
        let raw = json!({
            "execution_path": "agent_loop",
            "active_instances": [
                {
                    "task_key": "fetch_data",
                    "module_class": "JobModule",
                    "description": "Fetch competitor data",
                    "status": "active",
                    "depends_on": [],
                    "job_config": {
                        "title": "Fetch competitor data",
                        "payload": "Collect the top 3 competitors"
                    }
                },
                {
                    "task_key": "analyse",
                    "module_class": "JobModule",
                    "description": "Analyse the data",
                    "status": "blocked",
                    "depends_on": ["fetch_data"],
                    "job_config": {"title": "Analyse", "payload": "Analyse"}
                }
            ],
            "reasoning": "two-step pipeline",
            "changes_explanation": "{}",
            "relationship_graph": {"fetch_data": []}
        });

        let plan: InstancePlan = serde_json::from_value(raw).unwrap();
        assert_eq!(plan.execution_path, ExecutionPath::AgentLoop);
        assert_eq!(plan.active_instances.len(), 2);
        assert_eq!(plan.active_instances[1].depends_on, vec!["fetch_data"]);
        assert!(plan.direct_trigger.is_none());
    }

    #[test]
    fn direct_trigger_plan_may_have_no_instances() {
        let raw = json!({
            "execution_path": "direct_trigger",
            "direct_trigger": {"tool_name": "inbox_mark_read", "arguments": {"message_id": "msg_1"}}
        });
        let plan: InstancePlan = serde_json::from_value(raw).unwrap();
        assert_eq!(plan.execution_path, ExecutionPath::DirectTrigger);
        assert!(plan.active_instances.is_empty());
        assert_eq!(plan.direct_trigger.unwrap().tool_name, "inbox_mark_read");
    }
}
