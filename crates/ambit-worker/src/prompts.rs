// Prompt composition
//
// The job execution prompt is deterministic: fixed section order, fixed
// truncation caps, no LLM in the loop. The planner and interpreter prompts
// live here too so the services stay logic-only.

use ambit_core::plan::JobInfo;
use std::collections::BTreeMap;

/// Truncation caps for job prompt context
pub const ENTITY_DESCRIPTION_CAP: usize = 500;
pub const ENTITY_TAGS_CAP: usize = 10;
pub const ENTITY_PERSONA_CAP: usize = 300;
pub const NARRATIVE_SUMMARY_CAP: usize = 800;

/// Char-boundary-safe truncation
pub fn truncate(text: &str, cap: usize) -> &str {
    match text.char_indices().nth(cap) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// One related entity rendered into the job prompt
#[derive(Debug, Clone)]
pub struct EntityContext {
    pub name: String,
    pub entity_type: String,
    pub description: String,
    pub tags: Vec<String>,
    pub persona: Option<String>,
}

/// One prerequisite task result rendered into the job prompt
#[derive(Debug, Clone)]
pub struct DependencyContext {
    pub instance_id: String,
    pub title: String,
    pub status: String,
    pub output: String,
}

/// Inputs for the deterministic job execution prompt
#[derive(Debug, Clone)]
pub struct JobPromptInputs {
    pub title: String,
    pub description: String,
    pub created_str: String,
    pub now_str: String,
    pub execution_user_id: String,
    pub requester_user_id: String,
    pub entities: Vec<EntityContext>,
    pub narrative_summary: String,
    pub dependencies: Vec<DependencyContext>,
    pub payload: String,
}

/// Assemble the job execution prompt. Section order is fixed; empty sections
/// are omitted entirely.
pub fn build_job_prompt(inputs: &JobPromptInputs) -> String {
    let mut prompt = format!(
        "## Task information\n\
         - Title: {}\n\
         - Description: {}\n\
         - Created: {}\n\
         - Now: {}\n\
         - Executing as: {} (requested by {})\n",
        inputs.title,
        inputs.description,
        inputs.created_str,
        inputs.now_str,
        inputs.execution_user_id,
        inputs.requester_user_id,
    );

    if !inputs.entities.is_empty() {
        prompt.push_str("\n## Related entities\n");
        for entity in &inputs.entities {
            prompt.push_str(&format!("- **{}** ({})\n", entity.name, entity.entity_type));
            if !entity.description.is_empty() {
                prompt.push_str(&format!(
                    "  - Description: {}\n",
                    truncate(&entity.description, ENTITY_DESCRIPTION_CAP)
                ));
            }
            if !entity.tags.is_empty() {
                let tags: Vec<&str> = entity
                    .tags
                    .iter()
                    .take(ENTITY_TAGS_CAP)
                    .map(String::as_str)
                    .collect();
                prompt.push_str(&format!("  - Tags: {}\n", tags.join(", ")));
            }
            if let Some(persona) = &entity.persona {
                prompt.push_str(&format!(
                    "  - Persona: {}\n",
                    truncate(persona, ENTITY_PERSONA_CAP)
                ));
            }
        }
    }

    if !inputs.narrative_summary.is_empty() {
        prompt.push_str(&format!(
            "\n## Current progress\n{}\n",
            truncate(&inputs.narrative_summary, NARRATIVE_SUMMARY_CAP)
        ));
    }

    if !inputs.dependencies.is_empty() {
        prompt.push_str("\n## Prerequisite task results\n");
        for dep in &inputs.dependencies {
            let output = if dep.output.is_empty() {
                "*This task has no output content*"
            } else {
                &dep.output
            };
            prompt.push_str(&format!(
                "### {} (`{}`)\n**Status**: {}\n\n**Execution Output**:\n{}\n\n",
                dep.title, dep.instance_id, dep.status, output
            ));
        }
    }

    prompt.push_str(&format!("\n## Execution instruction\n{}\n", inputs.payload));

    let has_context = !inputs.entities.is_empty()
        || !inputs.narrative_summary.is_empty()
        || !inputs.dependencies.is_empty();
    if has_context {
        prompt.push_str(
            "\nMake full use of the prerequisite task results and context above; \
             do not repeat work that is already done.\n",
        );
    }

    prompt
}

// ============================================================
// Planner prompt
// ============================================================

pub const DECIDER_SYSTEM_PROMPT: &str = r#"You are the task planner of an autonomous agent.

Given the user's message, the agent's current task instances, the conversation summary and the agent's awareness, decide which module instances the agent needs for this turn.

Rules:
- Reuse an existing instance (include its instance_id) instead of creating a duplicate.
- Only JobModule instances take dependencies; depends_on entries are task_keys of sibling instances in this plan.
- A JobModule instance must carry a job_config with title and payload. Use scheduled_at (ISO-8601) for one-off timing, cron or interval_seconds for recurring work, and interval_seconds plus end_condition (and optionally max_iterations) for ongoing work that probes until a condition is met.
- Set related_entity_id when the job acts on a person other than the requesting user.
- Pick execution_path "direct_trigger" only when the request maps to exactly one tool call with fully known arguments; otherwise use "agent_loop".

Respond with a single JSON object:
{
  "execution_path": "agent_loop" | "direct_trigger",
  "active_instances": [
    {
      "task_key": "...",
      "instance_id": "... (only when reusing)",
      "module_class": "ChatModule" | "JobModule",
      "description": "...",
      "status": "active" | "blocked",
      "depends_on": ["task_key", ...],
      "job_config": { "title": "...", "payload": "...", "cron": "...", "interval_seconds": 0, "scheduled_at": "...", "end_condition": "...", "max_iterations": 0, "related_entity_id": "..." }
    }
  ],
  "direct_trigger": { "tool_name": "...", "arguments": {} },
  "reasoning": "...",
  "changes_explanation": "{...}",
  "relationship_graph": {}
}"#;

/// User-side content of the planner call
pub struct DeciderPromptInputs<'a> {
    pub user_input: &'a str,
    pub task_instances_json: String,
    pub capability_info: String,
    pub narrative_summary: &'a str,
    pub history_markdown: &'a str,
    pub awareness: &'a str,
    pub current_user_id: &'a str,
    pub job_info_map: &'a BTreeMap<String, JobInfo>,
}

pub fn build_decider_prompt(inputs: &DeciderPromptInputs<'_>) -> String {
    let job_info = if inputs.job_info_map.is_empty() {
        "(none)".to_string()
    } else {
        serde_json::to_string_pretty(inputs.job_info_map).unwrap_or_else(|_| "(none)".into())
    };
    format!(
        "## Current user\n{}\n\n\
         ## User message\n{}\n\n\
         ## Current task instances\n{}\n\n\
         ## Capability modules (context only, do not plan these)\n{}\n\n\
         ## Active jobs of this narrative\n{}\n\n\
         ## Narrative summary\n{}\n\n\
         ## Recent history\n{}\n\n\
         ## Agent awareness\n{}\n",
        inputs.current_user_id,
        inputs.user_input,
        inputs.task_instances_json,
        inputs.capability_info,
        job_info,
        if inputs.narrative_summary.is_empty() {
            "(empty)"
        } else {
            inputs.narrative_summary
        },
        if inputs.history_markdown.is_empty() {
            "(empty)"
        } else {
            inputs.history_markdown
        },
        if inputs.awareness.is_empty() {
            "(empty)"
        } else {
            inputs.awareness
        },
    )
}

// ============================================================
// Post-run interpreter prompt
// ============================================================

pub const INTERPRETER_SYSTEM_PROMPT: &str = r#"You interpret the finished run of a background job and decide its scheduling outcome.

Given the job's type, trigger configuration, iteration count, prior progress notes, the execution trace and the final output, respond with a single JSON object:
{
  "status": "completed" | "failed" | "active",
  "process_note": "one short progress note",
  "next_run_time": "ISO-8601 UTC instant or null",
  "last_error": "error text or null",
  "should_notify": true | false,
  "notification_summary": "one-line summary for the user or null"
}

Rules by job type:
- one_off: "completed" on success, "failed" on error; next_run_time is null.
- scheduled: "active" between runs. Default next_run_time follows the cron or interval, but you may accelerate or defer it when the trace justifies that.
- ongoing: "active" with your chosen next_run_time, unless the end condition is met or the iteration cap is reached, then "completed"."#;

pub struct InterpreterPromptInputs<'a> {
    pub job_type: &'a str,
    pub trigger_config_json: String,
    pub iteration_count: i32,
    pub process_tail: &'a [String],
    pub trace_summary: &'a str,
    pub final_output: &'a str,
    pub default_next_run: Option<String>,
}

pub fn build_interpreter_prompt(inputs: &InterpreterPromptInputs<'_>) -> String {
    format!(
        "## Job\n- type: {}\n- trigger: {}\n- iterations so far: {}\n- default next run: {}\n\n\
         ## Prior progress notes\n{}\n\n\
         ## Execution trace\n{}\n\n\
         ## Final output\n{}\n",
        inputs.job_type,
        inputs.trigger_config_json,
        inputs.iteration_count,
        inputs.default_next_run.as_deref().unwrap_or("(none)"),
        if inputs.process_tail.is_empty() {
            "(none)".to_string()
        } else {
            inputs
                .process_tail
                .iter()
                .map(|n| format!("- {n}"))
                .collect::<Vec<_>>()
                .join("\n")
        },
        if inputs.trace_summary.is_empty() {
            "(empty)"
        } else {
            inputs.trace_summary
        },
        if inputs.final_output.is_empty() {
            "(no output)"
        } else {
            inputs.final_output
        },
    )
}

// ============================================================
// End-condition judgement prompt (chat-triggered)
// ============================================================

pub const END_CONDITION_SYSTEM_PROMPT: &str = r#"You judge whether an interaction satisfies the end condition of an ongoing job.

Respond with a single JSON object:
{ "condition_met": true | false, "reason": "..." }"#;

pub fn build_end_condition_prompt(
    end_condition: &str,
    job_title: &str,
    user_message: &str,
    agent_reply: &str,
) -> String {
    format!(
        "## Job\n{job_title}\n\n## End condition\n{end_condition}\n\n\
         ## Latest user message\n{user_message}\n\n## Agent reply\n{agent_reply}\n\n\
         Does this interaction satisfy the end condition?"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_inputs() -> JobPromptInputs {
        JobPromptInputs {
            title: "Research competitors".into(),
            description: "Find the top 3".into(),
            created_str: "2026-03-01 09:00 (EST)".into(),
            now_str: "2026-03-02 09:00 (EST)".into(),
            execution_user_id: "user_alice".into(),
            requester_user_id: "user_mgr".into(),
            entities: Vec::new(),
            narrative_summary: String::new(),
            dependencies: Vec::new(),
            payload: "Collect competitor data and summarize.".into(),
        }
    }

    #[test]
    fn empty_sections_are_omitted() {
        let prompt = build_job_prompt(&base_inputs());
        assert!(prompt.contains("## Task information"));
        assert!(prompt.contains("## Execution instruction"));
        assert!(!prompt.contains("## Related entities"));
        assert!(!prompt.contains("## Current progress"));
        assert!(!prompt.contains("## Prerequisite task results"));
        assert!(!prompt.contains("do not repeat work"));
    }

    #[test]
    fn sections_appear_in_fixed_order() {
        let mut inputs = base_inputs();
        inputs.entities.push(EntityContext {
            name: "Alice".into(),
            entity_type: "user".into(),
            description: "Sales target".into(),
            tags: vec!["lead".into()],
            persona: Some("prefers short emails".into()),
        });
        inputs.narrative_summary = "Negotiation is ongoing.".into();
        inputs.dependencies.push(DependencyContext {
            instance_id: "job_a1b2c3d4".into(),
            title: "Fetch data".into(),
            status: "completed".into(),
            output: "42 rows".into(),
        });

        let prompt = build_job_prompt(&inputs);
        let task = prompt.find("## Task information").unwrap();
        let entities = prompt.find("## Related entities").unwrap();
        let progress = prompt.find("## Current progress").unwrap();
        let deps = prompt.find("## Prerequisite task results").unwrap();
        let instruction = prompt.find("## Execution instruction").unwrap();
        assert!(task < entities && entities < progress && progress < deps && deps < instruction);
        assert!(prompt.contains("do not repeat work"));
    }

    #[test]
    fn long_context_is_truncated_at_caps() {
        let mut inputs = base_inputs();
        inputs.narrative_summary = "x".repeat(2000);
        inputs.entities.push(EntityContext {
            name: "Bob".into(),
            entity_type: "user".into(),
            description: "y".repeat(2000),
            tags: (0..30).map(|i| format!("tag{i}")).collect(),
            persona: Some("z".repeat(1000)),
        });

        let prompt = build_job_prompt(&inputs);
        assert!(!prompt.contains(&"x".repeat(801)));
        assert!(!prompt.contains(&"y".repeat(501)));
        assert!(!prompt.contains(&"z".repeat(301)));
        assert!(prompt.contains("tag9"));
        assert!(!prompt.contains("tag10,"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }

    #[test]
    fn empty_dependency_output_gets_placeholder() {
        let mut inputs = base_inputs();
        inputs.dependencies.push(DependencyContext {
            instance_id: "job_00000001".into(),
            title: "Silent task".into(),
            status: "completed".into(),
            output: String::new(),
        });
        let prompt = build_job_prompt(&inputs);
        assert!(prompt.contains("*This task has no output content*"));
    }
}
