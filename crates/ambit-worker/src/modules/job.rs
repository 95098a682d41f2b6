// Job module: background task management
//
// Two hook entry points:
//   - after a JOB-sourced turn, interpret the run via LLM and decide the
//     job's status and next run time (the engine's mechanical update is the
//     fallback when this hook fails)
//   - after a CHAT-sourced turn, judge whether the interaction satisfies an
//     ongoing job's end condition for jobs targeting the current user

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use ambit_core::context::ContextData;
use ambit_core::error::{CoreError, Result};
use ambit_core::ids::{generate_instance_id, generate_long_id};
use ambit_core::llm::{LlmCallConfig, LlmClient, LlmMessage};
use ambit_core::module::{
    AfterEventParams, HookCallbackResult, Module, ModuleBinding, ModuleMeta,
};
use ambit_core::plan::PlannedJobConfig;
use ambit_core::tools::{Tool, ToolExecutionResult};
use ambit_core::types::{
    InstanceStatus, JobStatus, JobType, ModuleClass, ModuleType, NotificationMethod,
    TriggerConfig, WorkingSource,
};
use ambit_storage::{CreateJob, CreateModuleInstance, Database, JobRow};

use crate::config::RuntimeConfig;
use crate::prompts::{
    build_end_condition_prompt, build_interpreter_prompt, InterpreterPromptInputs,
    END_CONDITION_SYSTEM_PROMPT, INTERPRETER_SYSTEM_PROMPT,
};
use crate::schedule::next_run_time;
use crate::sync::derive_trigger;

/// The interpreter's verdict on a finished run
#[derive(Debug, Clone, Deserialize)]
pub struct RunInterpretation {
    pub status: String,
    #[serde(default)]
    pub process_note: Option<String>,
    #[serde(default)]
    pub next_run_time: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub should_notify: bool,
    #[serde(default)]
    pub notification_summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EndConditionVerdict {
    condition_met: bool,
    #[serde(default)]
    reason: String,
}

pub struct JobModule {
    db: Database,
    llm: Arc<dyn LlmClient>,
    config: RuntimeConfig,
}

impl JobModule {
    pub fn new(db: Database, llm: Arc<dyn LlmClient>, config: RuntimeConfig) -> Self {
        Self { db, llm, config }
    }

    fn call_config(&self) -> LlmCallConfig {
        let mut call = LlmCallConfig::for_model(&self.config.model);
        call.timeout_secs = self.config.llm_timeout_secs;
        call
    }

    /// Interpret a finished JOB-sourced run and apply the verdict to the job
    /// row. Returns a callback result when the decision is terminal.
    async fn interpret_job_run(
        &self,
        params: &AfterEventParams,
    ) -> Result<Option<HookCallbackResult>> {
        let instance_id = &params.binding.instance.instance_id;
        let Some(job) = self
            .db
            .get_job_by_instance(instance_id)
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?
        else {
            warn!(instance_id = %instance_id, "No job for instance, skipping interpretation");
            return Ok(None);
        };

        let now = Utc::now();
        let default_next = job
            .trigger()
            .and_then(|trigger| next_run_time(&trigger, now));
        let process_tail: Vec<String> = {
            let notes = job.process_notes();
            let skip = notes.len().saturating_sub(5);
            notes.into_iter().skip(skip).collect()
        };

        let prompt = build_interpreter_prompt(&InterpreterPromptInputs {
            job_type: &job.job_type,
            trigger_config_json: job.trigger_config.to_string(),
            iteration_count: job.iteration_count,
            process_tail: &process_tail,
            trace_summary: &summarize_trace(&params.ctx),
            final_output: &params.final_output,
            default_next_run: default_next.map(|t| t.to_rfc3339()),
        });

        let raw = self
            .llm
            .structured(
                vec![
                    LlmMessage::system(INTERPRETER_SYSTEM_PROMPT),
                    LlmMessage::user(prompt),
                ],
                &self.call_config(),
            )
            .await?;
        let verdict: RunInterpretation = serde_json::from_value(raw)
            .map_err(|e| CoreError::llm(format!("interpreter output did not match schema: {e}")))?;

        let decision = apply_interpretation(&job, &verdict, default_next, now);
        info!(
            job_id = %job.job_id,
            status = %decision.status,
            next_run = ?decision.next_run_time,
            "Run interpretation"
        );

        // Iteration accounting stays with the engine; this hook owns status,
        // next_run_time and last_error
        self.db
            .finalize_job_run(
                &job.job_id,
                decision.status,
                decision.next_run_time,
                now,
                job.iteration_count,
                decision.last_error.as_deref(),
            )
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?;
        if let Some(note) = &verdict.process_note {
            let _ = self.db.append_job_process(&job.job_id, note).await;
        }

        if decision.status.is_terminal() {
            let instance_status = if decision.status == JobStatus::Failed {
                InstanceStatus::Failed
            } else {
                InstanceStatus::Completed
            };
            return Ok(Some(HookCallbackResult {
                instance_id: instance_id.clone(),
                trigger_callback: true,
                instance_status,
                output_data: json!({ "job_id": job.job_id, "status": decision.status.as_str() }),
                notification_message: verdict
                    .should_notify
                    .then(|| verdict.notification_summary.clone())
                    .flatten(),
            }));
        }
        Ok(None)
    }

    /// Chat-sourced turn: check active ongoing jobs targeting the current
    /// user for a satisfied end condition.
    async fn judge_end_conditions(
        &self,
        params: &AfterEventParams,
    ) -> Result<Option<HookCallbackResult>> {
        for inst in &params.turn_instances {
            if inst.module_class != ModuleClass::Job {
                continue;
            }
            let Ok(Some(job)) = self.db.get_job_by_instance(&inst.instance_id).await else {
                continue;
            };
            if job.job_type() != JobType::Ongoing || job.status().is_terminal() {
                continue;
            }
            // Only jobs whose target is the user in this conversation
            let target = job.related_entity_id.as_deref().unwrap_or(&job.user_id);
            if target != params.ctx.user_id {
                continue;
            }
            let Some(TriggerConfig::Ongoing {
                end_condition: Some(end_condition),
                ..
            }) = job.trigger()
            else {
                continue;
            };

            let prompt = build_end_condition_prompt(
                &end_condition,
                &job.title,
                &params.input_content,
                &params.final_output,
            );
            let raw = match self
                .llm
                .structured(
                    vec![
                        LlmMessage::system(END_CONDITION_SYSTEM_PROMPT),
                        LlmMessage::user(prompt),
                    ],
                    &self.call_config(),
                )
                .await
            {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(job_id = %job.job_id, error = %e, "End-condition judgement failed");
                    continue;
                }
            };
            let Ok(verdict) = serde_json::from_value::<EndConditionVerdict>(raw) else {
                continue;
            };

            if verdict.condition_met {
                info!(
                    job_id = %job.job_id,
                    reason = %verdict.reason,
                    "End condition met through chat, completing job"
                );
                self.db
                    .finalize_job_run(
                        &job.job_id,
                        JobStatus::Completed,
                        None,
                        Utc::now(),
                        job.iteration_count + 1,
                        None,
                    )
                    .await
                    .map_err(|e| CoreError::storage(e.to_string()))?;
                return Ok(Some(HookCallbackResult {
                    instance_id: inst.instance_id.clone(),
                    trigger_callback: true,
                    instance_status: InstanceStatus::Completed,
                    output_data: json!({
                        "job_id": job.job_id,
                        "end_condition": end_condition,
                        "reason": verdict.reason,
                    }),
                    notification_message: None,
                }));
            }
        }
        Ok(None)
    }
}

/// Collapse the turn's tool calls into a short trace for the interpreter
fn summarize_trace(ctx: &ContextData) -> String {
    ctx.extra_data
        .get("tool_trace")
        .and_then(|v| v.as_array())
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

/// The applied scheduling decision
#[derive(Debug)]
pub struct SchedulingDecision {
    pub status: JobStatus,
    pub next_run_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Combine the interpreter's verdict with the mechanical defaults. The
/// hook's next_run_time, when present and parseable, is authoritative; the
/// mechanical computation is the fallback.
pub fn apply_interpretation(
    job: &JobRow,
    verdict: &RunInterpretation,
    default_next: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> SchedulingDecision {
    let hook_next = verdict
        .next_run_time
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|t| t.with_timezone(&Utc));

    let status = match (job.job_type(), verdict.status.as_str()) {
        (JobType::OneOff, "failed") => JobStatus::Failed,
        (JobType::OneOff, _) => JobStatus::Completed,
        (_, "completed") => JobStatus::Completed,
        (_, "failed") => JobStatus::Failed,
        _ => JobStatus::Active,
    };

    // Ongoing jobs with an iteration cap complete when the cap is reached
    let status = if status == JobStatus::Active && job.job_type() == JobType::Ongoing {
        let cap = match job.trigger() {
            Some(TriggerConfig::Ongoing { max_iterations, .. }) => max_iterations,
            _ => None,
        };
        match cap {
            Some(cap) if job.iteration_count + 1 >= cap => JobStatus::Completed,
            _ => JobStatus::Active,
        }
    } else {
        status
    };

    let next_run_time = match status {
        JobStatus::Active => hook_next.filter(|t| *t > now - chrono::Duration::minutes(1)).or(default_next),
        _ => None,
    };

    SchedulingDecision {
        status,
        next_run_time,
        last_error: verdict.last_error.clone(),
    }
}

#[async_trait]
impl Module for JobModule {
    fn meta(&self) -> ModuleMeta {
        ModuleMeta {
            class: ModuleClass::Job,
            module_type: ModuleType::Task,
            description: "Background task scheduling: one-off, recurring and ongoing jobs",
            topic_hint: "Scheduled and background work",
        }
    }

    fn instructions(&self, _binding: &ModuleBinding) -> String {
        "You can manage background jobs with the job tools: create one-off, \
         scheduled (cron or interval) and ongoing (condition-terminated) jobs, \
         list them, and cancel jobs you created."
            .to_string()
    }

    fn tools(&self, binding: &ModuleBinding) -> Vec<Arc<dyn Tool>> {
        let identity = ToolIdentity {
            agent_id: binding.instance.agent_id.clone(),
            user_id: binding.user_id.clone(),
            narrative_id: binding.narrative_id.clone(),
        };
        vec![
            Arc::new(JobCreateTool {
                db: self.db.clone(),
                identity: identity.clone(),
            }),
            Arc::new(JobListTool {
                db: self.db.clone(),
                identity: identity.clone(),
            }),
            Arc::new(JobCancelTool {
                db: self.db.clone(),
                identity,
            }),
        ]
    }

    async fn hook_data_gathering(
        &self,
        binding: &ModuleBinding,
        mut ctx: ContextData,
    ) -> Result<ContextData> {
        let Some(narrative_id) = &binding.narrative_id else {
            return Ok(ctx);
        };
        let jobs = self
            .db
            .get_active_jobs_by_narrative(narrative_id, 20)
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?;
        if jobs.is_empty() {
            return Ok(ctx);
        }
        let lines: Vec<String> = jobs
            .iter()
            .map(|job| {
                format!(
                    "- [{}] {} ({}, next run: {})",
                    job.status,
                    job.title,
                    job.job_type,
                    job.next_run_time
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "unscheduled".into())
                )
            })
            .collect();
        ctx.jobs_information = Some(lines.join("\n"));
        Ok(ctx)
    }

    async fn hook_after_event_execution(
        &self,
        params: &AfterEventParams,
    ) -> Result<Option<HookCallbackResult>> {
        match params.binding.working_source {
            WorkingSource::Job => self.interpret_job_run(params).await,
            WorkingSource::Chat => self.judge_end_conditions(params).await,
            WorkingSource::A2a => Ok(None),
        }
    }
}

// ============================================================
// Tools
// ============================================================

#[derive(Clone)]
struct ToolIdentity {
    agent_id: String,
    user_id: String,
    narrative_id: Option<String>,
}

struct JobCreateTool {
    db: Database,
    identity: ToolIdentity,
}

#[async_trait]
impl Tool for JobCreateTool {
    fn name(&self) -> &str {
        "job_create"
    }

    fn description(&self) -> &str {
        "Create a background job. Provide scheduled_at (ISO-8601) for one-off timing, \
         cron or interval_seconds for recurring work, or interval_seconds plus \
         end_condition for ongoing work."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "payload": { "type": "string", "description": "Instruction text executed on each run" },
                "description": { "type": "string" },
                "scheduled_at": { "type": "string" },
                "cron": { "type": "string" },
                "interval_seconds": { "type": "integer" },
                "end_condition": { "type": "string" },
                "max_iterations": { "type": "integer" },
                "related_entity_id": { "type": "string" }
            },
            "required": ["title", "payload"]
        })
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        let config: PlannedJobConfig = match serde_json::from_value(arguments.clone()) {
            Ok(config) => config,
            Err(e) => return ToolExecutionResult::tool_error(format!("bad arguments: {e}")),
        };
        let description = arguments
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or(&config.title)
            .to_string();

        let now = Utc::now();
        let (job_type, trigger) = match derive_trigger(&config, now) {
            Ok(pair) => pair,
            Err(e) => return ToolExecutionResult::tool_error(e),
        };

        let instance_id = generate_instance_id(ModuleClass::Job);
        let mut instance =
            CreateModuleInstance::new(&instance_id, ModuleClass::Job, &self.identity.agent_id);
        instance.user_id = Some(self.identity.user_id.clone());
        instance.description = format!("Execute task: {}", config.title);
        instance.topic_hint = Some(config.title.clone());
        instance.keywords = vec!["job".into(), "task".into(), job_type.as_str().into()];
        instance.state = json!({ "job_type": job_type.as_str(), "progress": [] });

        let job = CreateJob {
            job_id: generate_long_id("job"),
            instance_id: instance_id.clone(),
            agent_id: self.identity.agent_id.clone(),
            user_id: self.identity.user_id.clone(),
            job_type,
            title: config.title.clone(),
            description,
            payload: config.payload.clone(),
            trigger_config: trigger.clone(),
            next_run_time: crate::schedule::initial_run_time(&trigger, false, now),
            related_entity_id: config.related_entity_id.clone(),
            narrative_id: self.identity.narrative_id.clone(),
            notification_method: NotificationMethod::Inbox,
            embedding: None,
        };

        match self
            .db
            .create_job_with_instance(instance, job, self.identity.narrative_id.as_deref())
            .await
        {
            Ok(row) => ToolExecutionResult::success(json!({
                "job_id": row.job_id,
                "instance_id": instance_id,
                "job_type": row.job_type,
                "next_run_time": row.next_run_time.map(|t| t.to_rfc3339()),
            })),
            Err(e) => ToolExecutionResult::internal_error(e.to_string()),
        }
    }
}

struct JobListTool {
    db: Database,
    identity: ToolIdentity,
}

#[async_trait]
impl Tool for JobListTool {
    fn name(&self) -> &str {
        "job_list"
    }

    fn description(&self) -> &str {
        "List the current user's background jobs for this agent."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: Value) -> ToolExecutionResult {
        match self
            .db
            .list_jobs_for_user(&self.identity.user_id, Some(&self.identity.agent_id))
            .await
        {
            Ok(jobs) => ToolExecutionResult::success(json!(jobs
                .iter()
                .map(|job| {
                    json!({
                        "job_id": job.job_id,
                        "title": job.title,
                        "job_type": job.job_type,
                        "status": job.status,
                        "next_run_time": job.next_run_time.map(|t| t.to_rfc3339()),
                        "iteration_count": job.iteration_count,
                    })
                })
                .collect::<Vec<_>>())),
            Err(e) => ToolExecutionResult::internal_error(e.to_string()),
        }
    }
}

struct JobCancelTool {
    db: Database,
    identity: ToolIdentity,
}

#[async_trait]
impl Tool for JobCancelTool {
    fn name(&self) -> &str {
        "job_cancel"
    }

    fn description(&self) -> &str {
        "Cancel one of the current user's jobs. Only the creator may cancel."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "job_id": { "type": "string" } },
            "required": ["job_id"]
        })
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        let Some(job_id) = arguments.get("job_id").and_then(|v| v.as_str()) else {
            return ToolExecutionResult::tool_error("missing job_id");
        };
        match self
            .db
            .transition_job_by_creator(job_id, &self.identity.user_id, JobStatus::Cancelled)
            .await
        {
            Ok(job) => {
                debug!(job_id = %job.job_id, "Job cancelled via tool");
                ToolExecutionResult::success(json!({ "job_id": job.job_id, "status": job.status }))
            }
            Err(e) => ToolExecutionResult::tool_error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn job_row(job_type: JobType, trigger: TriggerConfig, iterations: i32) -> JobRow {
        JobRow {
            job_id: "job_000000000001".into(),
            instance_id: "job_a1b2c3d4".into(),
            agent_id: "agent_1".into(),
            user_id: "user_1".into(),
            job_type: job_type.as_str().into(),
            title: "t".into(),
            description: "d".into(),
            payload: "p".into(),
            trigger_config: serde_json::to_value(&trigger).unwrap(),
            status: "running".into(),
            process: json!([]),
            last_run_time: None,
            next_run_time: None,
            last_error: None,
            iteration_count: iterations,
            related_entity_id: None,
            narrative_id: None,
            monitored_job_ids: json!([]),
            notification_method: "inbox".into(),
            embedding: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn verdict(status: &str, next: Option<&str>) -> RunInterpretation {
        RunInterpretation {
            status: status.into(),
            process_note: None,
            next_run_time: next.map(String::from),
            last_error: None,
            should_notify: false,
            notification_summary: None,
        }
    }

    #[test]
    fn one_off_success_completes_with_no_next_run() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let job = job_row(
            JobType::OneOff,
            TriggerConfig::OneOff { run_at: now },
            0,
        );
        // Even a confused "active" verdict cannot keep a one-off alive
        let decision = apply_interpretation(&job, &verdict("active", None), None, now);
        assert_eq!(decision.status, JobStatus::Completed);
        assert_eq!(decision.next_run_time, None);
    }

    #[test]
    fn scheduled_hook_override_beats_mechanical_default() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let trigger = TriggerConfig::Scheduled {
            cron: None,
            interval_seconds: Some(3600),
        };
        let job = job_row(JobType::Scheduled, trigger.clone(), 2);
        let default_next = next_run_time(&trigger, now);

        let decision = apply_interpretation(
            &job,
            &verdict("active", Some("2026-03-10T12:10:00Z")),
            default_next,
            now,
        );
        assert_eq!(decision.status, JobStatus::Active);
        assert_eq!(
            decision.next_run_time,
            Some(Utc.with_ymd_and_hms(2026, 3, 10, 12, 10, 0).unwrap())
        );

        // Without an override the mechanical default applies
        let decision = apply_interpretation(&job, &verdict("active", None), default_next, now);
        assert_eq!(decision.next_run_time, default_next);
    }

    #[test]
    fn ongoing_iteration_cap_completes_the_job() {
        let now = Utc::now();
        let trigger = TriggerConfig::Ongoing {
            interval_seconds: 86400,
            end_condition: Some("order placed".into()),
            max_iterations: Some(3),
        };
        let job = job_row(JobType::Ongoing, trigger, 2); // this run is the 3rd
        let decision = apply_interpretation(&job, &verdict("active", None), None, now);
        assert_eq!(decision.status, JobStatus::Completed);
        assert_eq!(decision.next_run_time, None);
    }

    #[test]
    fn unparseable_hook_time_falls_back_to_default() {
        let now = Utc::now();
        let trigger = TriggerConfig::Ongoing {
            interval_seconds: 600,
            end_condition: Some("done".into()),
            max_iterations: None,
        };
        let job = job_row(JobType::Ongoing, trigger.clone(), 0);
        let default_next = next_run_time(&trigger, now);
        let decision = apply_interpretation(
            &job,
            &verdict("active", Some("tomorrow-ish")),
            default_next,
            now,
        );
        assert_eq!(decision.next_run_time, default_next);
    }
}
