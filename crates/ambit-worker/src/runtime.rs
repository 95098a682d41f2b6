// Agent runtime: drives one turn of one agent
//
// Narrative resolution -> module loading -> parallel data gathering + merge ->
// execution (direct trigger or streamed agent loop with tool dispatch) ->
// event persistence -> post-hooks. Stream messages go to the caller's
// channel; a closed channel cancels the turn at the next suspension point.

use std::sync::Arc;

use futures::future::join_all;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use ambit_core::context::ContextData;
use ambit_core::error::{CoreError, Result};
use ambit_core::ids::generate_long_id;
use ambit_core::llm::{LlmCallConfig, LlmClient, LlmMessage, LlmStreamEvent};
use ambit_core::module::{AfterEventParams, HookCallbackResult, ModuleBinding, ModuleRegistry};
use ambit_core::plan::ExecutionPath;
use ambit_core::protocol::StreamMessage;
use ambit_core::tools::{ToolCall, ToolRegistry};
use ambit_core::types::{
    EventLogEntry, InstanceStatus, ModuleInstance, NarrativeInfo, WorkingSource,
};
use ambit_storage::{CreateEvent, Database, McpUrlRow, NarrativeRow};

use crate::config::RuntimeConfig;
use crate::factory::InstanceFactory;
use crate::mcp::McpEndpointTool;
use crate::module_service::{LoadResult, ModuleService};
use crate::modules::chat::SEND_MESSAGE_TOOL;

/// Parameters for one turn
#[derive(Debug, Clone)]
pub struct RunParams {
    pub agent_id: String,
    pub user_id: String,
    pub input_content: String,
    pub working_source: WorkingSource,
    /// Background runs pin the turn to the job's narrative
    pub forced_narrative_id: Option<String>,
}

/// What a finished turn produced
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub event_id: String,
    pub narrative_id: String,
    /// User-visible output: the send-message tool content when present,
    /// otherwise the concatenated text deltas
    pub final_output: String,
    pub raw_output: String,
    pub tool_names: Vec<String>,
    pub callbacks: Vec<HookCallbackResult>,
}

#[derive(Clone)]
pub struct AgentRuntime {
    db: Database,
    llm: Arc<dyn LlmClient>,
    registry: ModuleRegistry,
    module_service: ModuleService,
    factory: InstanceFactory,
    config: RuntimeConfig,
}

impl AgentRuntime {
    pub fn new(
        db: Database,
        llm: Arc<dyn LlmClient>,
        registry: ModuleRegistry,
        module_service: ModuleService,
        factory: InstanceFactory,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            db,
            llm,
            registry,
            module_service,
            factory,
            config,
        }
    }

    /// Run one turn, streaming progress to `tx`. The event row persists up
    /// to the point of failure; an error here still leaves forensic state.
    pub async fn run(
        &self,
        params: RunParams,
        tx: mpsc::Sender<StreamMessage>,
    ) -> Result<TurnOutcome> {
        let result = self.run_inner(&params, &tx).await;
        if let Err(e) = &result {
            let _ = tx
                .send(StreamMessage::error(e.to_string(), error_type(e)))
                .await;
        }
        result
    }

    async fn run_inner(
        &self,
        params: &RunParams,
        tx: &mpsc::Sender<StreamMessage>,
    ) -> Result<TurnOutcome> {
        send(tx, StreamMessage::progress("narrative", "Resolving narrative")).await?;
        let narrative = self.resolve_narrative(params).await?;
        let narrative_id = narrative.narrative_id.clone();
        let info = narrative.info();

        let awareness = self
            .db
            .get_awareness(&params.agent_id)
            .await
            .map(|row| row.map(|r| r.awareness).unwrap_or_default())
            .unwrap_or_default();
        let history = self.history_markdown(&narrative_id).await;

        send(tx, StreamMessage::progress("modules", "Planning module instances")).await?;
        let load = self
            .module_service
            .load_modules(
                &params.agent_id,
                &params.user_id,
                &narrative_id,
                &params.input_content,
                &info.current_summary,
                &history,
                &awareness,
                params.working_source,
            )
            .await?;

        let bindings = self.make_bindings(&load, params, &narrative_id);

        // Parallel data gathering with deterministic merge
        let base_ctx = {
            let mut ctx = ContextData::new(
                &params.agent_id,
                &params.user_id,
                &params.input_content,
            );
            ctx.instance_ids = bindings
                .iter()
                .map(|b| b.instance.instance_id.clone())
                .collect();
            ctx.narrative_summary = (!info.current_summary.is_empty())
                .then(|| info.current_summary.clone());
            ctx
        };
        send(tx, StreamMessage::progress("context", "Gathering module context")).await?;
        let mut ctx = self.gather_context(&bindings, &base_ctx).await;

        // Tool surface for the turn: module tools plus remote MCP endpoints
        let mut tools = ToolRegistry::new();
        for binding in &bindings {
            if let Some(module) = self.registry.get(binding.instance.module_class) {
                tools.register_all(module.tools(binding));
            }
        }
        for row in self.enabled_mcp_urls(params).await {
            tools.register(McpEndpointTool::new(&row));
        }

        let mut event_log: Vec<EventLogEntry> = Vec::new();
        let mut tool_names: Vec<String> = Vec::new();
        let mut user_visible_reply: Option<String> = None;
        let raw_output;

        match load.execution_type {
            ExecutionPath::DirectTrigger => {
                let trigger = load
                    .direct_trigger
                    .clone()
                    .ok_or_else(|| CoreError::validation("direct trigger missing"))?;
                send(
                    tx,
                    StreamMessage::progress("direct_trigger", format!("Invoking {}", trigger.tool_name)),
                )
                .await?;
                let call = ToolCall {
                    id: "direct_trigger".into(),
                    name: trigger.tool_name.clone(),
                    arguments: trigger.arguments.clone(),
                };
                let result = tools.dispatch(&call).await;
                let output = result
                    .result
                    .clone()
                    .unwrap_or_else(|| json!(result.error.clone().unwrap_or_default()));
                send(
                    tx,
                    StreamMessage::ToolCall {
                        tool_name: trigger.tool_name.clone(),
                        tool_input: trigger.arguments.clone(),
                        tool_output: output.clone(),
                    },
                )
                .await?;
                event_log.push(EventLogEntry::tool_call(
                    trigger.tool_name.clone(),
                    trigger.arguments.clone(),
                    output.clone(),
                ));
                tool_names.push(trigger.tool_name);
                raw_output = stringify(&output);
            }
            ExecutionPath::AgentLoop => {
                raw_output = self
                    .agent_loop(
                        params,
                        &bindings,
                        &ctx,
                        &tools,
                        tx,
                        &mut event_log,
                        &mut tool_names,
                        &mut user_visible_reply,
                    )
                    .await?;
            }
        }

        let final_output = user_visible_reply.clone().unwrap_or_else(|| raw_output.clone());

        // Persist the event before post-hooks so hooks can reference it
        let event_id = generate_long_id("event");
        event_log.push(EventLogEntry::complete("turn finished"));
        self.db
            .create_event(CreateEvent {
                event_id: event_id.clone(),
                narrative_id: narrative_id.clone(),
                agent_id: params.agent_id.clone(),
                user_id: Some(params.user_id.clone()),
                trigger: params.input_content.clone(),
                trigger_source: params.working_source.as_str().to_string(),
                final_output: Some(final_output.clone()),
                event_log: serde_json::to_value(&event_log).unwrap_or(json!([])),
            })
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?;

        // Post-hooks see the user-visible reply and the tool trace
        if let Some(reply) = &user_visible_reply {
            ctx.extra_data.insert("user_visible_reply".into(), json!(reply));
        }
        ctx.extra_data
            .insert("tool_trace".into(), json!(tool_names));

        let turn_instances: Vec<ModuleInstance> =
            bindings.iter().map(|b| b.instance.clone()).collect();
        let callbacks = self
            .run_post_hooks(&bindings, params, &final_output, &event_id, &ctx, &turn_instances)
            .await;
        for callback in &callbacks {
            if matches!(
                callback.instance_status,
                InstanceStatus::Completed | InstanceStatus::Failed | InstanceStatus::Cancelled
            ) {
                if let Err(e) = self
                    .db
                    .complete_instance_for_callback(
                        &callback.instance_id,
                        callback.instance_status,
                    )
                    .await
                {
                    error!(instance_id = %callback.instance_id, error = %e, "Failed to apply hook callback");
                }
            }
        }

        send(
            tx,
            StreamMessage::Complete {
                message: "done".into(),
            },
        )
        .await?;

        info!(
            event_id = %event_id,
            narrative_id = %narrative_id,
            tools = tool_names.len(),
            "Turn complete"
        );
        Ok(TurnOutcome {
            event_id,
            narrative_id,
            final_output,
            raw_output,
            tool_names,
            callbacks,
        })
    }

    /// Locate or create the narrative for this turn
    async fn resolve_narrative(&self, params: &RunParams) -> Result<NarrativeRow> {
        if let Some(forced) = &params.forced_narrative_id {
            return self
                .db
                .get_narrative(forced)
                .await
                .map_err(|e| CoreError::storage(e.to_string()))?
                .ok_or_else(|| CoreError::not_found("narrative"));
        }

        if let Some(found) = self
            .db
            .find_narrative_by_actor(&params.agent_id, &params.user_id)
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?
        {
            return Ok(found);
        }

        // First contact: agent-level instances, narrative, chat instance
        self.factory
            .create_agent_level_instances(&params.agent_id)
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?;
        let info = NarrativeInfo::for_pair(&params.agent_id, &params.user_id);
        let narrative = self
            .db
            .create_narrative(&params.agent_id, &info)
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?;
        self.factory
            .create_chat_instance(&params.agent_id, &params.user_id, &narrative.narrative_id)
            .await
            .map_err(|e| CoreError::storage(e.to_string()))?;
        info!(narrative_id = %narrative.narrative_id, "Created narrative for first contact");
        Ok(narrative)
    }

    async fn history_markdown(&self, narrative_id: &str) -> String {
        let events = match self.db.list_events_for_narrative(narrative_id, 200).await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Failed to load event history");
                return String::new();
            }
        };
        let skip = events.len().saturating_sub(10);
        events
            .into_iter()
            .skip(skip)
            .map(|event| {
                format!(
                    "**{}**: {}\n**agent**: {}\n",
                    event.user_id.as_deref().unwrap_or("system"),
                    event.trigger,
                    event.final_output.as_deref().unwrap_or("")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn make_bindings(
        &self,
        load: &LoadResult,
        params: &RunParams,
        narrative_id: &str,
    ) -> Vec<ModuleBinding> {
        load.active_instances
            .iter()
            .filter(|inst| self.registry.has(inst.module_class))
            .map(|inst| ModuleBinding {
                instance: inst.clone(),
                user_id: params.user_id.clone(),
                narrative_id: Some(narrative_id.to_string()),
                working_source: params.working_source,
            })
            .collect()
    }

    /// Run every module's data-gathering hook against its own copy and
    /// merge. A hook that fails is logged and skipped; the turn continues.
    async fn gather_context(
        &self,
        bindings: &[ModuleBinding],
        base: &ContextData,
    ) -> ContextData {
        let futures: Vec<_> = bindings
            .iter()
            .filter_map(|binding| {
                self.registry
                    .get(binding.instance.module_class)
                    .map(|module| {
                        let module = module.clone();
                        let ctx = base.clone();
                        async move {
                            (
                                binding.instance.module_class,
                                module.hook_data_gathering(binding, ctx).await,
                            )
                        }
                    })
            })
            .collect();

        let mut updates = Vec::with_capacity(futures.len());
        for (class, result) in join_all(futures).await {
            match result {
                Ok(update) => updates.push(update),
                Err(e) => warn!(module = %class, error = %e, "Data-gathering hook failed, skipping"),
            }
        }
        ContextData::merge(base, updates)
    }

    #[allow(clippy::too_many_arguments)]
    async fn agent_loop(
        &self,
        params: &RunParams,
        bindings: &[ModuleBinding],
        ctx: &ContextData,
        tools: &ToolRegistry,
        tx: &mpsc::Sender<StreamMessage>,
        event_log: &mut Vec<EventLogEntry>,
        tool_names: &mut Vec<String>,
        user_visible_reply: &mut Option<String>,
    ) -> Result<String> {
        let system_prompt = self.compose_system_prompt(bindings, ctx);
        let mut call = LlmCallConfig::for_model(&self.config.model)
            .with_tools(tools.definitions());
        call.timeout_secs = self.config.llm_timeout_secs;

        let mut messages = vec![
            LlmMessage::system(system_prompt),
            LlmMessage::user(&params.input_content),
        ];
        let mut raw_output = String::new();

        for iteration in 1..=self.config.max_loop_iterations {
            debug!(iteration, "Agent loop iteration");
            let mut stream = self.llm.chat_stream(messages.clone(), &call).await?;
            let mut iteration_text = String::new();
            let mut tool_calls: Vec<ToolCall> = Vec::new();

            while let Some(event) = stream.next().await {
                match event? {
                    LlmStreamEvent::TextDelta(delta) => {
                        iteration_text.push_str(&delta);
                        event_log.push(EventLogEntry::agent_delta(&delta));
                        send(tx, StreamMessage::AgentResponse { delta }).await?;
                    }
                    LlmStreamEvent::ThinkingDelta(thinking) => {
                        event_log.push(EventLogEntry::thinking(&thinking));
                        send(
                            tx,
                            StreamMessage::AgentThinking {
                                thinking_content: thinking,
                            },
                        )
                        .await?;
                    }
                    LlmStreamEvent::ToolCalls(calls) => tool_calls.extend(calls),
                    LlmStreamEvent::Done(_) => {}
                    LlmStreamEvent::Error(e) => return Err(CoreError::llm(e)),
                }
            }

            raw_output.push_str(&iteration_text);

            if tool_calls.is_empty() {
                return Ok(raw_output);
            }

            messages.push(LlmMessage::assistant_tool_calls(
                iteration_text,
                tool_calls.clone(),
            ));

            for tool_call in &tool_calls {
                if tool_call.name == SEND_MESSAGE_TOOL {
                    if let Some(content) =
                        tool_call.arguments.get("content").and_then(|v| v.as_str())
                    {
                        *user_visible_reply = Some(content.to_string());
                    }
                }
                let result = tools.dispatch(tool_call).await;
                let output = result
                    .result
                    .clone()
                    .unwrap_or_else(|| json!(result.error.clone().unwrap_or_default()));
                send(
                    tx,
                    StreamMessage::ToolCall {
                        tool_name: tool_call.name.clone(),
                        tool_input: tool_call.arguments.clone(),
                        tool_output: output.clone(),
                    },
                )
                .await?;
                event_log.push(EventLogEntry::tool_call(
                    tool_call.name.clone(),
                    tool_call.arguments.clone(),
                    output.clone(),
                ));
                tool_names.push(tool_call.name.clone());
                messages.push(LlmMessage::tool_result(
                    tool_call.id.clone(),
                    stringify(&output),
                ));
            }

            if iteration == self.config.max_loop_iterations {
                return Err(CoreError::MaxIterationsReached(
                    self.config.max_loop_iterations,
                ));
            }
        }

        Ok(raw_output)
    }

    fn compose_system_prompt(&self, bindings: &[ModuleBinding], ctx: &ContextData) -> String {
        let mut sections: Vec<String> = Vec::new();

        for binding in bindings {
            if let Some(module) = self.registry.get(binding.instance.module_class) {
                let text = module.instructions(binding);
                if !text.is_empty() {
                    sections.push(text);
                }
            }
        }

        if let Some(awareness) = &ctx.awareness {
            sections.push(format!("## Awareness\n{awareness}"));
        }
        if let Some(summary) = &ctx.narrative_summary {
            sections.push(format!("## Conversation summary\n{summary}"));
        }
        if let Some(jobs) = &ctx.jobs_information {
            sections.push(format!("## Active jobs\n{jobs}"));
        }
        if !ctx.user_profile.is_empty() {
            sections.push(format!(
                "## User profile\n{}",
                serde_json::to_string_pretty(&ctx.user_profile).unwrap_or_default()
            ));
        }
        if !ctx.extra_data.is_empty() {
            sections.push(format!(
                "## Context\n{}",
                serde_json::to_string_pretty(&ctx.extra_data).unwrap_or_default()
            ));
        }
        if !ctx.chat_history.is_empty() {
            let rendered: Vec<String> = ctx
                .chat_history
                .iter()
                .map(|msg| {
                    let track = msg
                        .memory_type
                        .map(|t| match t {
                            ambit_core::context::MemoryTrack::LongTerm => " [long_term]",
                            ambit_core::context::MemoryTrack::ShortTerm => " [short_term]",
                        })
                        .unwrap_or("");
                    format!("{}{}: {}", msg.role, track, msg.content)
                })
                .collect();
            sections.push(format!("## Recalled messages\n{}", rendered.join("\n")));
        }

        sections.join("\n\n")
    }

    async fn run_post_hooks(
        &self,
        bindings: &[ModuleBinding],
        params: &RunParams,
        final_output: &str,
        event_id: &str,
        ctx: &ContextData,
        turn_instances: &[ModuleInstance],
    ) -> Vec<HookCallbackResult> {
        let mut callbacks = Vec::new();
        for binding in bindings {
            let Some(module) = self.registry.get(binding.instance.module_class) else {
                continue;
            };
            let hook_params = AfterEventParams {
                binding: binding.clone(),
                input_content: params.input_content.clone(),
                final_output: final_output.to_string(),
                event_id: event_id.to_string(),
                ctx: ctx.clone(),
                turn_instances: turn_instances.to_vec(),
            };
            match module.hook_after_event_execution(&hook_params).await {
                Ok(Some(callback)) => callbacks.push(callback),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        module = %binding.instance.module_class,
                        error = %e,
                        "Post-event hook failed, skipping"
                    );
                }
            }
        }
        callbacks
    }

    async fn enabled_mcp_urls(&self, params: &RunParams) -> Vec<McpUrlRow> {
        match self
            .db
            .list_mcp_urls(&params.agent_id, &params.user_id, true)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Failed to load MCP endpoints");
                Vec::new()
            }
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

/// Channel send that maps a dropped receiver to turn cancellation
async fn send(tx: &mpsc::Sender<StreamMessage>, message: StreamMessage) -> Result<()> {
    tx.send(message).await.map_err(|_| CoreError::Cancelled)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn error_type(error: &CoreError) -> &'static str {
    match error {
        CoreError::Llm(_) => "llm",
        CoreError::ToolExecution(_) => "tool",
        CoreError::Storage(_) => "storage",
        CoreError::Validation(_) => "validation",
        CoreError::NotFound(_) => "not_found",
        CoreError::Unauthorized(_) => "authorization",
        CoreError::CircularDependency(_) => "validation",
        CoreError::MaxIterationsReached(_) => "agent_loop",
        CoreError::Cancelled => "cancelled",
        CoreError::Internal(_) => "internal",
    }
}
