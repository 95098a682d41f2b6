// Chat module: conversation history and dual-track memory
//
// Long-term track: episodes semantically relevant to the narrative from the
// memory service, falling back to the per-instance JSON memory when the
// service is down. Capped at 20 round-pairs (40 messages).
// Short-term track: the most recent K messages from the user's other chat
// instances (different narratives). Messages from non-chat working sources
// keep only the assistant side.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use ambit_core::context::{ChatMessage, ContextData, MemoryTrack};
use ambit_core::error::Result;
use ambit_core::module::{
    AfterEventParams, Module, ModuleBinding, ModuleMeta,
};
use ambit_core::tools::{Tool, ToolExecutionResult};
use ambit_core::types::{ModuleClass, ModuleType, WorkingSource};
use ambit_storage::{Database, MemoryScope};

use crate::memory_client::MemoryClient;

/// Tool the agent uses to speak to the user; the runtime extracts the
/// content as the user-visible reply.
pub const SEND_MESSAGE_TOOL: &str = "send_message_to_user_directly";

const LONG_TERM_PAIR_CAP: usize = 20;
const SHORT_TERM_MESSAGE_CAP: usize = 15;

pub struct ChatModule {
    db: Database,
    memory: MemoryClient,
}

impl ChatModule {
    pub fn new(db: Database, memory: MemoryClient) -> Self {
        Self { db, memory }
    }

    async fn load_long_term(
        &self,
        binding: &ModuleBinding,
        ctx: &ContextData,
    ) -> Vec<ChatMessage> {
        let instance_id = &binding.instance.instance_id;

        // Preferred source: the memory service
        match self
            .memory
            .search(
                &ctx.agent_id,
                &ctx.user_id,
                &ctx.input_content,
                LONG_TERM_PAIR_CAP * 2,
            )
            .await
        {
            Ok(episodes) if !episodes.is_empty() => {
                return episodes
                    .into_iter()
                    .take(LONG_TERM_PAIR_CAP * 2)
                    .map(|ep| ChatMessage {
                        role: ep.role,
                        content: ep.content,
                        memory_type: Some(MemoryTrack::LongTerm),
                        instance_id: Some(instance_id.clone()),
                        working_source: None,
                    })
                    .collect();
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Memory service search failed, falling back to DB memory");
            }
        }

        // Fallback: per-instance JSON memory
        self.read_instance_memory(instance_id)
            .await
            .into_iter()
            .rev()
            .take(LONG_TERM_PAIR_CAP * 2)
            .rev()
            .map(|mut msg| {
                msg.memory_type = Some(MemoryTrack::LongTerm);
                msg.instance_id = Some(instance_id.clone());
                msg
            })
            .collect()
    }

    async fn load_short_term(&self, binding: &ModuleBinding, ctx: &ContextData) -> Vec<ChatMessage> {
        let own_id = &binding.instance.instance_id;
        let rows = match self
            .db
            .get_instances_by_agent(&ctx.agent_id, Some(ModuleClass::Chat), None)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Failed to list chat instances for short-term memory");
                return Vec::new();
            }
        };

        let mut messages = Vec::new();
        for row in rows {
            if &row.instance_id == own_id || row.user_id.as_deref() != Some(&ctx.user_id) {
                continue;
            }
            let other_id = row.instance_id.clone();
            for mut msg in self.read_instance_memory(&other_id).await {
                // Cross-narrative recall keeps only the agent's side of
                // non-chat turns
                if msg.working_source.is_some_and(|ws| ws != WorkingSource::Chat)
                    && msg.role != "assistant"
                {
                    continue;
                }
                msg.memory_type = Some(MemoryTrack::ShortTerm);
                msg.instance_id = Some(other_id.clone());
                messages.push(msg);
            }
        }

        let skip = messages.len().saturating_sub(SHORT_TERM_MESSAGE_CAP);
        messages.split_off(skip)
    }

    async fn read_instance_memory(&self, instance_id: &str) -> Vec<ChatMessage> {
        match self
            .db
            .get_memory(MemoryScope::Instance, "chat", instance_id)
            .await
        {
            Ok(Some(Value::Array(items))) => items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            Ok(_) => Vec::new(),
            Err(e) => {
                debug!(instance_id = %instance_id, error = %e, "Chat memory read failed");
                Vec::new()
            }
        }
    }

    async fn append_turn(
        &self,
        instance_id: &str,
        working_source: WorkingSource,
        user_message: &str,
        assistant_reply: &str,
    ) {
        let mut memory = self.read_instance_memory(instance_id).await;
        memory.push(ChatMessage {
            role: "user".into(),
            content: user_message.to_string(),
            memory_type: None,
            instance_id: None,
            working_source: Some(working_source),
        });
        memory.push(ChatMessage {
            role: "assistant".into(),
            content: assistant_reply.to_string(),
            memory_type: None,
            instance_id: None,
            working_source: Some(working_source),
        });

        let payload = match serde_json::to_value(&memory) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to serialize chat memory");
                return;
            }
        };
        if let Err(e) = self
            .db
            .upsert_memory(MemoryScope::Instance, "chat", instance_id, &payload)
            .await
        {
            warn!(instance_id = %instance_id, error = %e, "Failed to persist chat memory");
        }
    }
}

#[async_trait]
impl Module for ChatModule {
    fn meta(&self) -> ModuleMeta {
        ModuleMeta {
            class: ModuleClass::Chat,
            module_type: ModuleType::Capability,
            description: "Conversation management, chat history and user-facing replies",
            topic_hint: "Chat interactions and message history",
        }
    }

    fn instructions(&self, _binding: &ModuleBinding) -> String {
        format!(
            "You are chatting with a user. Use the `{SEND_MESSAGE_TOOL}` tool to send \
             your reply; its content is what the user sees. Recalled messages are \
             tagged long_term (this conversation's past) or short_term (the same \
             user in other conversations)."
        )
    }

    fn tools(&self, _binding: &ModuleBinding) -> Vec<Arc<dyn Tool>> {
        vec![Arc::new(SendMessageTool)]
    }

    async fn hook_data_gathering(
        &self,
        binding: &ModuleBinding,
        mut ctx: ContextData,
    ) -> Result<ContextData> {
        let long_term = self.load_long_term(binding, &ctx).await;
        let short_term = self.load_short_term(binding, &ctx).await;
        debug!(
            long_term = long_term.len(),
            short_term = short_term.len(),
            "Chat memory loaded"
        );
        ctx.chat_history.extend(long_term);
        ctx.chat_history.extend(short_term);
        Ok(ctx)
    }

    async fn hook_after_event_execution(
        &self,
        params: &AfterEventParams,
    ) -> Result<Option<ambit_core::module::HookCallbackResult>> {
        // The user-visible assistant turn is the send-message tool content,
        // not the raw loop text
        let reply = extract_user_visible_reply(&params.ctx.extra_data, &params.final_output);

        self.append_turn(
            &params.binding.instance.instance_id,
            params.binding.working_source,
            &params.input_content,
            &reply,
        )
        .await;

        if let Some(narrative_id) = &params.binding.narrative_id {
            self.memory
                .write_turn(
                    &params.ctx.agent_id,
                    &params.ctx.user_id,
                    narrative_id,
                    &params.input_content,
                    &reply,
                )
                .await;
        }

        Ok(None)
    }
}

/// The runtime records the send-message tool content under
/// extra_data["user_visible_reply"]; fall back to the loop's final text,
/// then to a placeholder.
pub fn extract_user_visible_reply(
    extra_data: &serde_json::Map<String, Value>,
    final_output: &str,
) -> String {
    if let Some(reply) = extra_data
        .get("user_visible_reply")
        .and_then(|v| v.as_str())
    {
        if !reply.is_empty() {
            return reply.to_string();
        }
    }
    if !final_output.trim().is_empty() {
        return final_output.to_string();
    }
    "(no response)".to_string()
}

struct SendMessageTool;

#[async_trait]
impl Tool for SendMessageTool {
    fn name(&self) -> &str {
        SEND_MESSAGE_TOOL
    }

    fn description(&self) -> &str {
        "Send a message directly to the user. The content is shown verbatim."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "The message to show the user" }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        match arguments.get("content").and_then(|v| v.as_str()) {
            Some(_) => ToolExecutionResult::success(json!({ "delivered": true })),
            None => ToolExecutionResult::tool_error("missing content"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_extraction_prefers_tool_content() {
        let mut extra = serde_json::Map::new();
        extra.insert("user_visible_reply".into(), json!("Hello from the tool"));
        assert_eq!(
            extract_user_visible_reply(&extra, "loop text"),
            "Hello from the tool"
        );

        let empty = serde_json::Map::new();
        assert_eq!(extract_user_visible_reply(&empty, "loop text"), "loop text");
        assert_eq!(extract_user_visible_reply(&empty, "  "), "(no response)");
    }
}
