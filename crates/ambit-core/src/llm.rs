// LLM client trait
//
// Providers implement streaming chat with tool calls, a JSON-mode structured
// completion, and text embeddings. The runtime never talks to a provider SDK
// directly.

use async_trait::async_trait;
use futures::Stream;
use futures::StreamExt;
use std::pin::Pin;

use crate::error::{CoreError, Result};
use crate::tools::{ToolCall, ToolDefinition};

/// Type alias for the streaming response
pub type LlmResponseStream = Pin<Box<dyn Stream<Item = Result<LlmStreamEvent>> + Send>>;

/// Events emitted during streaming
#[derive(Debug, Clone)]
pub enum LlmStreamEvent {
    /// Incremental text content
    TextDelta(String),
    /// Incremental thinking content (models that expose it)
    ThinkingDelta(String),
    /// Tool calls requested by the model
    ToolCalls(Vec<ToolCall>),
    /// Stream finished
    Done(LlmCompletionMetadata),
    /// Provider-side error mid-stream
    Error(String),
}

/// Metadata about a finished completion
#[derive(Debug, Clone, Default)]
pub struct LlmCompletionMetadata {
    pub total_tokens: Option<u32>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub model: Option<String>,
    pub finish_reason: Option<String>,
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmRole {
    System,
    User,
    Assistant,
    Tool,
}

/// Provider-agnostic message
#[derive(Debug, Clone)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub tool_call_id: Option<String>,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::System,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::User,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::Assistant,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: LlmRole::Assistant,
            content: content.into(),
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Configuration for a single call
#[derive(Debug, Clone)]
pub struct LlmCallConfig {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub tools: Vec<ToolDefinition>,
    /// Per-call timeout in seconds (turn-level default 60, memory search 30)
    pub timeout_secs: u64,
}

impl LlmCallConfig {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            max_tokens: None,
            tools: Vec::new(),
            timeout_secs: 60,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// Response from a non-streaming call
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub metadata: LlmCompletionMetadata,
}

/// Trait for LLM providers
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Streaming chat completion
    async fn chat_stream(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponseStream>;

    /// Non-streaming completion (collects the stream)
    async fn chat(&self, messages: Vec<LlmMessage>, config: &LlmCallConfig) -> Result<LlmResponse> {
        let mut stream = self.chat_stream(messages, config).await?;
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut metadata = LlmCompletionMetadata::default();

        while let Some(event) = stream.next().await {
            match event? {
                LlmStreamEvent::TextDelta(delta) => text.push_str(&delta),
                LlmStreamEvent::ThinkingDelta(_) => {}
                LlmStreamEvent::ToolCalls(calls) => tool_calls.extend(calls),
                LlmStreamEvent::Done(meta) => metadata = meta,
                LlmStreamEvent::Error(err) => return Err(CoreError::llm(err)),
            }
        }

        Ok(LlmResponse {
            text,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            metadata,
        })
    }

    /// JSON-mode completion, returned as a raw value. Callers deserialize
    /// into their own schema and decide how to handle mismatches.
    async fn structured(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<serde_json::Value>;

    /// Embed one text into a vector
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Parse a structured response, tolerating markdown code fences around the
/// JSON body (models wrap output in ```json … ``` more often than not).
pub fn parse_structured_json(raw: &str) -> Result<serde_json::Value> {
    let trimmed = raw.trim();
    let body = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.trim_end_matches("```").trim()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.trim_end_matches("```").trim()
    } else {
        trimmed
    };
    serde_json::from_str(body)
        .map_err(|e| CoreError::llm(format!("structured response is not valid JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_fenced_json() {
        let plain = parse_structured_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(plain["a"], 1);

        let fenced = parse_structured_json("```json\n{\"a\": 2}\n```").unwrap();
        assert_eq!(fenced["a"], 2);

        let bare_fence = parse_structured_json("```\n{\"a\": 3}\n```").unwrap();
        assert_eq!(bare_fence["a"], 3);

        assert!(parse_structured_json("not json").is_err());
    }
}
