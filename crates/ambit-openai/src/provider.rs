// OpenAI-protocol LLM client
//
// Implements LlmClient for OpenAI-compatible APIs: streaming chat with tool
// calls over SSE, JSON-mode structured completions and text embeddings.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ambit_core::error::{CoreError, Result};
use ambit_core::llm::{
    parse_structured_json, LlmCallConfig, LlmClient, LlmCompletionMetadata, LlmMessage,
    LlmResponseStream, LlmRole, LlmStreamEvent,
};
use ambit_core::tools::{ToolCall, ToolDefinition};

use crate::types::*;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    embedding_model: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }

    /// Build from OPENAI_API_KEY (plus optional OPENAI_BASE_URL /
    /// EMBEDDING_MODEL overrides)
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| CoreError::llm("OPENAI_API_KEY environment variable not set"))?;
        let mut provider = Self::new(api_key);
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            provider.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            provider.embedding_model = model;
        }
        Ok(provider)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let mut provider = Self::new(api_key);
        provider.base_url = base_url.into().trim_end_matches('/').to_string();
        provider
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn convert_role(role: LlmRole) -> &'static str {
        match role {
            LlmRole::System => "system",
            LlmRole::User => "user",
            LlmRole::Assistant => "assistant",
            LlmRole::Tool => "tool",
        }
    }

    fn convert_message(msg: &LlmMessage) -> OpenAiMessage {
        OpenAiMessage {
            role: Self::convert_role(msg.role).to_string(),
            content: Some(msg.content.clone()),
            tool_calls: msg.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|tc| OpenAiToolCall {
                        id: tc.id.clone(),
                        r#type: "function".to_string(),
                        function: OpenAiFunctionCall {
                            name: tc.name.clone(),
                            arguments: serde_json::to_string(&tc.arguments)
                                .unwrap_or_default(),
                        },
                    })
                    .collect()
            }),
            tool_call_id: msg.tool_call_id.clone(),
        }
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<OpenAiTool> {
        tools
            .iter()
            .map(|tool| OpenAiTool {
                r#type: "function".to_string(),
                function: OpenAiFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect()
    }

    fn build_request(
        messages: &[LlmMessage],
        config: &LlmCallConfig,
        stream: bool,
        json_mode: bool,
    ) -> OpenAiRequest {
        OpenAiRequest {
            model: config.model.clone(),
            messages: messages.iter().map(Self::convert_message).collect(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            stream,
            tools: if config.tools.is_empty() {
                None
            } else {
                Some(Self::convert_tools(&config.tools))
            },
            response_format: json_mode.then(|| OpenAiResponseFormat {
                r#type: "json_object".to_string(),
            }),
        }
    }
}

/// Accumulates tool-call fragments across stream chunks
#[derive(Default)]
struct ToolCallAccumulator {
    calls: Vec<(String, String, String)>, // (id, name, arguments-so-far)
}

impl ToolCallAccumulator {
    fn apply(&mut self, delta: &StreamToolCallDelta) {
        while self.calls.len() <= delta.index {
            self.calls.push((String::new(), String::new(), String::new()));
        }
        let slot = &mut self.calls[delta.index];
        if let Some(id) = &delta.id {
            slot.0 = id.clone();
        }
        if let Some(function) = &delta.function {
            if let Some(name) = &function.name {
                slot.1.push_str(name);
            }
            if let Some(arguments) = &function.arguments {
                slot.2.push_str(arguments);
            }
        }
    }

    fn finish(&mut self) -> Vec<ToolCall> {
        self.calls
            .drain(..)
            .filter(|(_, name, _)| !name.is_empty())
            .map(|(id, name, arguments)| ToolCall {
                id,
                name,
                arguments: serde_json::from_str(&arguments)
                    .unwrap_or(Value::Object(Default::default())),
            })
            .collect()
    }

    fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat_stream(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponseStream> {
        let request = Self::build_request(&messages, config, true, false);

        let response = self
            .client
            .post(self.chat_url())
            .timeout(Duration::from_secs(config.timeout_secs))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::llm(format!("Failed to send request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CoreError::llm(format!(
                "API error ({status}): {error_text}"
            )));
        }

        let model = config.model.clone();
        let accumulator = Arc::new(Mutex::new(ToolCallAccumulator::default()));
        let usage = Arc::new(Mutex::new(LlmCompletionMetadata {
            model: Some(model),
            ..Default::default()
        }));

        let event_stream = response.bytes_stream().eventsource();
        let converted: LlmResponseStream = Box::pin(event_stream.filter_map(move |result| {
            let accumulator = Arc::clone(&accumulator);
            let usage = Arc::clone(&usage);
            async move {
                match result {
                    Ok(event) => {
                        if event.data == "[DONE]" {
                            let calls = accumulator.lock().unwrap().finish();
                            if !calls.is_empty() {
                                // ToolCalls must flush before Done; emit them
                                // here and let the trailing Done carry usage
                                return Some(Ok(LlmStreamEvent::ToolCalls(calls)));
                            }
                            return Some(Ok(LlmStreamEvent::Done(
                                usage.lock().unwrap().clone(),
                            )));
                        }
                        let chunk: StreamChunk = match serde_json::from_str(&event.data) {
                            Ok(chunk) => chunk,
                            Err(e) => {
                                return Some(Ok(LlmStreamEvent::Error(format!(
                                    "bad stream chunk: {e}"
                                ))))
                            }
                        };
                        if let Some(u) = chunk.usage {
                            let mut meta = usage.lock().unwrap();
                            meta.prompt_tokens = u.prompt_tokens;
                            meta.completion_tokens = u.completion_tokens;
                            meta.total_tokens = u.total_tokens;
                        }
                        let Some(choice) = chunk.choices.into_iter().next() else {
                            return None;
                        };
                        if let Some(reason) = choice.finish_reason {
                            usage.lock().unwrap().finish_reason = Some(reason);
                        }
                        if let Some(calls) = &choice.delta.tool_calls {
                            let mut acc = accumulator.lock().unwrap();
                            for delta in calls {
                                acc.apply(delta);
                            }
                        }
                        if let Some(thinking) = choice.delta.reasoning_content {
                            if !thinking.is_empty() {
                                return Some(Ok(LlmStreamEvent::ThinkingDelta(thinking)));
                            }
                        }
                        if let Some(content) = choice.delta.content {
                            if !content.is_empty() {
                                return Some(Ok(LlmStreamEvent::TextDelta(content)));
                            }
                        }
                        None
                    }
                    Err(e) => Some(Err(CoreError::llm(format!("stream error: {e}")))),
                }
            }
        }));

        Ok(converted)
    }

    async fn structured(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<Value> {
        let request = Self::build_request(&messages, config, false, true);

        let response = self
            .client
            .post(self.chat_url())
            .timeout(Duration::from_secs(config.timeout_secs))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::llm(format!("Failed to send request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CoreError::llm(format!(
                "API error ({status}): {error_text}"
            )));
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| CoreError::llm(format!("bad completion response: {e}")))?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CoreError::llm("completion returned no content"))?;

        parse_structured_json(&content)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: self.embedding_model.clone(),
            input: text.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .timeout(Duration::from_secs(30))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::llm(format!("Failed to send embedding request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CoreError::llm(format!(
                "Embedding API error ({status}): {error_text}"
            )));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| CoreError::llm(format!("bad embedding response: {e}")))?;
        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| CoreError::llm("embedding response was empty"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_call_fragments_accumulate_by_index() {
        let mut acc = ToolCallAccumulator::default();
        acc.apply(&StreamToolCallDelta {
            index: 0,
            id: Some("call_1".into()),
            function: Some(StreamFunctionDelta {
                name: Some("job_create".into()),
                arguments: Some("{\"ti".into()),
            }),
        });
        acc.apply(&StreamToolCallDelta {
            index: 0,
            id: None,
            function: Some(StreamFunctionDelta {
                name: None,
                arguments: Some("tle\": \"x\"}".into()),
            }),
        });
        let calls = acc.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "job_create");
        assert_eq!(calls[0].arguments, json!({"title": "x"}));
    }

    #[test]
    fn malformed_arguments_degrade_to_empty_object() {
        let mut acc = ToolCallAccumulator::default();
        acc.apply(&StreamToolCallDelta {
            index: 0,
            id: Some("call_1".into()),
            function: Some(StreamFunctionDelta {
                name: Some("noop".into()),
                arguments: Some("{broken".into()),
            }),
        });
        let calls = acc.finish();
        assert_eq!(calls[0].arguments, json!({}));
    }

    #[test]
    fn request_includes_json_mode_only_when_asked() {
        let config = LlmCallConfig::for_model("gpt-4o-mini");
        let request =
            OpenAiClient::build_request(&[LlmMessage::user("hi")], &config, false, true);
        assert!(request.response_format.is_some());
        let request =
            OpenAiClient::build_request(&[LlmMessage::user("hi")], &config, true, false);
        assert!(request.response_format.is_none());
        assert!(request.stream);
    }
}
