// Stream protocol messages for the run endpoint
//
// Every message carries a `type` discriminator. The server streams these
// over the WebSocket until it sends `complete` or `error`; `heartbeat` fires
// every 15 s while idle.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client request that opens a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub agent_id: String,
    pub user_id: String,
    pub input_content: String,
    #[serde(default)]
    pub working_source: crate::types::WorkingSource,
}

/// Server-to-client stream messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Heartbeat,
    Progress {
        step: String,
        description: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    AgentThinking {
        thinking_content: String,
    },
    AgentResponse {
        delta: String,
    },
    ToolCall {
        tool_name: String,
        tool_input: Value,
        tool_output: Value,
    },
    Error {
        error_message: String,
        error_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        traceback: Option<String>,
    },
    Complete {
        message: String,
    },
}

impl StreamMessage {
    pub fn progress(step: impl Into<String>, description: impl Into<String>) -> Self {
        StreamMessage::Progress {
            step: step.into(),
            description: description.into(),
            details: None,
        }
    }

    pub fn error(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        StreamMessage::Error {
            error_message: message.into(),
            error_type: error_type.into(),
            traceback: None,
        }
    }

    /// True for the two messages that close the stream
    pub fn is_final(&self) -> bool {
        matches!(self, StreamMessage::Complete { .. } | StreamMessage::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_type_discriminator() {
        let msg = StreamMessage::AgentResponse {
            delta: "hel".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "agent_response");
        assert_eq!(json["delta"], "hel");

        let hb = serde_json::to_value(StreamMessage::Heartbeat).unwrap();
        assert_eq!(hb["type"], "heartbeat");
    }

    #[test]
    fn run_request_defaults_to_chat_source() {
        let req: RunRequest = serde_json::from_str(
            r#"{"agent_id":"agent_1","user_id":"user_1","input_content":"hi"}"#,
        )
        .unwrap();
        assert_eq!(req.working_source, crate::types::WorkingSource::Chat);
    }
}
