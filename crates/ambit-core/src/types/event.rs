// Event log entries: the ordered trace of one agent turn

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry in an event's `event_log`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum EventLogEntry {
    Progress {
        step: String,
        description: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
        timestamp: DateTime<Utc>,
    },
    Thinking {
        content: String,
        timestamp: DateTime<Utc>,
    },
    AgentDelta {
        delta: String,
        timestamp: DateTime<Utc>,
    },
    ToolCall {
        tool_name: String,
        tool_input: Value,
        tool_output: Value,
        timestamp: DateTime<Utc>,
    },
    Error {
        error_message: String,
        error_type: String,
        timestamp: DateTime<Utc>,
    },
    Complete {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl EventLogEntry {
    pub fn progress(step: impl Into<String>, description: impl Into<String>) -> Self {
        EventLogEntry::Progress {
            step: step.into(),
            description: description.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn progress_with_details(
        step: impl Into<String>,
        description: impl Into<String>,
        details: Value,
    ) -> Self {
        EventLogEntry::Progress {
            step: step.into(),
            description: description.into(),
            details: Some(details),
            timestamp: Utc::now(),
        }
    }

    pub fn thinking(content: impl Into<String>) -> Self {
        EventLogEntry::Thinking {
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn agent_delta(delta: impl Into<String>) -> Self {
        EventLogEntry::AgentDelta {
            delta: delta.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn tool_call(tool_name: impl Into<String>, tool_input: Value, tool_output: Value) -> Self {
        EventLogEntry::ToolCall {
            tool_name: tool_name.into(),
            tool_input,
            tool_output,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        EventLogEntry::Error {
            error_message: message.into(),
            error_type: error_type.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn complete(message: impl Into<String>) -> Self {
        EventLogEntry::Complete {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Message classification for inbox rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxMessageType {
    AgentMessage,
    JobResult,
    System,
}

impl InboxMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboxMessageType::AgentMessage => "agent_message",
            InboxMessageType::JobResult => "job_result",
            InboxMessageType::System => "system",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn log_entries_tag_on_entry_field() {
        let entry = EventLogEntry::tool_call("job_create", json!({"title": "x"}), json!("ok"));
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["entry"], "tool_call");
        assert_eq!(value["tool_name"], "job_create");
    }
}
