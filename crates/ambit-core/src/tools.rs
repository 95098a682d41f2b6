// Tool abstraction for the agent loop
//
// Modules contribute tools; the runtime routes tool calls from the model to
// the registry. Error handling distinguishes tool-level errors (shown to the
// model) from internal errors (logged, replaced with a generic message).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

/// Definition of a callable tool, as advertised to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Result of a tool call, fed back to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of executing a tool
#[derive(Debug)]
pub enum ToolExecutionResult {
    /// Success; the value is returned to the model
    Success(Value),
    /// Expected error the model should see ("job not found", bad arguments)
    ToolError(String),
    /// System failure; logged and replaced with a generic message so internal
    /// details (connection strings, stack traces) never reach the model
    InternalError(String),
}

impl ToolExecutionResult {
    pub fn success(value: impl Into<Value>) -> Self {
        ToolExecutionResult::Success(value.into())
    }

    pub fn tool_error(message: impl Into<String>) -> Self {
        ToolExecutionResult::ToolError(message.into())
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        ToolExecutionResult::InternalError(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolExecutionResult::Success(_))
    }

    pub fn into_tool_result(self, tool_call_id: &str, tool_name: &str) -> ToolResult {
        match self {
            ToolExecutionResult::Success(value) => ToolResult {
                tool_call_id: tool_call_id.to_string(),
                result: Some(value),
                error: None,
            },
            ToolExecutionResult::ToolError(message) => ToolResult {
                tool_call_id: tool_call_id.to_string(),
                result: None,
                error: Some(message),
            },
            ToolExecutionResult::InternalError(message) => {
                error!(
                    tool_name = %tool_name,
                    tool_call_id = %tool_call_id,
                    error = %message,
                    "Tool internal error (details hidden from model)"
                );
                ToolResult {
                    tool_call_id: tool_call_id.to_string(),
                    result: None,
                    error: Some("An internal error occurred while executing the tool".to_string()),
                }
            }
        }
    }
}

/// A callable tool
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object
    fn parameters(&self) -> Value;

    async fn execute(&self, arguments: Value) -> ToolExecutionResult;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Registry of tools available to one turn
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn register_all(&mut self, tools: Vec<Arc<dyn Tool>>) {
        for tool in tools {
            self.register(tool);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute one call, turning unknown tool names into tool-level errors
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        match self.tools.get(&call.name) {
            Some(tool) => {
                let outcome = tool.execute(call.arguments.clone()).await;
                outcome.into_tool_result(&call.id, &call.name)
            }
            None => ToolResult {
                tool_call_id: call.id.clone(),
                result: None,
                error: Some(format!("Unknown tool: {}", call.name)),
            },
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.tools.keys().collect();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input back"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        async fn execute(&self, arguments: Value) -> ToolExecutionResult {
            match arguments.get("text") {
                Some(text) => ToolExecutionResult::success(text.clone()),
                None => ToolExecutionResult::tool_error("missing text"),
            }
        }
    }

    #[tokio::test]
    async fn dispatch_routes_to_registered_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let result = registry
            .dispatch(&ToolCall {
                id: "call_1".into(),
                name: "echo".into(),
                arguments: json!({"text": "hi"}),
            })
            .await;
        assert_eq!(result.result, Some(json!("hi")));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn unknown_tool_is_a_tool_level_error() {
        let registry = ToolRegistry::new();
        let result = registry
            .dispatch(&ToolCall {
                id: "call_2".into(),
                name: "nope".into(),
                arguments: json!({}),
            })
            .await;
        assert!(result.error.unwrap().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn internal_errors_are_masked() {
        struct Boom;
        #[async_trait]
        impl Tool for Boom {
            fn name(&self) -> &str {
                "boom"
            }
            fn description(&self) -> &str {
                "always fails"
            }
            fn parameters(&self) -> Value {
                json!({"type": "object"})
            }
            async fn execute(&self, _arguments: Value) -> ToolExecutionResult {
                ToolExecutionResult::internal_error("pg: connection refused at 10.0.0.3")
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Boom));
        let result = registry
            .dispatch(&ToolCall {
                id: "call_3".into(),
                name: "boom".into(),
                arguments: json!({}),
            })
            .await;
        let err = result.error.unwrap();
        assert!(!err.contains("10.0.0.3"));
    }
}
