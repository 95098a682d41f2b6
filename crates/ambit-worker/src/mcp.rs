// Remote MCP endpoints
//
// Each (agent, user) pair carries a set of named remote tool endpoints. The
// runtime exposes every enabled endpoint as one dispatch tool; validation
// performs a handshake request and records the connection status.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use ambit_core::tools::{Tool, ToolExecutionResult};
use ambit_storage::McpUrlRow;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Handshake against a remote endpoint. Ok means the server answered the
/// initial event stream request.
pub async fn validate_endpoint(url: &str) -> Result<(), String> {
    let client = reqwest::Client::new();
    let response = client
        .get(url)
        .timeout(HANDSHAKE_TIMEOUT)
        .header("Accept", "text/event-stream")
        .send()
        .await
        .map_err(|e| format!("unreachable: {e}"))?;

    if response.status().is_success() {
        Ok(())
    } else {
        Err(format!("handshake rejected: {}", response.status()))
    }
}

/// A remote endpoint surfaced as a single dispatch tool. The model names
/// the remote tool and passes its arguments through.
pub struct McpEndpointTool {
    name: String,
    description: String,
    url: String,
    client: reqwest::Client,
}

impl McpEndpointTool {
    pub fn new(row: &McpUrlRow) -> Arc<dyn Tool> {
        Arc::new(Self {
            name: format!("mcp_{}", row.name.to_lowercase().replace([' ', '-'], "_")),
            description: format!(
                "Call a tool on the remote endpoint {:?}. {}",
                row.name,
                row.description.as_deref().unwrap_or("")
            ),
            url: row.url.clone(),
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl Tool for McpEndpointTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "tool": { "type": "string", "description": "Remote tool name" },
                "arguments": { "type": "object" }
            },
            "required": ["tool"]
        })
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        let Some(tool) = arguments.get("tool").and_then(|v| v.as_str()) else {
            return ToolExecutionResult::tool_error("missing tool");
        };
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {
                "name": tool,
                "arguments": arguments.get("arguments").cloned().unwrap_or(json!({})),
            }
        });

        let response = self
            .client
            .post(&self.url)
            .timeout(CALL_TIMEOUT)
            .json(&payload)
            .send()
            .await;
        match response {
            Ok(response) if response.status().is_success() => {
                match response.json::<Value>().await {
                    Ok(body) => {
                        if let Some(error) = body.get("error") {
                            ToolExecutionResult::tool_error(error.to_string())
                        } else {
                            ToolExecutionResult::success(
                                body.get("result").cloned().unwrap_or(Value::Null),
                            )
                        }
                    }
                    Err(e) => ToolExecutionResult::internal_error(format!("bad response: {e}")),
                }
            }
            Ok(response) => {
                ToolExecutionResult::tool_error(format!("remote error: {}", response.status()))
            }
            Err(e) => ToolExecutionResult::internal_error(format!("endpoint unreachable: {e}")),
        }
    }
}
