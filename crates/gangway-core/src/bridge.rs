use std::sync::{Arc, Weak};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::client::{McpClient, McpToolInfo};
use crate::tool::{Tool, ToolResult};

/// Wraps one MCP server tool as a framework `Tool`.
///
/// Registered as `mcp__{server}__{tool}`. Holds only a weak reference to the
/// owning session's client: once the provider closes, every invocation fails
/// with an error result instead of reaching a dead transport.
pub struct McpToolAdapter {
    client: Weak<McpClient>,
    info: McpToolInfo,
    registered_name: String,
}

impl McpToolAdapter {
    pub fn new(client: &Arc<McpClient>, info: McpToolInfo) -> Self {
        let registered_name = format!("mcp__{}__{}", client.server_name, info.name);
        Self {
            client: Arc::downgrade(client),
            info,
            registered_name,
        }
    }
}

#[async_trait]
impl Tool for McpToolAdapter {
    fn name(&self) -> &str {
        &self.registered_name
    }

    fn description(&self) -> &str {
        &self.info.description
    }

    fn parameters(&self) -> Value {
        self.info.input_schema.clone()
    }

    async fn call(&self, args: Value) -> Result<ToolResult> {
        let Some(client) = self.client.upgrade() else {
            return Ok(ToolResult::err(format!(
                "MCP session is closed: tool '{}' is no longer available",
                self.registered_name
            )));
        };
        match client.call_tool(&self.info.name, args).await {
            Ok((content, is_error)) => Ok(ToolResult { content, is_error }),
            Err(e) => Ok(ToolResult::err(e.to_string())),
        }
    }
}

/// Exposes an MCP server's resources as a readable tool.
///
/// Registered as `mcp__{server}__read_resource`.
pub struct McpResourceAdapter {
    client: Weak<McpClient>,
    registered_name: String,
}

impl McpResourceAdapter {
    pub fn new(client: &Arc<McpClient>) -> Self {
        let registered_name = format!("mcp__{}__read_resource", client.server_name);
        Self {
            client: Arc::downgrade(client),
            registered_name,
        }
    }
}

#[async_trait]
impl Tool for McpResourceAdapter {
    fn name(&self) -> &str {
        &self.registered_name
    }

    fn description(&self) -> &str {
        "Read a resource from the MCP server by URI"
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "uri": {
                    "type": "string",
                    "description": "The resource URI to read"
                }
            },
            "required": ["uri"]
        })
    }

    async fn call(&self, args: Value) -> Result<ToolResult> {
        let Some(client) = self.client.upgrade() else {
            return Ok(ToolResult::err(format!(
                "MCP session is closed: tool '{}' is no longer available",
                self.registered_name
            )));
        };
        let uri = args["uri"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("uri is required"))?;

        match client.read_resource(uri).await {
            Ok(contents) => {
                let text = contents
                    .iter()
                    .filter_map(|c| c.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(ToolResult::ok(text))
            }
            Err(e) => Ok(ToolResult::err(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{SseTransport, Transport};
    use serde_json::json;
    use std::time::{Duration, Instant};

    fn offline_client() -> Arc<McpClient> {
        // Nothing listens on port 1; good enough for a handle that must die.
        Arc::new(McpClient::with_transport(
            "stub",
            Transport::Sse(SseTransport::new("http://127.0.0.1:1")),
        ))
    }

    fn echo_info() -> McpToolInfo {
        McpToolInfo {
            name: "echo".into(),
            description: "Echo text back".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }),
        }
    }

    #[test]
    fn adapter_translates_descriptor_fields() {
        let client = offline_client();
        let adapter = McpToolAdapter::new(&client, echo_info());

        assert_eq!(adapter.name(), "mcp__stub__echo");
        assert_eq!(adapter.description(), "Echo text back");
        assert_eq!(adapter.parameters()["required"][0], "text");
    }

    #[tokio::test]
    async fn dead_handle_fails_with_error_result() {
        let client = offline_client();
        let adapter = McpToolAdapter::new(&client, echo_info());
        drop(client);

        let result = adapter.call(json!({ "text": "hi" })).await.unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("session is closed"));
    }

    #[test]
    fn dead_handle_blocking_path_returns_quickly() {
        let client = offline_client();
        let adapter = McpToolAdapter::new(&client, echo_info());
        drop(client);

        let started = Instant::now();
        let result = adapter.call_blocking(json!({ "text": "hi" })).unwrap();
        assert!(result.is_error);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn remote_failure_surfaces_without_masking() {
        let client = offline_client();
        let adapter = McpToolAdapter::new(&client, echo_info());

        let result = adapter.call(json!({ "text": "hi" })).await.unwrap();
        assert!(result.is_error);
        assert!(!result.content.is_empty());
    }

    #[tokio::test]
    async fn resource_adapter_requires_uri() {
        let client = offline_client();
        let adapter = McpResourceAdapter::new(&client);

        assert_eq!(adapter.name(), "mcp__stub__read_resource");
        let err = adapter.call(json!({})).await.unwrap_err();
        assert!(err.to_string().contains("uri"));
    }

    #[tokio::test]
    async fn resource_adapter_dead_handle_fails() {
        let client = offline_client();
        let adapter = McpResourceAdapter::new(&client);
        drop(client);

        let result = adapter.call(json!({ "uri": "file:///x" })).await.unwrap();
        assert!(result.is_error);
    }
}
