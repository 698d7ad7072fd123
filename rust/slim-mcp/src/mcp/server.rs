use std::collections::BTreeMap;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use jsonrpcmsg::{Message, Request};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use super::types::{
    CallToolResult, Capabilities, Content, InitializeResult, PROTOCOL_VERSION, ServerInfo,
    ToolDefinition, ToolsCapability, ToolsListResult,
};
use crate::bridge::SessionStreams;
use crate::message::{
    self, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::server::ProtocolHandler;
use crate::{Error, Result};

/// Tool implementation: arguments in, JSON result or error text out.
pub type ToolHandler = Arc<dyn Fn(Value) -> std::result::Result<Value, String> + Send + Sync>;

#[derive(Clone)]
struct Tool {
    definition: ToolDefinition,
    handler: ToolHandler,
}

/// An MCP server exposing a fixed set of tools.
///
/// Cloning is cheap; the acceptor clones one server per session.
#[derive(Clone)]
pub struct McpServer {
    info: ServerInfo,
    tools: Arc<BTreeMap<String, Tool>>,
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("info", &self.info)
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl McpServer {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: ServerInfo {
                name: name.into(),
                version: version.into(),
            },
            tools: Arc::new(BTreeMap::new()),
        }
    }

    /// Register a tool. A tool with the same name is replaced.
    #[must_use]
    pub fn with_tool<F>(mut self, definition: ToolDefinition, handler: F) -> Self
    where
        F: Fn(Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        let tool = Tool {
            definition,
            handler: Arc::new(handler),
        };
        Arc::make_mut(&mut self.tools).insert(tool.definition.name.clone(), tool);
        self
    }

    /// What this server announces in its `initialize` result.
    pub fn create_initialization_options(&self) -> InitializeResult {
        InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: Capabilities {
                tools: ToolsCapability {
                    list_changed: false,
                },
            },
            server_info: self.info.clone(),
        }
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition.clone()).collect()
    }

    /// Answer a single request. Notifications get `None`.
    pub fn handle_request(&self, request: Request) -> Option<Message> {
        let Some(id) = request.id.clone() else {
            debug!(method = %request.method, "Notification received");
            return None;
        };
        debug!(method = %request.method, "Handling MCP request");

        let reply = match request.method.as_str() {
            "initialize" => to_result_or_internal_error(&self.create_initialization_options()),
            "ping" => Ok(json!({})),
            "tools/list" => to_result_or_internal_error(&ToolsListResult {
                tools: self.tool_definitions(),
            }),
            "tools/call" => self.call_tool(&message::params_value(request.params.as_ref())),
            other => {
                debug!(method = %other, "Unknown method");
                Err((METHOD_NOT_FOUND, format!("Method not found: {other}")))
            }
        };

        Some(match reply {
            Ok(result) => message::success(Some(id), result),
            Err((code, text)) => message::error(Some(id), code, text),
        })
    }

    fn call_tool(&self, params: &Value) -> std::result::Result<Value, (i32, String)> {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return Err((INVALID_PARAMS, "Missing tool name".to_string()));
        };
        let Some(tool) = self.tools.get(name) else {
            return Err((INVALID_PARAMS, format!("Unknown tool: {name}")));
        };
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        info!(tool = %name, "Executing tool");
        let result = match (tool.handler)(arguments) {
            Ok(value) => CallToolResult {
                content: vec![Content::text(
                    serde_json::to_string_pretty(&value).unwrap_or_default(),
                )],
                is_error: None,
            },
            Err(e) => {
                error!(tool = %name, error = %e, "Tool execution failed");
                CallToolResult {
                    content: vec![Content::text(format!("Error: {e}"))],
                    is_error: Some(true),
                }
            }
        };
        to_result_or_internal_error(&result)
    }
}

fn to_result_or_internal_error<T: Serialize>(data: &T) -> std::result::Result<Value, (i32, String)> {
    serde_json::to_value(data).map_err(|e| {
        error!("Failed to serialize result: {}", e);
        (INTERNAL_ERROR, "Internal serialization error".to_string())
    })
}

impl ProtocolHandler for McpServer {
    async fn serve(self, streams: SessionStreams) -> Result<()> {
        let SessionStreams {
            mut incoming,
            mut outgoing,
        } = streams;

        while let Some(item) = incoming.next().await {
            let reply = match item {
                Ok(Message::Request(request)) => self.handle_request(request),
                Ok(Message::Response(response)) => {
                    debug!(id = ?response.id, "Ignoring unsolicited response");
                    None
                }
                Err(Error::Decode { source }) => {
                    warn!(error = %source, "Replying with parse error");
                    Some(message::error(None, PARSE_ERROR, format!("Parse error: {source}")))
                }
                Err(Error::InvalidMessage(reason)) => {
                    warn!(%reason, "Replying with invalid request error");
                    Some(message::error(
                        None,
                        INVALID_REQUEST,
                        format!("Invalid request: {reason}"),
                    ))
                }
                Err(error) => return Err(error),
            };

            if let Some(reply) = reply {
                outgoing
                    .send(reply)
                    .await
                    .map_err(|_| Error::StreamClosed)?;
            }
        }

        debug!("Incoming stream ended");
        Ok(())
    }
}
