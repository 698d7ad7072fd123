use futures::{SinkExt, StreamExt};
use jsonrpcmsg::{Id, Message, Response};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use super::types::{CallToolResult, InitializeResult, PROTOCOL_VERSION, ToolDefinition, ToolsListResult};
use crate::bridge::SessionStreams;
use crate::message::{self, METHOD_NOT_FOUND};
use crate::{Error, Result};

/// An MCP client over one bridged session.
///
/// Requests are issued one at a time; each call waits for its response.
#[derive(Debug)]
pub struct McpClient {
    streams: SessionStreams,
    next_id: u64,
}

impl McpClient {
    pub fn new(streams: SessionStreams) -> Self {
        Self { streams, next_id: 0 }
    }

    /// Perform the `initialize` handshake and send `notifications/initialized`.
    pub async fn initialize(&mut self) -> Result<InitializeResult> {
        let result: InitializeResult = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )
            .await?;
        self.notify("notifications/initialized", Value::Null).await?;
        debug!(server = %result.server_info.name, "Initialized");
        Ok(result)
    }

    pub async fn ping(&mut self) -> Result<()> {
        let _: Value = self.request("ping", Value::Null).await?;
        Ok(())
    }

    pub async fn list_tools(&mut self) -> Result<Vec<ToolDefinition>> {
        let result: ToolsListResult = self.request("tools/list", json!({})).await?;
        Ok(result.tools)
    }

    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<CallToolResult> {
        self.request("tools/call", json!({"name": name, "arguments": arguments}))
            .await
    }

    pub async fn notify(&mut self, method: &str, params: Value) -> Result<()> {
        let notification = message::notification(method, params)?;
        self.send(notification).await
    }

    /// Send a request and wait for the response with the same id.
    pub async fn request<T: DeserializeOwned>(&mut self, method: &str, params: Value) -> Result<T> {
        self.next_id += 1;
        let id = Id::String(self.next_id.to_string());
        self.send(message::request(id.clone(), method, params)?).await?;

        let response = self.wait_for_response(&id).await?;
        if let Some(error) = response.error {
            return Err(Error::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        let result = response.result.unwrap_or(Value::Null);
        serde_json::from_value(result)
            .map_err(|e| Error::Protocol(format!("unexpected {method} result: {e}")))
    }

    async fn send(&mut self, message: Message) -> Result<()> {
        self.streams
            .outgoing
            .send(message)
            .await
            .map_err(|_| Error::StreamClosed)
    }

    async fn wait_for_response(&mut self, id: &Id) -> Result<Response> {
        loop {
            let Some(item) = self.streams.incoming.next().await else {
                return Err(Error::StreamClosed);
            };
            match item? {
                Message::Response(response) => match &response.id {
                    Some(response_id) if message::id_matches(response_id, id) => {
                        return Ok(response);
                    }
                    _ => warn!(id = ?response.id, "Ignoring response to another request"),
                },
                Message::Request(request) => match request.id {
                    Some(request_id) => {
                        debug!(method = %request.method, "Rejecting server request");
                        let reply = message::error(
                            Some(request_id),
                            METHOD_NOT_FOUND,
                            format!("Method not found: {}", request.method),
                        );
                        self.send(reply).await?;
                    }
                    None => trace!(method = %request.method, "Ignoring server notification"),
                },
            }
        }
    }
}
