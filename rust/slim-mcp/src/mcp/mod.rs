//! A minimal MCP server and client driven over bridged session streams.
//!
//! Only the tool surface is implemented: `initialize`, `ping`, `tools/list`
//! and `tools/call`.

mod client;
mod server;
pub mod types;

pub use client::McpClient;
pub use server::{McpServer, ToolHandler};
pub use types::{CallToolResult, InitializeResult, ToolDefinition};
