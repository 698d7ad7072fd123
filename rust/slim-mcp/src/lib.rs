//! # slim-mcp
//!
//! JSON-RPC (MCP) message streams carried over message-addressed transport
//! sessions.
//!
//! A transport session is bidirectional; a protocol engine wants an inbound
//! stream and an outbound sink. The [`bridge`] converts one into the other and
//! keeps both directions alive exactly as long as the session is usable.
//! On top of it sit two lifecycle managers:
//!
//! - [`client`]: open a session to a destination, use it through bridged
//!   streams, and always delete it afterwards.
//! - [`server`]: accept sessions forever, serving each with its own bridge and
//!   protocol handler, isolated from every other session.
//!
//! The consumed transport surface is described by the traits in
//! [`transport`]; [`transport::local`] implements them in-process. [`mcp`] is a
//! small tool-serving MCP engine used over the bridge.
//!
//! ```no_run
//! use std::sync::Arc;
//! use slim_mcp::mcp::{McpClient, McpServer};
//! use slim_mcp::setup::{DEFAULT_SHARED_SECRET, create_local_app};
//! use slim_mcp::transport::{Name, SessionConfig, local::LocalService};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> slim_mcp::Result<()> {
//! let service = LocalService::new();
//! let server_name: Name = "org/default/mcp1".parse().unwrap();
//! let (server_app, _) = create_local_app(&service, &server_name, None, DEFAULT_SHARED_SECRET).await?;
//!
//! let shutdown = CancellationToken::new();
//! tokio::spawn(slim_mcp::server::run_mcp_server(
//!     Arc::new(server_app),
//!     McpServer::new("example", "0.1.0"),
//!     None,
//!     shutdown.clone(),
//! ));
//!
//! let client_name: Name = "org/default/client1".parse().unwrap();
//! let (client_app, _) = create_local_app(&service, &client_name, None, DEFAULT_SHARED_SECRET).await?;
//! let tools = slim_mcp::client::open_client_streams(
//!     &client_app,
//!     &server_name,
//!     SessionConfig::default(),
//!     async |streams| {
//!         let mut client = McpClient::new(streams);
//!         client.initialize().await?;
//!         client.list_tools().await
//!     },
//! )
//! .await?;
//! assert!(tools.is_empty());
//! shutdown.cancel();
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod client;
mod error;
pub mod mcp;
pub mod message;
pub mod server;
pub mod setup;
pub mod transport;

pub use bridge::{Bridge, SessionStreams};
pub use error::{Error, Result};
pub use server::{ProtocolHandler, SessionAcceptor};
