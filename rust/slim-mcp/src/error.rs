//! Error types for slim-mcp.
//!
//! Transport outcomes are classified by [`TransportError`]; everything that can
//! surface to a caller of the bridge, opener or acceptor is an [`Error`].

use thiserror::Error;

use crate::transport::TransportError;

/// All error types that can occur while bridging JSON-RPC over a session.
#[derive(Debug, Error)]
pub enum Error {
    /// Unexpected fault while receiving from the session.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Publishing a message, or waiting for its acknowledgment, failed.
    #[error("failed to send message: {0}")]
    Send(#[source] TransportError),

    /// An inbound payload was not a well-formed JSON-RPC message.
    #[error("failed to decode message: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
    },

    /// An inbound payload was JSON but not a JSON-RPC 2.0 message.
    #[error("invalid JSON-RPC message: {0}")]
    InvalidMessage(String),

    /// An outbound message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// The session could not be created or was never acknowledged.
    #[error("session setup failed: {0}")]
    SessionSetup(#[source] TransportError),

    /// Deleting the session failed.
    #[error("session teardown failed: {0}")]
    SessionTeardown(#[source] TransportError),

    /// The other end of a directional stream went away.
    #[error("stream closed")]
    StreamClosed,

    /// The peer answered a request with a JSON-RPC error.
    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i32, message: String },

    /// The peer sent something the protocol does not allow here.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A protocol handler or pump task failed outside of a normal error return.
    #[error("handler failed: {0}")]
    Handler(String),
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
