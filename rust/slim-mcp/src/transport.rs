//! The transport capability surface consumed by the bridge.
//!
//! A transport is a process-wide [`Service`] that hands out [`App`]s; an app
//! creates or accepts [`Session`]s, which carry opaque payloads in order
//! between two named endpoints. Every asynchronous transport operation is
//! acknowledged through a [`Completion`].
//!
//! [`local`] is an in-process implementation of these traits.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;

pub mod local;

/// Classification of a failed transport call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The peer or the session ended cleanly.
    #[error("session closed")]
    Closed,

    /// The call did not complete within its timeout.
    #[error("operation timed out")]
    Timeout,

    /// Any other transport-level fault.
    #[error("{0}")]
    Failure(String),
}

/// Hierarchical endpoint name: `org/namespace/agent`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Name {
    pub org: String,
    pub namespace: String,
    pub agent: String,
}

impl Name {
    pub fn new(org: impl Into<String>, namespace: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            namespace: namespace.into(),
            agent: agent.into(),
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.org, self.namespace, self.agent)
    }
}

/// Error returned when parsing a [`Name`] that is not `org/namespace/agent`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid name {0:?}: expected org/namespace/agent")]
pub struct NameParseError(String);

impl FromStr for Name {
    type Err = NameParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(org), Some(namespace), Some(agent), None)
                if !org.is_empty() && !namespace.is_empty() && !agent.is_empty() =>
            {
                Ok(Name::new(org, namespace, agent))
            }
            _ => Err(NameParseError(s.to_string())),
        }
    }
}

/// Identifier of one session, unique within its transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of an upstream connection held by a [`Service`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Retry policy and metadata used when creating a point-to-point session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Retries the transport may attempt before giving up.
    pub max_retries: u32,
    /// Delay between attempts, and the per-attempt delivery timeout.
    pub interval: Duration,
    pub metadata: HashMap<String, String>,
}

impl SessionConfig {
    pub const DEFAULT_MAX_RETRIES: u32 = 2;
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);

    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Total time the policy allows for establishing a session.
    pub fn establishment_budget(&self) -> Duration {
        self.interval.saturating_mul(self.max_retries.saturating_add(1))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_retries: Self::DEFAULT_MAX_RETRIES,
            interval: Self::DEFAULT_INTERVAL,
            metadata: HashMap::new(),
        }
    }
}

/// Where a [`Service`] connects upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub endpoint: String,
}

impl ClientConfig {
    pub fn insecure(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

/// Result of connecting a service upstream.
///
/// A service that is already connected to the endpoint reports
/// [`ConnectOutcome::AlreadyConnected`] instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected(ConnectionId),
    AlreadyConnected,
}

impl ConnectOutcome {
    pub fn connection_id(&self) -> Option<ConnectionId> {
        match self {
            ConnectOutcome::Connected(id) => Some(*id),
            ConnectOutcome::AlreadyConnected => None,
        }
    }
}

/// An awaitable acknowledgment that an asynchronous transport operation finished.
#[derive(Debug)]
#[must_use = "a completion does nothing unless waited on"]
pub struct Completion {
    state: CompletionState,
}

#[derive(Debug)]
enum CompletionState {
    Ready(Result<(), TransportError>),
    Pending {
        rx: oneshot::Receiver<Result<(), TransportError>>,
        deadline: Option<Instant>,
    },
}

/// The transport-side half of a pending [`Completion`].
#[derive(Debug)]
pub struct CompletionSender {
    tx: oneshot::Sender<Result<(), TransportError>>,
}

impl CompletionSender {
    /// Resolve the completion. Returns `false` if nobody is waiting any more.
    pub fn complete(self, result: Result<(), TransportError>) -> bool {
        self.tx.send(result).is_ok()
    }

    /// Whether the waiting side has already given up.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

impl Completion {
    /// A completion that has already resolved.
    pub fn ready(result: Result<(), TransportError>) -> Self {
        Self {
            state: CompletionState::Ready(result),
        }
    }

    /// A completion resolved later through the returned sender.
    pub fn channel() -> (CompletionSender, Self) {
        let (tx, rx) = oneshot::channel();
        (
            CompletionSender { tx },
            Self {
                state: CompletionState::Pending { rx, deadline: None },
            },
        )
    }

    /// Fail with [`TransportError::Timeout`] if not resolved by `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        if let CompletionState::Pending { deadline: slot, .. } = &mut self.state {
            *slot = Some(deadline);
        }
        self
    }

    /// Wait for the operation to finish.
    pub async fn wait(self) -> Result<(), TransportError> {
        match self.state {
            CompletionState::Ready(result) => result,
            CompletionState::Pending { rx, deadline } => {
                let outcome = match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, rx)
                        .await
                        .map_err(|_| TransportError::Timeout)?,
                    None => rx.await,
                };
                outcome.unwrap_or_else(|_| {
                    Err(TransportError::Failure(
                        "completion dropped before resolving".to_string(),
                    ))
                })
            }
        }
    }
}

/// A session returned by [`App::create_session`], usable once `completion` resolves.
#[derive(Debug)]
pub struct PendingSession<S> {
    pub session: Arc<S>,
    pub completion: Completion,
}

/// A bidirectional, ordered, message-addressed channel between two endpoints.
///
/// `receive` must be cancel-safe: dropping its future must not lose a payload.
pub trait Session: Send + Sync + 'static {
    fn id(&self) -> SessionId;

    /// Name of the endpoint on the other side.
    fn peer(&self) -> &Name;

    /// Wait for the next payload. `None` waits forever.
    fn receive(
        &self,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;

    /// Hand a payload to the transport; the completion fires once it is delivered.
    fn publish(
        &self,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<Completion, TransportError>> + Send;
}

/// A named local endpoint that creates and accepts sessions.
pub trait App: Send + Sync + 'static {
    type Session: Session;

    fn name(&self) -> &Name;

    fn id(&self) -> u64;

    fn create_session(
        &self,
        config: SessionConfig,
        destination: &Name,
    ) -> impl Future<Output = Result<PendingSession<Self::Session>, TransportError>> + Send;

    fn delete_session(
        &self,
        session: &Self::Session,
    ) -> impl Future<Output = Result<Completion, TransportError>> + Send;

    /// Wait for a peer to open a session to this app. `None` waits forever.
    ///
    /// Must be cancel-safe: dropping the future must not lose an offered session.
    fn listen_for_session(
        &self,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Arc<Self::Session>, TransportError>> + Send;

    /// Receive traffic addressed to `name` over `connection`.
    fn subscribe(
        &self,
        name: &Name,
        connection: ConnectionId,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Send traffic addressed to `destination` over `connection`.
    fn set_route(
        &self,
        destination: &Name,
        connection: ConnectionId,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// The process-wide transport service. Created once and shared by handle.
pub trait Service: Send + Sync + 'static {
    type App: App;

    fn connect(
        &self,
        config: &ClientConfig,
    ) -> impl Future<Output = Result<ConnectOutcome, TransportError>> + Send;

    fn create_app(&self, name: &Name, shared_secret: &str) -> Result<Self::App, TransportError>;
}
