//! Scripted transport fakes shared by the integration tests.
//!
//! A [`ScriptedSession`] delivers whatever the test feeds it and records every
//! publish. How publishes are acknowledged is controlled by [`AckMode`].
//! A [`ScriptedApp`] hands out sessions the test queues for it.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use slim_mcp::transport::{
    App, Completion, CompletionSender, ConnectionId, Name, PendingSession, Session, SessionConfig,
    SessionId, TransportError,
};
use tokio::sync::mpsc;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// How a [`ScriptedSession`] acknowledges publishes.
#[derive(Debug, Clone, PartialEq)]
pub enum AckMode {
    /// Every publish is acknowledged at once.
    Immediate,
    /// Acknowledgments wait for [`ScriptedSession::release`].
    Hold,
    /// The publish with this zero-based index is rejected; the others succeed.
    FailAt(usize),
}

pub struct ScriptedSession {
    id: SessionId,
    peer: Name,
    feed: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<Vec<u8>, TransportError>>>,
    ack_mode: Mutex<AckMode>,
    published: Mutex<Vec<Vec<u8>>>,
    held: Mutex<Vec<CompletionSender>>,
    receiving: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The test's handle for feeding a [`ScriptedSession`].
#[derive(Clone)]
pub struct Feed {
    tx: mpsc::UnboundedSender<Result<Vec<u8>, TransportError>>,
}

impl Feed {
    pub fn payload(&self, payload: impl Into<Vec<u8>>) {
        self.tx.send(Ok(payload.into())).unwrap();
    }

    pub fn json(&self, value: Value) {
        self.payload(serde_json::to_vec(&value).unwrap());
    }

    pub fn fail(&self, error: TransportError) {
        self.tx.send(Err(error)).unwrap();
    }

    /// The peer ends the session.
    pub fn close(&self) {
        self.fail(TransportError::Closed);
    }
}

impl ScriptedSession {
    pub fn new(ack_mode: AckMode) -> (Arc<Self>, Feed) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = ScriptedSession {
            id: SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)),
            peer: Name::new("org", "default", "peer"),
            feed: tokio::sync::Mutex::new(rx),
            ack_mode: Mutex::new(ack_mode),
            published: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
            receiving: AtomicUsize::new(0),
        };
        (Arc::new(session), Feed { tx })
    }

    pub fn published(&self) -> Vec<Vec<u8>> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_json(&self) -> Vec<Value> {
        self.published()
            .iter()
            .map(|p| serde_json::from_slice(p).unwrap())
            .collect()
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    /// Acknowledge the oldest held publish.
    pub fn release(&self) -> bool {
        let mut held = self.held.lock().unwrap();
        if held.is_empty() {
            return false;
        }
        held.remove(0).complete(Ok(()))
    }

    /// `receive` calls currently waiting on this session.
    pub fn receives_in_flight(&self) -> usize {
        self.receiving.load(Ordering::SeqCst)
    }

    pub fn set_ack_mode(&self, mode: AckMode) {
        *self.ack_mode.lock().unwrap() = mode;
    }

    /// Wait until at least `count` payloads were published.
    pub async fn wait_for_published(&self, count: usize) -> Vec<Value> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if self.published.lock().unwrap().len() >= count {
                    return self.published_json();
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for publishes")
    }
}

impl Session for ScriptedSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn peer(&self) -> &Name {
        &self.peer
    }

    async fn receive(&self, timeout: Option<Duration>) -> Result<Vec<u8>, TransportError> {
        self.receiving.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight(&self.receiving);
        let mut feed = self.feed.lock().await;
        let next = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, feed.recv())
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => feed.recv().await,
        };
        next.unwrap_or(Err(TransportError::Closed))
    }

    async fn publish(&self, payload: Vec<u8>) -> Result<Completion, TransportError> {
        let index = {
            let mut published = self.published.lock().unwrap();
            published.push(payload);
            published.len() - 1
        };

        let mode = self.ack_mode.lock().unwrap().clone();
        match mode {
            AckMode::Immediate => Ok(Completion::ready(Ok(()))),
            AckMode::Hold => {
                let (sender, completion) = Completion::channel();
                self.held.lock().unwrap().push(sender);
                Ok(completion)
            }
            AckMode::FailAt(failing) if failing == index => Ok(Completion::ready(Err(
                TransportError::Failure("injected send failure".to_string()),
            ))),
            AckMode::FailAt(_) => Ok(Completion::ready(Ok(()))),
        }
    }
}

/// An app whose `listen_for_session` returns whatever the test queues.
///
/// `create_session` hands out sessions queued with
/// [`ScriptedApp::queue_outbound`], already established.
pub struct ScriptedApp {
    name: Name,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<Arc<ScriptedSession>, TransportError>>>,
    outbound: Mutex<VecDeque<Arc<ScriptedSession>>>,
    deleted: Mutex<Vec<SessionId>>,
    receives_at_delete: Mutex<Vec<usize>>,
}

#[derive(Clone)]
pub struct Offers {
    tx: mpsc::UnboundedSender<Result<Arc<ScriptedSession>, TransportError>>,
}

impl Offers {
    pub fn session(&self, session: Arc<ScriptedSession>) {
        self.tx.send(Ok(session)).unwrap();
    }

    pub fn fail(&self, error: TransportError) {
        self.tx.send(Err(error)).unwrap();
    }
}

impl ScriptedApp {
    pub fn new() -> (Arc<Self>, Offers) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = ScriptedApp {
            name: Name::new("org", "default", "server"),
            incoming: tokio::sync::Mutex::new(rx),
            outbound: Mutex::new(VecDeque::new()),
            deleted: Mutex::new(Vec::new()),
            receives_at_delete: Mutex::new(Vec::new()),
        };
        (Arc::new(app), Offers { tx })
    }

    pub fn queue_outbound(&self, session: Arc<ScriptedSession>) {
        self.outbound.lock().unwrap().push_back(session);
    }

    /// For each delete, in order, how many receives were still pending on the
    /// deleted session.
    pub fn receives_at_delete(&self) -> Vec<usize> {
        self.receives_at_delete.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<SessionId> {
        let mut deleted = self.deleted.lock().unwrap().clone();
        deleted.sort();
        deleted
    }

    /// Wait until at least `count` sessions were deleted.
    pub async fn wait_for_deleted(&self, count: usize) -> Vec<SessionId> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if self.deleted.lock().unwrap().len() >= count {
                    return self.deleted();
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for deleted sessions")
    }
}

impl App for ScriptedApp {
    type Session = ScriptedSession;

    fn name(&self) -> &Name {
        &self.name
    }

    fn id(&self) -> u64 {
        1
    }

    async fn create_session(
        &self,
        _config: SessionConfig,
        destination: &Name,
    ) -> Result<PendingSession<ScriptedSession>, TransportError> {
        match self.outbound.lock().unwrap().pop_front() {
            Some(session) => Ok(PendingSession {
                session,
                completion: Completion::ready(Ok(())),
            }),
            None => Err(TransportError::Failure(format!("no route to {destination}"))),
        }
    }

    async fn delete_session(&self, session: &ScriptedSession) -> Result<Completion, TransportError> {
        self.receives_at_delete
            .lock()
            .unwrap()
            .push(session.receives_in_flight());
        self.deleted.lock().unwrap().push(session.id());
        Ok(Completion::ready(Ok(())))
    }

    async fn listen_for_session(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Arc<ScriptedSession>, TransportError> {
        let mut incoming = self.incoming.lock().await;
        let next = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, incoming.recv())
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => incoming.recv().await,
        };
        // No more offers: behave like an idle listener.
        match next {
            Some(offer) => offer,
            None => std::future::pending().await,
        }
    }

    async fn subscribe(&self, _name: &Name, _connection: ConnectionId) -> Result<(), TransportError> {
        Ok(())
    }

    async fn set_route(
        &self,
        _destination: &Name,
        _connection: ConnectionId,
    ) -> Result<(), TransportError> {
        Ok(())
    }
}

/// A JSON-RPC request payload with a string id.
pub fn request_json(id: &str, method: &str) -> Value {
    serde_json::json!({"jsonrpc": "2.0", "id": id, "method": method})
}
