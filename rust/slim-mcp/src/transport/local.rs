//! In-process transport.
//!
//! [`LocalService`] is a routing table shared by every app created from it.
//! Sessions are created in connected pairs: payloads published on one half
//! are queued for the other. Closing either half closes both, but payloads
//! already queued are still delivered before `receive` reports
//! [`TransportError::Closed`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    App, ClientConfig, Completion, CompletionSender, ConnectOutcome, ConnectionId, Name,
    PendingSession, Service, Session, SessionConfig, SessionId, TransportError,
};

/// Shared secrets shorter than this are rejected by [`LocalService::create_app`].
pub const MIN_SHARED_SECRET_LEN: usize = 32;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A session offered to a listening app, with the establishment acknowledgment.
struct IncomingSession {
    session: Arc<LocalSession>,
    established: CompletionSender,
}

/// Sessions offered to one app and not yet accepted.
#[derive(Default)]
struct OfferQueue {
    offers: Mutex<VecDeque<IncomingSession>>,
    ready: Notify,
    /// Cancelled when another app takes over the name.
    retired: CancellationToken,
}

impl OfferQueue {
    /// Queue an offer, first dropping offers whose creator stopped waiting.
    fn offer(&self, incoming: IncomingSession) {
        let mut offers = lock(&self.offers);
        let before = offers.len();
        offers.retain(|o| !o.established.is_abandoned());
        if offers.len() < before {
            debug!(dropped = before - offers.len(), "Pruned abandoned session offers");
        }
        offers.push_back(incoming);
        drop(offers);
        self.ready.notify_one();
    }

    fn take(&self) -> Option<IncomingSession> {
        lock(&self.offers).pop_front()
    }

    fn len(&self) -> usize {
        lock(&self.offers).len()
    }
}

struct Registration {
    app_id: u64,
    offers: Arc<OfferQueue>,
}

#[derive(Default)]
struct ServiceState {
    apps: Mutex<HashMap<Name, Registration>>,
    connections: Mutex<HashMap<String, ConnectionId>>,
    next_id: AtomicU64,
}

impl ServiceState {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn lookup(&self, name: &Name) -> Option<Arc<OfferQueue>> {
        lock(&self.apps).get(name).map(|r| r.offers.clone())
    }

    fn knows_connection(&self, connection: ConnectionId) -> bool {
        lock(&self.connections).values().any(|c| *c == connection)
    }
}

/// Process-wide in-process transport service. Cloning shares the same routing table.
#[derive(Clone, Default)]
pub struct LocalService {
    state: Arc<ServiceState>,
}

impl std::fmt::Debug for LocalService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalService")
            .field("apps", &lock(&self.state.apps).len())
            .finish()
    }
}

impl LocalService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Service for LocalService {
    type App = LocalApp;

    async fn connect(&self, config: &ClientConfig) -> Result<ConnectOutcome, TransportError> {
        let mut connections = lock(&self.state.connections);
        if connections.contains_key(&config.endpoint) {
            debug!(endpoint = %config.endpoint, "Client already connected");
            return Ok(ConnectOutcome::AlreadyConnected);
        }
        let id = ConnectionId(self.state.next_id());
        connections.insert(config.endpoint.clone(), id);
        info!(endpoint = %config.endpoint, connection_id = %id, "Connected");
        Ok(ConnectOutcome::Connected(id))
    }

    fn create_app(&self, name: &Name, shared_secret: &str) -> Result<LocalApp, TransportError> {
        if shared_secret.len() < MIN_SHARED_SECRET_LEN {
            return Err(TransportError::Failure(format!(
                "shared secret must be at least {MIN_SHARED_SECRET_LEN} bytes"
            )));
        }

        let id = self.state.next_id();
        let offers = Arc::new(OfferQueue::default());
        let registration = Registration {
            app_id: id,
            offers: offers.clone(),
        };
        let replaced = lock(&self.state.apps).insert(name.clone(), registration);
        if let Some(replaced) = replaced {
            debug!(%name, "Replaced existing app registration");
            replaced.offers.retired.cancel();
        }

        Ok(LocalApp {
            name: name.clone(),
            id,
            service: self.state.clone(),
            offers,
            sessions: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
            routes: Mutex::new(HashMap::new()),
        })
    }
}

/// A named endpoint of a [`LocalService`].
pub struct LocalApp {
    name: Name,
    id: u64,
    service: Arc<ServiceState>,
    offers: Arc<OfferQueue>,
    sessions: Mutex<HashMap<SessionId, Arc<LocalSession>>>,
    subscriptions: Mutex<Vec<(Name, ConnectionId)>>,
    routes: Mutex<HashMap<Name, ConnectionId>>,
}

impl std::fmt::Debug for LocalApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalApp")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl LocalApp {
    /// Number of sessions this app has created or accepted and not yet deleted.
    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Sessions offered to this app that it has not accepted yet.
    pub fn pending_offers(&self) -> usize {
        self.offers.len()
    }

    /// Connection registered for `destination` through [`App::set_route`].
    pub fn route(&self, destination: &Name) -> Option<ConnectionId> {
        lock(&self.routes).get(destination).copied()
    }

    /// Names subscribed through [`App::subscribe`].
    pub fn subscriptions(&self) -> Vec<(Name, ConnectionId)> {
        lock(&self.subscriptions).clone()
    }

    fn track(&self, session: &Arc<LocalSession>) {
        lock(&self.sessions).insert(session.id, session.clone());
    }
}

impl Drop for LocalApp {
    fn drop(&mut self) {
        let mut apps = lock(&self.service.apps);
        if apps.get(&self.name).is_some_and(|r| r.app_id == self.id) {
            apps.remove(&self.name);
        }
    }
}

impl App for LocalApp {
    type Session = LocalSession;

    fn name(&self) -> &Name {
        &self.name
    }

    fn id(&self) -> u64 {
        self.id
    }

    async fn create_session(
        &self,
        config: SessionConfig,
        destination: &Name,
    ) -> Result<PendingSession<LocalSession>, TransportError> {
        let attempts = config.max_retries.saturating_add(1);

        for attempt in 1..=attempts {
            if let Some(offers) = self.service.lookup(destination) {
                let id = SessionId(self.service.next_id());
                let (local, remote) = LocalSession::pair(id, self.name.clone(), destination.clone());
                let (established, completion) = Completion::channel();

                offers.offer(IncomingSession {
                    session: Arc::new(remote),
                    established,
                });
                let local = Arc::new(local);
                self.track(&local);
                debug!(session_id = %id, %destination, attempt, "Session offered");
                return Ok(PendingSession {
                    session: local,
                    completion: completion
                        .with_deadline(Instant::now() + config.establishment_budget()),
                });
            }

            if attempt < attempts {
                debug!(%destination, attempt, "No route to destination, retrying");
                tokio::time::sleep(config.interval).await;
            }
        }

        Err(TransportError::Failure(format!("no route to {destination}")))
    }

    async fn delete_session(&self, session: &LocalSession) -> Result<Completion, TransportError> {
        let removed = lock(&self.sessions).remove(&session.id);
        match removed {
            Some(session) => {
                session.closed.cancel();
                debug!(session_id = %session.id, "Session deleted");
                Ok(Completion::ready(Ok(())))
            }
            None => Err(TransportError::Failure(format!(
                "unknown session {}",
                session.id
            ))),
        }
    }

    async fn listen_for_session(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Arc<LocalSession>, TransportError> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if self.offers.retired.is_cancelled() {
                return Err(TransportError::Closed);
            }
            let Some(IncomingSession {
                session,
                established,
            }) = self.offers.take()
            else {
                let ready = async {
                    tokio::select! {
                        () = self.offers.ready.notified() => Ok(()),
                        () = self.offers.retired.cancelled() => Err(TransportError::Closed),
                    }
                };
                match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, ready)
                        .await
                        .map_err(|_| TransportError::Timeout)??,
                    None => ready.await?,
                }
                continue;
            };

            self.track(&session);
            if established.complete(Ok(())) {
                return Ok(session);
            }

            // The creator stopped waiting for establishment.
            debug!(session_id = %session.id, "Dropping abandoned session");
            lock(&self.sessions).remove(&session.id);
            session.closed.cancel();
        }
    }

    async fn subscribe(&self, name: &Name, connection: ConnectionId) -> Result<(), TransportError> {
        if !self.service.knows_connection(connection) {
            return Err(TransportError::Failure(format!(
                "unknown connection {connection}"
            )));
        }
        lock(&self.subscriptions).push((name.clone(), connection));
        Ok(())
    }

    async fn set_route(
        &self,
        destination: &Name,
        connection: ConnectionId,
    ) -> Result<(), TransportError> {
        if !self.service.knows_connection(connection) {
            return Err(TransportError::Failure(format!(
                "unknown connection {connection}"
            )));
        }
        lock(&self.routes).insert(destination.clone(), connection);
        Ok(())
    }
}

/// One half of an in-process session.
pub struct LocalSession {
    id: SessionId,
    peer: Name,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    peer_tx: mpsc::UnboundedSender<Vec<u8>>,
    closed: CancellationToken,
}

impl std::fmt::Debug for LocalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSession")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

impl LocalSession {
    /// Two connected halves: the first is held by `initiator`, the second by `acceptor`.
    fn pair(id: SessionId, initiator: Name, acceptor: Name) -> (Self, Self) {
        let (to_acceptor, acceptor_inbox) = mpsc::unbounded_channel();
        let (to_initiator, initiator_inbox) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();

        let initiator_half = LocalSession {
            id,
            peer: acceptor,
            inbox: tokio::sync::Mutex::new(initiator_inbox),
            peer_tx: to_acceptor,
            closed: closed.clone(),
        };
        let acceptor_half = LocalSession {
            id,
            peer: initiator,
            inbox: tokio::sync::Mutex::new(acceptor_inbox),
            peer_tx: to_initiator,
            closed,
        };
        (initiator_half, acceptor_half)
    }
}

impl Session for LocalSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn peer(&self) -> &Name {
        &self.peer
    }

    async fn receive(&self, timeout: Option<Duration>) -> Result<Vec<u8>, TransportError> {
        let mut inbox = self.inbox.lock().await;
        let next = async {
            tokio::select! {
                biased;
                payload = inbox.recv() => payload.ok_or(TransportError::Closed),
                () = self.closed.cancelled() => Err(TransportError::Closed),
            }
        };
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, next)
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => next.await,
        }
    }

    async fn publish(&self, payload: Vec<u8>) -> Result<Completion, TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.peer_tx
            .send(payload)
            .map_err(|_| TransportError::Closed)?;
        Ok(Completion::ready(Ok(())))
    }
}
