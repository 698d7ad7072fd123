//! Session acceptor for the server role.
//!
//! [`SessionAcceptor::run`] listens for inbound sessions until it is told to
//! stop. Every accepted session gets its own task, its own [`Bridge`] and its
//! own run of the [`ProtocolHandler`]. A session task that fails or panics is
//! logged and forgotten; neither the accept loop nor any other session notices.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::bridge::{Bridge, SessionStreams};
use crate::client::release_session;
use crate::transport::{App, Session, SessionId, TransportError};
use crate::Result;

/// A protocol engine that drives one session's bridged streams.
///
/// One value is cloned per accepted session and consumed by [`serve`](Self::serve).
pub trait ProtocolHandler: Send + 'static {
    /// Serve one session until the peer is done or an error occurs.
    fn serve(self, streams: SessionStreams) -> impl Future<Output = Result<()>> + Send;
}

/// A [`ProtocolHandler`] backed by a closure.
#[derive(Clone)]
pub struct HandlerFn<F>(F);

/// Wrap a closure as a [`ProtocolHandler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: FnOnce(SessionStreams) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    HandlerFn(f)
}

impl<F, Fut> ProtocolHandler for HandlerFn<F>
where
    F: FnOnce(SessionStreams) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn serve(self, streams: SessionStreams) -> Result<()> {
        (self.0)(streams).await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle onto the sessions an acceptor is currently serving.
#[derive(Debug, Clone, Default)]
pub struct ActiveSessions {
    inner: Arc<Mutex<HashMap<SessionId, CancellationToken>>>,
}

impl ActiveSessions {
    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).is_empty()
    }

    /// Ids of the sessions in flight, in ascending order.
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = lock(&self.inner).keys().copied().collect();
        ids.sort();
        ids
    }

    /// Stop one session. Returns `false` if it is not being served.
    pub fn cancel(&self, id: SessionId) -> bool {
        match lock(&self.inner).get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn insert(&self, id: SessionId, token: CancellationToken) {
        lock(&self.inner).insert(id, token);
    }

    fn remove(&self, id: SessionId) {
        lock(&self.inner).remove(&id);
    }
}

/// Accepts inbound sessions on an app and serves each with a fresh handler.
pub struct SessionAcceptor<A, H> {
    app: Arc<A>,
    handler: H,
    session_timeout: Option<Duration>,
    accept_retry_delay: Duration,
    sessions: ActiveSessions,
}

impl<A, H> SessionAcceptor<A, H>
where
    A: App,
    H: ProtocolHandler + Clone,
{
    pub const DEFAULT_ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

    pub fn new(app: Arc<A>, handler: H) -> Self {
        Self {
            app,
            handler,
            session_timeout: None,
            accept_retry_delay: Self::DEFAULT_ACCEPT_RETRY_DELAY,
            sessions: ActiveSessions::default(),
        }
    }

    /// How long one listen call may wait for a session. `None` waits forever.
    ///
    /// Hitting the timeout is not a failure; the acceptor listens again.
    #[must_use]
    pub fn session_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Pause after a failed accept before listening again.
    #[must_use]
    pub fn accept_retry_delay(mut self, delay: Duration) -> Self {
        self.accept_retry_delay = delay;
        self
    }

    pub fn sessions(&self) -> ActiveSessions {
        self.sessions.clone()
    }

    /// Accept and serve sessions until `shutdown` is cancelled.
    ///
    /// On shutdown every in-flight session is cancelled and its task awaited.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut tasks = JoinSet::new();
        info!(app = %self.app.name(), "Listening for sessions");

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(join_error) = joined {
                        error!(%join_error, "Session task failed");
                    }
                }
                accepted = self.app.listen_for_session(self.session_timeout) => match accepted {
                    Ok(session) => self.spawn_session(&mut tasks, session, &shutdown),
                    Err(TransportError::Timeout) => {
                        debug!("No session within timeout, listening again");
                    }
                    Err(error) => {
                        error!(%error, "Error accepting session");
                        tokio::select! {
                            biased;
                            () = shutdown.cancelled() => break,
                            () = tokio::time::sleep(self.accept_retry_delay) => {}
                        }
                    }
                },
            }
        }

        info!(sessions = tasks.len(), "Acceptor stopping");
        while let Some(joined) = tasks.join_next().await {
            if let Err(join_error) = joined {
                error!(%join_error, "Session task failed during shutdown");
            }
        }
    }

    fn spawn_session(
        &self,
        tasks: &mut JoinSet<()>,
        session: Arc<A::Session>,
        shutdown: &CancellationToken,
    ) {
        let session_id = session.id();
        info!(%session_id, peer = %session.peer(), "New session");

        let token = shutdown.child_token();
        self.sessions.insert(session_id, token.clone());

        let app = self.app.clone();
        let handler = self.handler.clone();
        let sessions = self.sessions.clone();
        tasks.spawn(
            async move {
                serve_session(&*app, session, handler, token).await;
                sessions.remove(session_id);
            }
            .instrument(info_span!("session", id = %session_id)),
        );
    }
}

/// Serve one accepted session, then delete it. Never propagates a failure.
async fn serve_session<A, H>(
    app: &A,
    session: Arc<A::Session>,
    handler: H,
    shutdown: CancellationToken,
) where
    A: App,
    H: ProtocolHandler,
{
    let (bridge, streams) = Bridge::open_with_shutdown(session.clone(), shutdown);

    let handled = tokio::select! {
        biased;
        handled = AssertUnwindSafe(handler.serve(streams)).catch_unwind() => Some(handled),
        () = bridge.terminated() => None,
    };

    let bridged = match handled {
        Some(Ok(result)) => {
            if let Err(error) = result {
                error!(%error, "Protocol handler failed");
            }
            bridge.finish().await
        }
        Some(Err(panic)) => {
            error!(panic = %panic_message(&*panic), "Protocol handler panicked");
            bridge.close().await
        }
        None => {
            debug!("Bridge terminated");
            bridge.close().await
        }
    };
    if let Err(error) = bridged {
        error!(%error, "Bridge failed");
    }

    match release_session(app, &session).await {
        Ok(()) => debug!("Session released"),
        Err(error) => warn!(%error, "Failed to release session"),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Serve `handler` on `app` until `shutdown` is cancelled.
pub async fn run_mcp_server<A, H>(
    app: Arc<A>,
    handler: H,
    session_timeout: Option<Duration>,
    shutdown: CancellationToken,
) where
    A: App,
    H: ProtocolHandler + Clone,
{
    SessionAcceptor::new(app, handler)
        .session_timeout(session_timeout)
        .run(shutdown)
        .await;
}
