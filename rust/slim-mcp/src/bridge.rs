//! The stream bridge: one [`Session`] in, two directional streams out.
//!
//! A bridge runs two pumps as separate tasks:
//!
//! - the **incoming pump** reads payloads from the session, decodes them and
//!   forwards `Ok(message)` (or `Err(error)` for a payload that failed to decode
//!   or a transport fault) to [`SessionStreams::incoming`];
//! - the **outgoing pump** takes messages from [`SessionStreams::outgoing`],
//!   encodes them, publishes them and waits for each publish to be acknowledged
//!   before taking the next one.
//!
//! Both pumps share one [`CancellationToken`]. Whichever pump ends first, for
//! any reason, cancels it and the other pump stops too. A pump parked in
//! `receive` or in a stream send observes the token directly.
//!
//! Both streams are rendezvous channels: a producer parks until the pump or
//! the consumer is ready for its item.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use futures::{SinkExt, StreamExt};
//! # async fn example(session: Arc<slim_mcp::transport::local::LocalSession>) -> slim_mcp::Result<()> {
//! slim_mcp::bridge::with_streams(session, async |mut streams| {
//!     let ping = slim_mcp::message::request(
//!         jsonrpcmsg::Id::String("1".into()),
//!         "ping",
//!         serde_json::Value::Null,
//!     )?;
//!     streams.outgoing.send(ping).await.map_err(|_| slim_mcp::Error::StreamClosed)?;
//!     let _pong = streams.incoming.next().await;
//!     Ok(())
//! })
//! .await
//! # }
//! ```

use std::sync::Arc;

use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use jsonrpcmsg::Message;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, trace, warn};

use crate::message;
use crate::transport::{Session, SessionId, TransportError};
use crate::{Error, Result};

/// The two directional streams a bridge exposes to a protocol handler.
#[derive(Debug)]
pub struct SessionStreams {
    /// Messages arriving from the peer, or errors observed while receiving them.
    /// Ends when the session closes or the bridge shuts down.
    pub incoming: mpsc::Receiver<Result<Message>>,
    /// Messages to send to the peer. Closing it lets the outgoing pump finish
    /// once everything queued has been sent.
    pub outgoing: mpsc::Sender<Message>,
}

/// A running bridge. Dropping it cancels both pumps without waiting for them.
#[derive(Debug)]
pub struct Bridge {
    session_id: SessionId,
    shutdown: CancellationToken,
    incoming_pump: JoinHandle<()>,
    outgoing_pump: JoinHandle<Result<()>>,
    _cancel_on_drop: DropGuard,
}

impl Bridge {
    /// Start pumping `session` with a fresh termination signal.
    pub fn open<S: Session>(session: Arc<S>) -> (Self, SessionStreams) {
        Self::open_with_shutdown(session, CancellationToken::new())
    }

    /// Start pumping `session`, terminating when `shutdown` is cancelled.
    ///
    /// The bridge also cancels `shutdown` itself when either pump ends.
    pub fn open_with_shutdown<S: Session>(
        session: Arc<S>,
        shutdown: CancellationToken,
    ) -> (Self, SessionStreams) {
        let (incoming_tx, incoming_rx) = mpsc::channel(0);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(0);
        let session_id = session.id();

        let incoming_pump = tokio::spawn(incoming_pump(
            session.clone(),
            incoming_tx,
            shutdown.clone(),
        ));
        let outgoing_pump = tokio::spawn(outgoing_pump(session, outgoing_rx, shutdown.clone()));

        let bridge = Bridge {
            session_id,
            _cancel_on_drop: shutdown.clone().drop_guard(),
            shutdown,
            incoming_pump,
            outgoing_pump,
        };
        let streams = SessionStreams {
            incoming: incoming_rx,
            outgoing: outgoing_tx,
        };
        (bridge, streams)
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Resolves once either pump has ended or shutdown was requested.
    pub async fn terminated(&self) {
        self.shutdown.cancelled().await;
    }

    /// Wait for both pumps to end on their own.
    ///
    /// Returns the outgoing pump's send failure, if there was one.
    pub async fn join(self) -> Result<()> {
        let Bridge {
            session_id,
            incoming_pump,
            outgoing_pump,
            _cancel_on_drop: cancel_on_drop,
            ..
        } = self;

        let incoming = incoming_pump.await;
        let outgoing = outgoing_pump.await;
        drop(cancel_on_drop);
        pump_results(session_id, incoming, outgoing)
    }

    /// Let the outgoing pump send everything it was handed, then stop.
    ///
    /// The outgoing pump only drains once every [`SessionStreams::outgoing`]
    /// sender is dropped, or the bridge is shut down.
    pub async fn finish(self) -> Result<()> {
        let Bridge {
            session_id,
            shutdown,
            incoming_pump,
            outgoing_pump,
            _cancel_on_drop: cancel_on_drop,
        } = self;

        let outgoing = outgoing_pump.await;
        shutdown.cancel();
        let incoming = incoming_pump.await;
        drop(cancel_on_drop);
        pump_results(session_id, incoming, outgoing)
    }

    /// Stop both pumps and wait for them to finish.
    ///
    /// Messages still queued on the outgoing stream are dropped.
    pub async fn close(self) -> Result<()> {
        trace!(session_id = %self.session_id, "Closing bridge");
        self.shutdown.cancel();
        self.join().await
    }
}

fn pump_results(
    session_id: SessionId,
    incoming: std::result::Result<(), JoinError>,
    outgoing: std::result::Result<Result<()>, JoinError>,
) -> Result<()> {
    if let Err(join_error) = incoming {
        error!(%session_id, %join_error, "Incoming pump task failed");
        return Err(Error::Handler(format!("incoming pump: {join_error}")));
    }
    match outgoing {
        Ok(result) => result,
        Err(join_error) => {
            error!(%session_id, %join_error, "Outgoing pump task failed");
            Err(Error::Handler(format!("outgoing pump: {join_error}")))
        }
    }
}

/// Bridge `session` for the duration of `body`, then close the bridge.
///
/// If `body` succeeds but the outgoing pump hit a send failure, the send
/// failure is returned.
pub async fn with_streams<S, T>(
    session: Arc<S>,
    body: impl AsyncFnOnce(SessionStreams) -> Result<T>,
) -> Result<T>
where
    S: Session,
{
    let (bridge, streams) = Bridge::open(session);
    let session_id = bridge.session_id();
    let result = body(streams).await;
    let closed = bridge.close().await;

    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(pump_error)) => Err(pump_error),
        (Err(body_error), Err(pump_error)) => {
            warn!(%session_id, %pump_error, "Bridge failed while body was failing");
            Err(body_error)
        }
        (Err(body_error), Ok(())) => Err(body_error),
    }
}

async fn incoming_pump<S: Session>(
    session: Arc<S>,
    mut incoming_tx: mpsc::Sender<Result<Message>>,
    shutdown: CancellationToken,
) {
    let session_id = session.id();

    loop {
        let received = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                trace!(%session_id, "Incoming pump cancelled");
                break;
            }
            received = session.receive(None) => received,
        };

        let (item, last) = match received {
            Ok(payload) => {
                debug!(%session_id, payload = %String::from_utf8_lossy(&payload), "Received message");
                let decoded = message::decode(&payload);
                if let Err(error) = &decoded {
                    warn!(%session_id, %error, "Failed to decode payload");
                }
                (decoded, false)
            }
            Err(TransportError::Closed) => {
                debug!(%session_id, "Session closed by peer");
                break;
            }
            Err(transport_error) => {
                error!(%session_id, %transport_error, "Error receiving message");
                (Err(Error::Transport(transport_error)), true)
            }
        };

        let forwarded = tokio::select! {
            biased;
            () = shutdown.cancelled() => false,
            sent = incoming_tx.send(item) => sent.is_ok(),
        };
        if !forwarded {
            trace!(%session_id, "Incoming stream consumer gone");
            break;
        }
        if last {
            break;
        }
    }

    drop(incoming_tx);
    shutdown.cancel();
}

async fn outgoing_pump<S: Session>(
    session: Arc<S>,
    mut outgoing_rx: mpsc::Receiver<Message>,
    shutdown: CancellationToken,
) -> Result<()> {
    let session_id = session.id();

    let result = loop {
        let next = tokio::select! {
            biased;
            () = shutdown.cancelled() => break Ok(()),
            next = outgoing_rx.next() => next,
        };
        let Some(message) = next else {
            debug!(%session_id, "Outgoing stream closed");
            break Ok(());
        };

        let sent = tokio::select! {
            biased;
            () = shutdown.cancelled() => break Ok(()),
            sent = send_confirmed(&*session, &message) => sent,
        };
        if let Err(error) = sent {
            error!(%session_id, %error, "Error sending message");
            break Err(error);
        }
    };

    outgoing_rx.close();
    shutdown.cancel();
    result
}

async fn send_confirmed<S: Session>(session: &S, message: &Message) -> Result<()> {
    let payload = message::encode(message)?;
    debug!(
        session_id = %session.id(),
        payload = %String::from_utf8_lossy(&payload),
        "Sending message"
    );
    let completion = session.publish(payload).await.map_err(Error::Send)?;
    completion.wait().await.map_err(Error::Send)
}
