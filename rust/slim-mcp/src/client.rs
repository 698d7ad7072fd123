//! Session opener for the client role.
//!
//! [`with_session`] creates a session, waits until the transport acknowledges
//! it, runs a body against it and always deletes it afterwards.
//! [`open_client_streams`] additionally bridges the session, so the body only
//! sees [`SessionStreams`]. Streams are torn down before the session.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::bridge::{self, SessionStreams};
use crate::transport::{App, Name, Session, SessionConfig};
use crate::{Error, Result};

/// Create a session to `destination` and wait until it is established.
///
/// If establishment fails after the session was created, the session is
/// deleted before the error is returned.
pub async fn open_session<A: App>(
    app: &A,
    destination: &Name,
    config: SessionConfig,
) -> Result<Arc<A::Session>> {
    debug!(%destination, max_retries = config.max_retries, "Creating session");
    let pending = app
        .create_session(config, destination)
        .await
        .map_err(Error::SessionSetup)?;

    if let Err(error) = pending.completion.wait().await {
        warn!(%destination, %error, "Session was not established");
        if let Err(cleanup) = release_session(app, &pending.session).await {
            debug!(%cleanup, "Failed to delete unestablished session");
        }
        return Err(Error::SessionSetup(error));
    }

    info!(session_id = %pending.session.id(), %destination, "Session established");
    Ok(pending.session)
}

/// Delete `session` and wait for the transport to acknowledge it.
pub async fn release_session<A: App>(app: &A, session: &A::Session) -> Result<()> {
    let completion = app
        .delete_session(session)
        .await
        .map_err(Error::SessionTeardown)?;
    completion.wait().await.map_err(Error::SessionTeardown)?;
    debug!(session_id = %session.id(), "Session deleted");
    Ok(())
}

/// Run `body` with a fresh session to `destination`, deleting it afterwards.
///
/// The session is deleted whether `body` returns `Ok`, returns `Err` or panics.
/// A panic is resumed once the session is gone. An error from `body` takes
/// precedence over a teardown failure.
pub async fn with_session<A, T>(
    app: &A,
    destination: &Name,
    config: SessionConfig,
    body: impl AsyncFnOnce(Arc<A::Session>) -> Result<T>,
) -> Result<T>
where
    A: App,
{
    let session = open_session(app, destination, config).await?;

    let outcome = AssertUnwindSafe(body(session.clone())).catch_unwind().await;
    let released = release_session(app, &session).await;

    match outcome {
        Err(panic) => {
            if let Err(error) = released {
                warn!(%error, "Failed to delete session after panic");
            }
            std::panic::resume_unwind(panic)
        }
        Ok(Err(error)) => {
            if let Err(teardown) = released {
                warn!(%teardown, "Failed to delete session after error");
            }
            Err(error)
        }
        Ok(Ok(value)) => released.map(|()| value),
    }
}

/// Run `body` against bridged streams over a fresh session to `destination`.
///
/// ```no_run
/// # use slim_mcp::transport::{local::LocalService, Name, Service, SessionConfig};
/// # async fn example(service: LocalService) -> slim_mcp::Result<()> {
/// let app = service.create_app(&"org/default/client".parse().unwrap(), slim_mcp::setup::DEFAULT_SHARED_SECRET)?;
/// let server: Name = "org/default/time".parse().unwrap();
/// let tools = slim_mcp::client::open_client_streams(&app, &server, SessionConfig::default(), async |streams| {
///     let mut client = slim_mcp::mcp::McpClient::new(streams);
///     client.initialize().await?;
///     client.list_tools().await
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn open_client_streams<A, T>(
    app: &A,
    destination: &Name,
    config: SessionConfig,
    body: impl AsyncFnOnce(SessionStreams) -> Result<T>,
) -> Result<T>
where
    A: App,
{
    with_session(app, destination, config, async |session| {
        bridge::with_streams(session, body).await
    })
    .await
}
