//! Service and app setup shared by servers and clients.

use tracing::{debug, info};

use crate::transport::{App, ClientConfig, ConnectOutcome, Name, Service};
use crate::{Error, Result};

/// Shared secret used when none is configured.
pub const DEFAULT_SHARED_SECRET: &str = "secretsecretsecretsecretsecretsecret";

/// Create an app named `name` on `service`.
///
/// With an `upstream`, the service connects first and the app subscribes its
/// own name over the new connection. A service that is already connected
/// reports [`ConnectOutcome::AlreadyConnected`], which is not an error; the
/// app is then created without a new subscription.
pub async fn create_local_app<S: Service>(
    service: &S,
    name: &Name,
    upstream: Option<&ClientConfig>,
    shared_secret: &str,
) -> Result<(S::App, Option<ConnectOutcome>)> {
    let outcome = match upstream {
        Some(config) => {
            let outcome = service.connect(config).await.map_err(Error::SessionSetup)?;
            if outcome == ConnectOutcome::AlreadyConnected {
                debug!(endpoint = %config.endpoint, "Service already connected upstream");
            }
            Some(outcome)
        }
        None => None,
    };

    let app = service
        .create_app(name, shared_secret)
        .map_err(Error::SessionSetup)?;
    info!(%name, app_id = app.id(), "Created app");

    if let Some(connection) = outcome.as_ref().and_then(ConnectOutcome::connection_id) {
        app.subscribe(name, connection)
            .await
            .map_err(Error::SessionSetup)?;
        debug!(%name, %connection, "Subscribed");
    }

    Ok((app, outcome))
}
