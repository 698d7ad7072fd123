//! Configuration file support for slim-mcp-time.
//!
//! ## Example config
//!
//! ```toml
//! shared_secret = "secretsecretsecretsecretsecretsecret"
//!
//! [local]
//! name = "org/default/time"
//! client_name = "org/default/time-client"
//! timezone = "Europe/Rome"
//!
//! [upstream]
//! endpoint = "http://127.0.0.1:46357"
//!
//! [session]
//! max_retries = 2
//! timeout_ms = 15000
//!
//! [server]
//! session_timeout_ms = 1000
//! ```
//!
//! Every key is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use slim_mcp::setup::DEFAULT_SHARED_SECRET;
use slim_mcp::transport::{Name, NameParseError, SessionConfig};

pub const DEFAULT_SERVER_NAME: &str = "org/default/time";
pub const DEFAULT_CLIENT_NAME: &str = "org/default/time-client";

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct LocalConfig {
    /// Name the time server registers as.
    pub name: Option<String>,
    /// Name the built-in client registers as.
    pub client_name: Option<String>,
    /// IANA timezone used when a command names none. Absent means the
    /// system timezone.
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub endpoint: String,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct SessionSection {
    pub max_retries: Option<u32>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct ServerSection {
    /// Listen timeout per accept call; absent means wait forever.
    pub session_timeout_ms: Option<u64>,
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    pub shared_secret: Option<String>,
    #[serde(default)]
    pub local: LocalConfig,
    pub upstream: Option<UpstreamConfig>,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub server: ServerSection,
}

impl Config {
    /// Load configuration from `path`.
    ///
    /// Returns default config if the file doesn't exist, and an error only if
    /// it exists but can't be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        Self::load_from(path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

        tracing::info!("Loaded config from {:?}", path);
        if let Some(ref upstream) = config.upstream {
            tracing::info!("  upstream.endpoint = {:?}", upstream.endpoint);
        }
        Ok(config)
    }

    pub fn server_name(&self) -> Result<Name, NameParseError> {
        self.local.name.as_deref().unwrap_or(DEFAULT_SERVER_NAME).parse()
    }

    pub fn client_name(&self) -> Result<Name, NameParseError> {
        self.local
            .client_name
            .as_deref()
            .unwrap_or(DEFAULT_CLIENT_NAME)
            .parse()
    }

    pub fn shared_secret(&self) -> &str {
        self.shared_secret.as_deref().unwrap_or(DEFAULT_SHARED_SECRET)
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::default();
        if let Some(max_retries) = self.session.max_retries {
            config = config.max_retries(max_retries);
        }
        if let Some(timeout_ms) = self.session.timeout_ms {
            config = config.interval(Duration::from_millis(timeout_ms));
        }
        config
    }

    pub fn session_timeout(&self) -> Option<Duration> {
        self.server.session_timeout_ms.map(Duration::from_millis)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
