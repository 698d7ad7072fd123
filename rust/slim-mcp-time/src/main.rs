//! slim-mcp-time: a time-tools MCP server served over slim-mcp sessions.
//!
//! Each subcommand starts the server and a client on one in-process service,
//! performs a single MCP call through a bridged session, prints the JSON
//! result on stdout and shuts the server down.

mod config;
mod tools;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use slim_mcp::client::open_client_streams;
use slim_mcp::mcp::McpClient;
use slim_mcp::server::run_mcp_server;
use slim_mcp::setup::create_local_app;
use slim_mcp::transport::local::LocalService;
use slim_mcp::transport::{App, ClientConfig, Name};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "slim-mcp-time", version, about = "MCP time tools over slim-mcp sessions")]
struct Cli {
    /// TOML configuration file. Missing file means defaults.
    #[arg(long, env = "SLIM_MCP_TIME_CONFIG", default_value = "slim-mcp-time.toml")]
    config: PathBuf,

    /// Name the server registers as (org/namespace/agent).
    #[arg(long)]
    server_name: Option<String>,

    /// Upstream endpoint to connect the service to.
    #[arg(long)]
    endpoint: Option<String>,

    /// Override the local timezone (IANA name) used when a command names none.
    #[arg(long, env = "SLIM_MCP_TIME_LOCAL_TIMEZONE")]
    local_timezone: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the server's tools.
    ListTools,

    /// Current time in a timezone (default: local).
    CurrentTime {
        #[arg(long)]
        timezone: Option<String>,
    },

    /// Convert an HH:MM time between timezones (default: local).
    Convert {
        #[arg(long = "from")]
        source_timezone: Option<String>,
        #[arg(long)]
        time: String,
        #[arg(long = "to")]
        target_timezone: Option<String>,
    },
}

impl Command {
    async fn call(self, client: &mut McpClient, local: Tz) -> slim_mcp::Result<Value> {
        let or_local = |tz: Option<String>| tz.unwrap_or_else(|| local.name().to_string());
        match self {
            Command::ListTools => {
                let tools = client.list_tools().await?;
                Ok(json!({ "tools": tools }))
            }
            Command::CurrentTime { timezone } => {
                let result = client
                    .call_tool(
                        tools::GET_CURRENT_TIME,
                        json!({ "timezone": or_local(timezone) }),
                    )
                    .await?;
                tool_output(result)
            }
            Command::Convert {
                source_timezone,
                time,
                target_timezone,
            } => {
                let result = client
                    .call_tool(
                        tools::CONVERT_TIME,
                        json!({
                            "source_timezone": or_local(source_timezone),
                            "time": time,
                            "target_timezone": or_local(target_timezone),
                        }),
                    )
                    .await?;
                tool_output(result)
            }
        }
    }
}

fn tool_output(result: slim_mcp::mcp::CallToolResult) -> slim_mcp::Result<Value> {
    let text = result.text();
    if result.is_error() {
        return Err(slim_mcp::Error::Protocol(text));
    }
    serde_json::from_str(&text)
        .map_err(|e| slim_mcp::Error::Protocol(format!("tool returned non-JSON output: {e}")))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(&cli.config)?;
    if let Some(name) = cli.server_name {
        config.local.name = Some(name);
    }
    if let Some(endpoint) = cli.endpoint {
        config.upstream = Some(config::UpstreamConfig { endpoint });
    }
    if let Some(timezone) = cli.local_timezone {
        config.local.timezone = Some(timezone);
    }
    let local_tz = tools::local_timezone(config.local.timezone.as_deref())
        .map_err(anyhow::Error::msg)
        .context("invalid local timezone")?;

    let server_name: Name = config.server_name().context("invalid server name")?;
    let client_name: Name = config.client_name().context("invalid client name")?;
    let upstream = config
        .upstream
        .as_ref()
        .map(|u| ClientConfig::insecure(u.endpoint.clone()));

    let service = LocalService::new();
    let (server_app, _) =
        create_local_app(&service, &server_name, upstream.as_ref(), config.shared_secret())
            .await
            .context("failed to create server app")?;

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(
        run_mcp_server(
            Arc::new(server_app),
            tools::time_server(local_tz),
            config.session_timeout(),
            shutdown.clone(),
        )
        .instrument(tracing::info_span!("server", name = %server_name)),
    );

    let (client_app, outcome) =
        create_local_app(&service, &client_name, upstream.as_ref(), config.shared_secret())
            .await
            .context("failed to create client app")?;
    if let Some(connection) = outcome.and_then(|o| o.connection_id()) {
        client_app
            .set_route(&server_name, connection)
            .await
            .context("failed to set route to server")?;
    }

    let command = cli.command;
    let output = open_client_streams(
        &client_app,
        &server_name,
        config.session_config(),
        async |streams| {
            let mut client = McpClient::new(streams);
            client.initialize().await?;
            command.call(&mut client, local_tz).await
        },
    )
    .await;

    shutdown.cancel();
    server.await.context("server task failed")?;

    let output = output.context("MCP call failed")?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the JSON result.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();

    run(Cli::parse()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_convert() {
        let cli = Cli::try_parse_from([
            "slim-mcp-time",
            "--local-timezone",
            "Europe/Rome",
            "convert",
            "--from",
            "America/New_York",
            "--time",
            "16:30",
            "--to",
            "Asia/Tokyo",
        ])
        .unwrap();
        assert_eq!(cli.local_timezone.as_deref(), Some("Europe/Rome"));
        match cli.command {
            Command::Convert {
                source_timezone,
                time,
                target_timezone,
            } => {
                assert_eq!(source_timezone.as_deref(), Some("America/New_York"));
                assert_eq!(time, "16:30");
                assert_eq!(target_timezone.as_deref(), Some("Asia/Tokyo"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_current_time_defaults_to_local() {
        let cli = Cli::try_parse_from(["slim-mcp-time", "current-time"]).unwrap();
        assert!(matches!(cli.command, Command::CurrentTime { timezone: None }));
    }

    fn cli(command: Command) -> Cli {
        let dir = tempfile::tempdir().unwrap();
        Cli {
            config: dir.path().join("absent.toml"),
            server_name: None,
            endpoint: None,
            local_timezone: Some("Europe/Paris".to_string()),
            command,
        }
    }

    async fn call(command: Command, local: Tz) -> Value {
        let service = LocalService::new();
        let config = Config::default();
        let server_name = config.server_name().unwrap();
        let (server_app, _) = create_local_app(&service, &server_name, None, config.shared_secret())
            .await
            .unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(run_mcp_server(
            Arc::new(server_app),
            tools::time_server(local),
            None,
            shutdown.clone(),
        ));
        let (client_app, _) =
            create_local_app(&service, &config.client_name().unwrap(), None, config.shared_secret())
                .await
                .unwrap();

        let output = open_client_streams(
            &client_app,
            &server_name,
            config.session_config(),
            async |streams| {
                let mut client = McpClient::new(streams);
                client.initialize().await?;
                command.call(&mut client, local).await
            },
        )
        .await
        .unwrap();

        shutdown.cancel();
        server.await.unwrap();
        output
    }

    #[tokio::test]
    async fn test_list_tools_over_session() {
        let output = call(Command::ListTools, Tz::UTC).await;
        let names: Vec<_> = output["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec![tools::CONVERT_TIME, tools::GET_CURRENT_TIME]);
    }

    #[tokio::test]
    async fn test_convert_over_session() {
        let output = call(
            Command::Convert {
                source_timezone: Some("UTC".to_string()),
                time: "10:00".to_string(),
                target_timezone: Some("Asia/Kolkata".to_string()),
            },
            Tz::UTC,
        )
        .await;
        assert_eq!(output["time_difference"], "+5.5h");
        assert_eq!(output["target"]["timezone"], "Asia/Kolkata");
        assert_eq!(output["target"]["is_dst"], false);
        assert!(
            output["target"]["datetime"]
                .as_str()
                .unwrap()
                .ends_with("T15:30:00+05:30")
        );
    }

    #[tokio::test]
    async fn test_current_time_uses_local_timezone_when_unnamed() {
        let output = call(Command::CurrentTime { timezone: None }, Tz::Asia__Tokyo).await;
        assert_eq!(output["timezone"], "Asia/Tokyo");
        assert!(output["datetime"].as_str().unwrap().ends_with("+09:00"));
        assert_eq!(output["is_dst"], false);
    }

    #[tokio::test]
    async fn test_run_with_missing_config_file() {
        run(cli(Command::CurrentTime { timezone: None }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_local_timezone_is_rejected() {
        let mut cli = cli(Command::ListTools);
        cli.local_timezone = Some("Atlantis/Capital".to_string());
        let err = run(cli).await.unwrap_err();
        assert!(format!("{err:#}").contains("invalid local timezone"));
    }

    #[tokio::test]
    async fn test_tool_error_is_reported() {
        let err = run(cli(Command::CurrentTime {
            timezone: Some("Nowhere/Special".to_string()),
        }))
        .await
        .unwrap_err();
        assert!(format!("{err:#}").contains("Invalid timezone"));
    }
}
