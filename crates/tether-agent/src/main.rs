//! # tether-agent
//!
//! tether binary: serves the built-in capability set, calls a running
//! server, and mints tokens for it.

#![deny(unsafe_code)]

mod demo;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tether_auth::JwtVerifier;
use tether_client::{ClientConfig, ClientSession, ConnectionState};
use tether_core::Identity;
use tether_core::logging::{LogFormat, init_subscriber};
use tether_server::config::ServerConfig;
use tether_server::server::TetherServer;
use tether_settings::TetherSettings;

/// How long `call` waits for the first connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Authenticated WebSocket capability server and client.
#[derive(Parser, Debug)]
#[command(name = "tether-agent", about = "tether capability server and client", version)]
struct Cli {
    /// Settings file (defaults to `~/.tether/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the built-in capabilities until ctrl-c.
    Serve {
        /// Host to bind.
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,
        /// Maximum concurrent connections.
        #[arg(long)]
        max_connections: Option<usize>,
        /// Skip the Prometheus recorder; `/metrics` answers 404.
        #[arg(long)]
        no_metrics: bool,
    },
    /// Send one request to a running server and print the result.
    Call {
        /// Method name, e.g. `tools/list`.
        method: String,
        /// JSON params.
        #[arg(long)]
        params: Option<String>,
        /// Server URL (defaults to the configured one).
        #[arg(long)]
        url: Option<String>,
        /// Credential; minted from the configured secret when absent.
        #[arg(long)]
        token: Option<String>,
    },
    /// Print a signed token.
    Token {
        /// Subject (identity id).
        #[arg(long, default_value = "local")]
        sub: String,
        /// Role claim.
        #[arg(long, default_value = "admin")]
        role: String,
        /// Lifetime in minutes.
        #[arg(long, default_value = "60")]
        ttl_mins: i64,
    },
}

fn load_settings(path: Option<&PathBuf>) -> Result<TetherSettings> {
    let path = path.cloned().unwrap_or_else(tether_settings::settings_path);
    tether_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

fn verifier(settings: &TetherSettings) -> JwtVerifier {
    JwtVerifier::new(settings.auth.jwt_secret.as_bytes(), settings.auth.leeway_secs)
}

fn mint_token(settings: &TetherSettings, sub: &str, role: &str, ttl_mins: i64) -> Result<String> {
    if ttl_mins <= 0 {
        bail!("--ttl-mins must be positive");
    }
    verifier(settings)
        .issue_for(&Identity::new(sub, role), chrono::Duration::minutes(ttl_mins))
        .context("Failed to sign token")
}

fn parse_params(raw: Option<&str>) -> Result<Option<Value>> {
    raw.map(|s| serde_json::from_str(s).context("--params is not valid JSON"))
        .transpose()
}

/// Server config from `settings` with the CLI overrides applied, validated
/// the same way as values from the settings file.
fn server_config(
    settings: &TetherSettings,
    host: Option<String>,
    port: Option<u16>,
    max_connections: Option<usize>,
) -> Result<ServerConfig> {
    let mut settings = settings.clone();
    if let Some(host) = host {
        settings.server.host = host;
    }
    if let Some(port) = port {
        settings.server.port = port;
    }
    if let Some(max) = max_connections {
        settings.server.max_connections = max;
    }
    tether_settings::loader::validate(&settings).context("Invalid server options")?;
    Ok(ServerConfig::from(&settings.server))
}

async fn serve(
    settings: &TetherSettings,
    host: Option<String>,
    port: Option<u16>,
    max_connections: Option<usize>,
    no_metrics: bool,
) -> Result<()> {
    let config = server_config(settings, host, port, max_connections)?;
    let capabilities = Arc::new(demo::capabilities());
    let mut server = TetherServer::new(config, capabilities, Arc::new(verifier(settings)));
    if !no_metrics {
        let handle = tether_server::metrics::install_recorder()
            .context("Failed to install metrics recorder")?;
        server = server.with_metrics(handle);
    }

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("tether listening on http://{addr} (ws://{addr}/ws)");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown().graceful_shutdown(vec![handle], None).await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn call(
    settings: &TetherSettings,
    method: &str,
    params: Option<Value>,
    url: Option<String>,
    token: Option<String>,
) -> Result<Value> {
    let mut config = ClientConfig::from(&settings.client);
    if let Some(url) = url {
        config.server_url = url;
    }
    let token = match token {
        Some(t) => t,
        None => mint_token(settings, "cli", "admin", 5)?,
    };

    let session = ClientSession::start(config.clone(), token);
    let connected = tokio::time::timeout(
        CONNECT_TIMEOUT,
        session.wait_for_state(ConnectionState::Connected),
    )
    .await;
    if !matches!(connected, Ok(Ok(()))) {
        session.logout();
        bail!("Could not connect to {}", config.server_url);
    }

    let result = session.request(method, params).await;
    session.logout();
    result.with_context(|| format!("{method} failed"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.settings.as_ref())?;

    let format = if cli.json_logs || settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_subscriber(&settings.logging.level, format);

    match cli.command {
        Command::Serve {
            host,
            port,
            max_connections,
            no_metrics,
        } => serve(&settings, host, port, max_connections, no_metrics).await,
        Command::Call {
            method,
            params,
            url,
            token,
        } => {
            let params = parse_params(params.as_deref())?;
            let result = call(&settings, &method, params, url, token).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Command::Token {
            sub,
            role,
            ttl_mins,
        } => {
            println!("{}", mint_token(&settings, &sub, &role, ttl_mins)?);
            Ok(())
        }
    }
}
