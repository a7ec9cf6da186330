//! # wamp-peer
//!
//! Command-line peer: host a handler set over WebSocket, or dial a host and
//! issue a single call or notification.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use wamp_rpc::{ConnectionConfig, MethodRegistry};
use wamp_server::demo::{SumHandler, register_demo};
use wamp_server::{ServerConfig, WampServer};
use wamp_settings::WampSettings;

/// Symmetric JSON-RPC peer over WebSocket.
#[derive(Parser, Debug)]
#[command(name = "wamp-peer", version, about)]
struct Cli {
    /// Settings file (defaults to `~/.wamp/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Run a WebSocket host until Ctrl-C.
    Serve {
        /// Host to bind (overrides settings).
        #[arg(long)]
        host: Option<String>,

        /// Port to bind, 0 for auto-assign (overrides settings).
        #[arg(long)]
        port: Option<u16>,

        /// Serve the demo handler set.
        #[arg(long)]
        demo: bool,
    },
    /// Call a method on a remote peer and print the result.
    Call {
        /// WebSocket URL, e.g. `ws://127.0.0.1:9090/ws`.
        url: String,
        /// Method name.
        method: String,
        /// Params as JSON.
        params: Option<String>,
    },
    /// Send a notification to a remote peer.
    Notify {
        /// WebSocket URL.
        url: String,
        /// Method name.
        method: String,
        /// Params as JSON.
        params: Option<String>,
    },
}

fn parse_params(raw: Option<&str>) -> Result<Option<Value>> {
    raw.map(|text| {
        serde_json::from_str(text).with_context(|| format!("params are not valid JSON: {text}"))
    })
    .transpose()
}

fn load_settings(path: Option<&PathBuf>) -> Result<WampSettings> {
    match path {
        Some(path) => wamp_settings::load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None => wamp_settings::load_settings().context("failed to load settings"),
    }
}

/// Handlers a dialing peer offers back to the host.
fn client_registry() -> Arc<MethodRegistry> {
    let registry = MethodRegistry::new();
    registry.add("sum", SumHandler);
    Arc::new(registry)
}

async fn serve(
    settings: &WampSettings,
    host: Option<String>,
    port: Option<u16>,
    demo: bool,
) -> Result<()> {
    let mut config = ServerConfig::from(settings);
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let registry = MethodRegistry::new();
    if demo {
        register_demo(&registry);
    }
    tracing::info!(methods = ?registry.methods(), "handlers registered");

    let metrics = wamp_server::metrics::install_recorder()?;
    let server = WampServer::new(config, Arc::new(registry)).with_metrics(metrics);
    let (addr, handle) = server.listen().await?;
    tracing::info!(%addr, "serving on ws://{addr}/ws");

    server
        .shutdown()
        .shutdown_on_ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    server
        .shutdown()
        .graceful_shutdown(vec![handle], None)
        .await;
    Ok(())
}

async fn call(settings: &WampSettings, url: &str, method: &str, params: Option<Value>) -> Result<()> {
    let config = ConnectionConfig {
        call_timeout_ms: settings.rpc.call_timeout_ms,
        handler_timeout_ms: settings.rpc.handler_timeout_ms,
        fail_pending_on_close: settings.rpc.fail_pending_on_close,
    };
    let session = wamp_server::connect(url, client_registry(), config).await?;
    let outcome = session.call(method, params).await;
    session.close().await;

    match outcome {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => bail!("{method} failed: {e}"),
    }
}

async fn notify(url: &str, method: &str, params: Option<Value>) -> Result<()> {
    let session = wamp_server::connect(url, client_registry(), ConnectionConfig::default()).await?;
    let sent = session.notify(method, params);
    session.close().await;
    if !sent {
        bail!("connection closed before {method} could be sent");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.settings.as_ref())?;
    wamp_logging::init_subscriber(&settings.logging.level, settings.logging.format);

    match cli.command {
        Command::Serve { host, port, demo } => serve(&settings, host, port, demo).await,
        Command::Call {
            url,
            method,
            params,
        } => {
            let params = parse_params(params.as_deref())?;
            call(&settings, &url, &method, params).await
        }
        Command::Notify {
            url,
            method,
            params,
        } => {
            let params = parse_params(params.as_deref())?;
            notify(&url, &method, params).await
        }
    }
}
