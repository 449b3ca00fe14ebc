use anyhow::{Context, Result};
use clap::Parser;
use model_gateway::{AppState, GatewayConfig, handler, maintenance};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "model-gateway", version, about = "Failover gateway for Claude and Codex credentials")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Override the listen address from the config file
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = GatewayConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(listen) = cli.listen.clone() {
        config.server.listen_addr = listen;
    }
    let listen_addr = config.server.listen_addr.clone();

    info!(
        listen = %listen_addr,
        bridge = %config.openai_bridge.target,
        "Starting model gateway"
    );

    let state = Arc::new(AppState::new(config)?);
    spawn_reload(state.clone(), cli);
    maintenance::spawn(state.clone());

    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("binding {}", listen_addr))?;
    info!(listen = %listen_addr, "Gateway ready");

    axum::serve(listener, handler::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("model_gateway=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
    }
    info!("Shutdown requested");
}

/// Re-read the config file on SIGHUP
#[cfg(unix)]
fn spawn_reload(state: Arc<AppState>, cli: Cli) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to install SIGHUP handler: {}", e);
                return;
            }
        };
        while hangup.recv().await.is_some() {
            let reloaded = GatewayConfig::from_file(&cli.config).and_then(|mut config| {
                if let Some(listen) = cli.listen.clone() {
                    config.server.listen_addr = listen;
                }
                state.reload(config)
            });
            match reloaded {
                Ok(()) => info!(path = %cli.config.display(), "Reloaded configuration"),
                Err(e) => error!(path = %cli.config.display(), "Reload failed, keeping current configuration: {}", e),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload(_state: Arc<AppState>, _cli: Cli) {}
