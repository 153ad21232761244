//! ticksync server
//!
//! Authoritative tick server. Clients connect over WebSocket, are seated in a
//! room and receive every closed tick.
//!
//! ```text
//! ticksync-server [--config server.json] [--bind 0.0.0.0:8080]
//! ```

use std::env;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ticksync::{
    VERSION,
    config::ServerSettings,
    network::GameServer,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let mut config_path: Option<String> = None;
    let mut bind_override: Option<String> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = args.next(),
            "--bind" => bind_override = args.next(),
            _ => bail!("unknown argument {arg}"),
        }
    }

    let mut settings = match &config_path {
        Some(path) => ServerSettings::load(path).with_context(|| format!("loading {path}"))?,
        None => ServerSettings::default(),
    };
    if let Some(bind) = bind_override {
        settings.bind = bind;
    }
    let config = settings.server_config()?;

    info!("ticksync server v{}", VERSION);
    info!(
        tick_ms = settings.tick_ms,
        playback_delay = settings.playback_delay,
        max_participants = settings.max_participants,
        "Room parameters"
    );

    let server = GameServer::new(config);
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            let _ = shutdown.send(());
        }
    });

    server.run().await?;
    info!("Server stopped");
    Ok(())
}
