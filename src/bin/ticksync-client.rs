//! Headless ticksync client.
//!
//! Connects, runs a client session at a fixed frame rate with a scripted
//! input pattern and logs what the session does. Useful for soak-testing a
//! server with several bots.
//!
//! ```text
//! ticksync-client [--config client.json] [--url ws://host:port] [--frames N]
//! ```

use std::env;
use std::time::Instant;

use anyhow::{bail, Context};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ticksync::{
    Input, VERSION,
    config::ClientSettings,
    core::fixed::to_float,
    game::events::GameEventData,
    game::tick::ArenaSimulation,
    network::NetClient,
};

/// Walks a square: each side lasts `side` frames.
fn square_walk(side: u64) -> impl FnMut() -> Input {
    let mut frame = 0u64;
    move || {
        let leg = (frame / side.max(1)) % 4;
        frame += 1;
        match leg {
            0 => Input::new(1, 0),
            1 => Input::new(0, 1),
            2 => Input::new(-1, 0),
            _ => Input::new(0, -1),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let mut config_path: Option<String> = None;
    let mut url_override: Option<String> = None;
    let mut frame_limit: Option<u64> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = args.next(),
            "--url" => url_override = args.next(),
            "--frames" => {
                let value = args.next().context("--frames needs a value")?;
                frame_limit = Some(value.parse().with_context(|| format!("bad frame count {value}"))?);
            }
            _ => bail!("unknown argument {arg}"),
        }
    }

    let mut settings = match &config_path {
        Some(path) => ClientSettings::load(path).with_context(|| format!("loading {path}"))?,
        None => ClientSettings::default(),
    };
    if let Some(url) = url_override {
        settings.url = url;
    }

    info!("ticksync client v{}", VERSION);

    let mut client = NetClient::connect(&settings.url).await?;
    let mut session = client.session(ArenaSimulation::default(), &settings.sync)?;
    let mut input = square_walk(40);

    let mut frames = interval(settings.frame_duration());
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_frame = Instant::now();
    let mut last_ping = Instant::now();
    let mut frame_count = 0u64;
    let mut rollbacks = 0u64;

    loop {
        frames.tick().await;
        let now = Instant::now();
        let elapsed = now - last_frame;
        last_frame = now;

        let stats = client.pump(&mut session)?;
        if let Some(reason) = stats.shutdown {
            info!(%reason, "Disconnected by server");
            break;
        }
        if let Some(rtt) = stats.rtt_ms {
            info!(rtt_ms = rtt, local_tick = session.local_tick(), backlog = session.backlog(), "Ping");
        }

        let report = session.advance_frame(elapsed, &mut input)?;
        if report.rollback_from.is_some() {
            rollbacks += 1;
        }
        if let Some(tick) = report.desync_at {
            warn!(tick, "Desync detected, waiting for server state");
        }
        for event in report.events() {
            if let GameEventData::ItemCollected { item_id, new_score, .. } = event.data {
                if event.id.actor == Some(session.local_participant()) {
                    info!(tick = event.id.tick, item_id, score = new_score, "Collected item");
                }
            }
        }

        // Send whatever this frame produced.
        client.pump(&mut session)?;

        if let Some(every) = settings.ping_interval() {
            if last_ping.elapsed() >= every {
                client.ping()?;
                last_ping = Instant::now();
            }
        }

        frame_count += 1;
        if frame_limit.is_some_and(|limit| frame_count >= limit) {
            break;
        }
    }

    let (x, y) = session
        .state()
        .position_of(session.local_participant())
        .map(|p| (to_float(p.x), to_float(p.y)))
        .unwrap_or_default();
    info!(
        frames = frame_count,
        x,
        y,
        local_tick = session.local_tick(),
        latest = session.latest_server_tick(),
        rollbacks,
        "Client finished"
    );
    client.close().await;
    Ok(())
}
