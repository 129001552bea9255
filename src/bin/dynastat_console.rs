//! Dynastat console binary entry point
//!
//! Negotiates a WebRTC session with a Dynastat device through its signaling
//! relay and streams telemetry to the terminal.
//!
//! # Usage
//!
//! ```bash
//! # Connect to a device behind a relay origin
//! cargo run --bin dynastat_console -- \
//!   --origin http://dynastat.local:8000 \
//!   --device-id test
//!
//! # Override the STUN list instead of fetching it from the origin
//! cargo run --bin dynastat_console -- \
//!   --origin http://dynastat.local:8000 \
//!   --stun-servers stun:stun.l.google.com:19302
//! ```

use clap::Parser;
use dynastat_console::config::fetch_stun_servers;
use dynastat_console::model::{spawn_render_task, RenderCell};
use dynastat_console::{
    ConsoleConfig, ConsoleEvent, DeviceModel, LayoutConfig, LinkEvent, Renderer, SessionConductor,
    SignalingLink,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Dynastat WebRTC console
///
/// Connects to a Dynastat device through its WebSocket signaling relay and
/// streams pressure telemetry and motor readouts.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// HTTP origin hosting the relay and the STUN list
    #[arg(
        long,
        default_value = "http://localhost:8000",
        env = "DYNASTAT_ORIGIN"
    )]
    origin: String,

    /// Device identifier on the relay
    #[arg(long, default_value = "test", env = "DYNASTAT_DEVICE_ID")]
    device_id: String,

    /// STUN servers (comma-separated); fetched from the origin when empty
    #[arg(long, value_delimiter = ',', env = "DYNASTAT_STUN_SERVERS")]
    stun_servers: Vec<String>,

    /// Seconds to wait for the device's answer before giving up
    #[arg(long, default_value_t = 30, env = "DYNASTAT_OFFER_TIMEOUT")]
    offer_timeout_secs: u64,

    /// Render tick interval in milliseconds
    #[arg(long, default_value_t = 16, env = "DYNASTAT_RENDER_INTERVAL_MS")]
    render_interval_ms: u64,
}

/// Receive the next link event, parking forever once the stream has ended
/// so a closed relay connection does not spin the select loop. A Connected
/// session keeps streaming on the peer transport after relay loss.
async fn next_link_event(rx: &mut Option<mpsc::UnboundedReceiver<LinkEvent>>) -> LinkEvent {
    match rx {
        Some(inner) => match inner.recv().await {
            Some(event) => event,
            None => {
                debug!("Signaling event stream ended");
                *rx = None;
                std::future::pending().await
            }
        },
        None => std::future::pending().await,
    }
}

/// Renders pressure snapshots as a trace-level summary line. A graphical
/// front end would replace this with an actual draw call.
struct LogRenderer;

impl Renderer for LogRenderer {
    fn render(&mut self, cells: &[RenderCell]) {
        let peak = cells.iter().map(|c| c.value).fold(0.0f64, f64::max);
        let active = cells.iter().filter(|c| c.value >= 1.0).count();
        debug!(cells = cells.len(), active, peak, "render tick");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();

    let mut config = ConsoleConfig::for_device(&args.origin, &args.device_id);
    config.offer_timeout_secs = args.offer_timeout_secs;
    config.render_interval_ms = args.render_interval_ms;

    config.stun_servers = if args.stun_servers.is_empty() {
        fetch_stun_servers(&args.origin).await?
    } else {
        args.stun_servers.clone()
    };
    config.validate()?;

    info!("Dynastat console v{}", dynastat_console::version());
    info!("Relay: {}", config.signaling_url);

    let (link, link_rx) = SignalingLink::connect(&config.signaling_url).await?;
    let mut link_rx = Some(link_rx);

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let model = Arc::new(DeviceModel::new(
        &LayoutConfig::reference(),
        config.motor_bounds.clone(),
        events_tx.clone(),
    ));

    let render_task = spawn_render_task(
        Arc::clone(&model),
        Box::new(LogRenderer),
        Duration::from_millis(config.render_interval_ms),
    );

    let conductor =
        SessionConductor::new(config, Arc::clone(&model), link.sender(), events_tx).await?;

    conductor.open().await?;

    loop {
        tokio::select! {
            link_event = next_link_event(&mut link_rx) => {
                match link_event {
                    LinkEvent::Signal(signal) => {
                        if let Err(e) = conductor.handle_signal(signal).await {
                            warn!("Failed to apply signaling message: {}", e);
                        }
                    }
                    LinkEvent::Lost { code, reason } => {
                        conductor.signaling_lost(code, &reason);
                    }
                }
            }
            console_event = events_rx.recv() => {
                let Some(event) = console_event else { break };
                match event {
                    ConsoleEvent::ControlsEnabled => {
                        info!("Session connected; controls enabled");
                    }
                    ConsoleEvent::NegotiationFailed { reason } => {
                        error!("Negotiation failed: {}", reason);
                        break;
                    }
                    ConsoleEvent::SignalingLost { code, reason } => {
                        warn!("Signaling relay lost ({}): {}", code, reason);
                    }
                    ConsoleEvent::TelemetryRate { frames } => {
                        info!("Telemetry: {} fps", frames);
                    }
                    ConsoleEvent::MotorReadout { name, text } => {
                        info!("Motor {}: {}", name, text);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, cleaning up...");
                break;
            }
        }
    }

    render_task.abort();
    conductor.close().await?;
    info!("Console shut down");

    Ok(())
}

fn init_tracing() {
    // RUST_LOG controls verbosity, defaulting to info
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
