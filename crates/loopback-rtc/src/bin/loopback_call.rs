//! Loopback call binary
//!
//! Acquires synthetic local media, negotiates a call between two in-process
//! endpoints, keeps it up for a while and hangs up.
//!
//! # Usage
//!
//! ```bash
//! # Simulated transport, hang up after 5 seconds
//! cargo run --bin loopback_call -- --duration-secs 5
//!
//! # Real webrtc peer connections with a STUN server
//! cargo run --bin loopback_call -- \
//!   --backend webrtc \
//!   --stun-servers stun:stun.l.google.com:19302
//!
//! # Load settings from a file, print the signaling record
//! cargo run --bin loopback_call -- --config ./loopback.toml --dump-signaling
//! ```

use anyhow::Context;
use clap::Parser;
use loopback_rtc::{
    transport_factory, ControllerState, IceServerConfig, LoggingConsumer, LoopbackConfig,
    NegotiationOutcome, SessionController, SyntheticMediaSource, TransportBackend,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Loopback WebRTC call
///
/// Runs offer/answer and trickle ICE between two endpoints in this process.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "LOOPBACK_CONFIG")]
    config: Option<PathBuf>,

    /// Peer transport: simulated or webrtc
    #[arg(short, long, env = "LOOPBACK_BACKEND")]
    backend: Option<TransportBackend>,

    /// STUN servers (comma-separated)
    #[arg(long, value_delimiter = ',', env = "LOOPBACK_STUN_SERVERS")]
    stun_servers: Vec<String>,

    /// Do not capture audio
    #[arg(long, default_value_t = false, env = "LOOPBACK_NO_AUDIO")]
    no_audio: bool,

    /// Do not capture video
    #[arg(long, default_value_t = false, env = "LOOPBACK_NO_VIDEO")]
    no_video: bool,

    /// Seconds to stay in the call; waits for Ctrl+C when omitted
    #[arg(long, env = "LOOPBACK_DURATION_SECS")]
    duration_secs: Option<u64>,

    /// Print every relayed signaling message as JSON after hangup
    #[arg(long, default_value_t = false)]
    dump_signaling: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info,loopback_rtc=debug", env = "LOOPBACK_LOG_LEVEL")]
    log_level: String,
}

impl Args {
    fn to_config(&self) -> anyhow::Result<LoopbackConfig> {
        let mut config = match &self.config {
            Some(path) => LoopbackConfig::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => LoopbackConfig::default(),
        };

        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if !self.stun_servers.is_empty() {
            config.ice_servers.push(IceServerConfig {
                urls: self.stun_servers.clone(),
                username: String::new(),
                credential: String::new(),
            });
        }
        if self.no_audio {
            config.constraints.audio = false;
        }
        if self.no_video {
            config.constraints.video = false;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn init_tracing(default_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = args.to_config()?;
    info!(
        "Loopback call v{} (backend={:?}, ice_servers={})",
        loopback_rtc::version(),
        config.backend,
        config.ice_servers.len()
    );

    let controller = SessionController::new(
        config.clone(),
        Arc::new(SyntheticMediaSource::new()),
        transport_factory(&config),
        Arc::new(LoggingConsumer),
    );

    controller.start().await.context("failed to acquire local media")?;

    match controller.call().await {
        Ok(NegotiationOutcome::Completed) => info!("Call negotiated"),
        Ok(NegotiationOutcome::Cancelled { at }) => warn!("Call cancelled during {}", at),
        Err(e) => warn!("Call failed: {}", e),
    }

    if controller.state() == ControllerState::InCall {
        match args.duration_secs {
            Some(secs) => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
                }
            }
            None => {
                info!("In call; press Ctrl+C to hang up");
                tokio::signal::ctrl_c()
                    .await
                    .context("failed to listen for Ctrl+C")?;
            }
        }
    }

    let session = controller.session();
    controller.hangup().await;

    if let Some(session) = session {
        match session.setup_time() {
            Some(elapsed) => info!("Setup time: {:?}", elapsed),
            None => info!("Endpoints never both reached connected"),
        }

        if args.dump_signaling {
            for message in session.signaling().snapshot() {
                println!("{}", message.to_json()?);
            }
        }
    }

    Ok(())
}
