//! srs-webrtc-core - Main entry point
//!
//! Resolves SRS locators or runs a single publish/play negotiation.

mod args;

use args::{Args, Command};
use clap::Parser;
use log::{error, info, warn};
use srs_webrtc_core::locator;
use srs_webrtc_core::webrtc::{
    PeerConnectionFactory, RemoteTrackInfo, RtpTrackSource, SessionObserver,
};
use srs_webrtc_core::{Config, Role, SessionState, SignalingSession};
use std::sync::Arc;
use tokio::signal;

/// Logs ICE and track events at info level
struct ConsoleObserver;

impl SessionObserver for ConsoleObserver {
    fn on_state(&self, session_id: &str, state: SessionState) {
        info!("[{}] {:?}", session_id, state);
    }

    fn on_ice_connection_state(&self, session_id: &str, state: &str) {
        info!("[{}] ICE connection {}", session_id, state);
    }

    fn on_remote_track(&self, session_id: &str, track: &RemoteTrackInfo) {
        info!("[{}] remote {} track {} (stream {})", session_id, track.kind, track.id, track.stream_id);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match args.load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load config {:?}: {}, using defaults", args.config, e);
            Config::default()
        }
    };

    // Initialize logging with noise filtering for third-party WebRTC crates
    let log_level = if args.verbose { "debug".to_string() } else { config.logging.level.clone() };
    env_logger::Builder::new()
        .parse_filters(&std::env::var("SRS_WEBRTC_LOG").unwrap_or(log_level))
        .filter_module("webrtc_ice", log::LevelFilter::Error)
        .filter_module("webrtc_dtls", log::LevelFilter::Error)
        .filter_module("webrtc_mdns", log::LevelFilter::Error)
        .init();

    info!("srs-webrtc-core v{}", env!("CARGO_PKG_VERSION"));

    if let Some(timeout) = args.timeout_ms {
        info!("Overriding exchange timeout to {}ms", timeout);
        config.signaling.exchange_timeout_ms = Some(timeout);
    }
    config.validate()?;

    if let Command::Resolve { url, role } = &args.command {
        let endpoint = locator::prepare(url, &config.signaling.defaults_for(*role))?;
        println!("{}", serde_json::to_string_pretty(&endpoint)?);
        return Ok(());
    }

    if let Some((role, url)) = args.command.session() {
        run_session(role, url, &config).await?;
    }

    Ok(())
}

/// Negotiate once, then hold the connection until Ctrl-C
async fn run_session(role: Role, url: &str, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Start to {} {}", role, url);

    let factory = PeerConnectionFactory::new(config.webrtc.clone());
    let peer_connection = Arc::new(factory.create().await?);

    let mut session = SignalingSession::for_locator(url, role, &config.signaling, peer_connection)?
        .with_observer(Arc::new(ConsoleObserver));
    if role.needs_local_media() {
        let source = RtpTrackSource::new(config.webrtc.video_codec)
            .with_stream_id(session.endpoint().descriptor.stream.clone());
        session = session.with_media_source(Arc::new(source));
    }

    let handle = session.handle();
    let ctrl_c = tokio::spawn({
        let handle = handle.clone();
        async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received, tearing down session");
                handle.cancel();
            }
        }
    });

    let result = session.negotiate().await;
    match result {
        Ok(_) => {
            info!("Session {} established, press Ctrl-C to stop", session.id());
            handle.cancelled().await;
            session.close().await;
            ctrl_c.abort();
            Ok(())
        }
        Err(e) => {
            error!("Session {} failed: {}", session.id(), e);
            ctrl_c.abort();
            Err(e.into())
        }
    }
}
