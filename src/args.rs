use clap::{Parser, Subcommand};
use std::path::PathBuf;

use srs_webrtc_core::config;
use srs_webrtc_core::Role;

#[derive(Parser, Debug)]
#[command(name = "srs-webrtc-core")]
#[command(author = "SRS WebRTC Team")]
#[command(version = "0.2.0")]
#[command(about = "WHIP-style WebRTC signaling client for SRS", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/srs-webrtc-core.toml")]
    pub config: PathBuf,

    /// Bound for the HTTP offer/answer exchange in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the parsed locator and signaling endpoint as JSON
    Resolve {
        /// Stream locator, e.g. webrtc://localhost/live/livestream
        url: String,

        /// Role whose default API path is used
        #[arg(long, default_value = "publish")]
        role: Role,
    },

    /// Publish local RTP tracks via WHIP
    Publish { url: String },

    /// Play a remote stream via WHIP
    Play { url: String },

    /// Stream a rendered scene via WHIP
    Stream { url: String },
}

impl Command {
    /// Session role and locator, `None` for resolve
    pub fn session(&self) -> Option<(Role, &str)> {
        match self {
            Command::Resolve { .. } => None,
            Command::Publish { url } => Some((Role::Publish, url)),
            Command::Play { url } => Some((Role::Play, url)),
            Command::Stream { url } => Some((Role::Stream, url)),
        }
    }
}

impl Args {
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        config::Config::load(&self.config)
    }
}
