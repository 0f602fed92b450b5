//! Configuration management for srs-webrtc-core

use crate::locator::EndpointDefaults;
use crate::webrtc::Role;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Video codec advertised for publishing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    VP8,
    VP9,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::VP8 => "vp8",
            VideoCodec::VP9 => "vp9",
        }
    }

    pub fn rtp_payload_type(&self) -> u8 {
        match self {
            VideoCodec::H264 => 96,
            VideoCodec::VP8 => 97,
            VideoCodec::VP9 => 98,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Signaling configuration
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// WebRTC configuration
    #[serde(default)]
    pub webrtc: WebRTCConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP signaling defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// Schema used when the locator has no `schema` query ("http:" or "https:")
    #[serde(default = "default_schema")]
    pub default_schema: String,

    /// API path for publish/stream sessions
    #[serde(default = "default_publish_path")]
    pub publish_path: String,

    /// API path for play sessions
    #[serde(default = "default_play_path")]
    pub play_path: String,

    /// Upper bound for the offer/answer exchange, unbounded when unset
    #[serde(default)]
    pub exchange_timeout_ms: Option<u64>,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            default_schema: default_schema(),
            publish_path: default_publish_path(),
            play_path: default_play_path(),
            exchange_timeout_ms: None,
        }
    }
}

impl SignalingConfig {
    /// Endpoint defaults for `role`
    pub fn defaults_for(&self, role: Role) -> EndpointDefaults {
        let path = match role {
            Role::Play => &self.play_path,
            Role::Publish | Role::Stream => &self.publish_path,
        };
        EndpointDefaults::new(path.clone(), self.default_schema.clone())
    }

    pub fn exchange_timeout(&self) -> Option<Duration> {
        self.exchange_timeout_ms.map(Duration::from_millis)
    }
}

/// ICE server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

/// WebRTC engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRTCConfig {
    /// ICE servers handed to the peer connection
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServerConfig>,

    /// Video codec selection
    #[serde(default)]
    pub video_codec: VideoCodec,
}

impl Default for WebRTCConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            video_codec: VideoCodec::H264,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level, overridden by SRS_WEBRTC_LOG
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        let schema = self.signaling.default_schema.trim_end_matches(':');
        if schema != "http" && schema != "https" {
            return Err("Signaling default_schema must be http: or https:".into());
        }

        if !self.signaling.publish_path.starts_with('/') || !self.signaling.play_path.starts_with('/') {
            return Err("Signaling API paths must start with '/'".into());
        }

        if self.signaling.exchange_timeout_ms == Some(0) {
            return Err("Signaling exchange timeout must be non-zero when set".into());
        }

        for server in &self.webrtc.ice_servers {
            if server.urls.is_empty() {
                return Err("ICE server entry has no urls".into());
            }
            for url in &server.urls {
                if !(url.starts_with("stun:") || url.starts_with("turn:") || url.starts_with("turns:")) {
                    return Err(format!("ICE server url must be stun:, turn: or turns:, got {}", url).into());
                }
            }
        }

        Ok(())
    }
}


fn default_schema() -> String {
    "http:".to_string()
}

fn default_publish_path() -> String {
    "/rtc/v1/whip/".to_string()
}

fn default_play_path() -> String {
    "/rtc/v1/whip-play/".to_string()
}

fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig {
        urls: vec!["stun:stun.l.google.com:19302".to_string()],
        username: None,
        credential: None,
    }]
}
