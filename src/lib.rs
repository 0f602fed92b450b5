//! srs-webrtc-core - WebRTC signaling core for SRS media servers
//!
//! Parses SRS stream locators, derives the WHIP-style HTTP signaling endpoint
//! and drives a single offer/answer negotiation over a PeerConnection.

pub mod config;
pub mod error;
pub mod locator;
pub mod webrtc;

// Re-exports
pub use config::{Config, SignalingConfig, WebRTCConfig, VideoCodec};
pub use error::SignalingError;
pub use locator::{EndpointDefaults, SignalingEndpoint, UrlDescriptor};
pub use self::webrtc::{Role, SessionHandle, SessionState, SignalingSession};
