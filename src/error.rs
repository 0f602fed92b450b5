//! Error types shared by the locator parser and the signaling session

use crate::webrtc::MediaKind;
use std::error::Error;
use std::fmt;

/// Signaling-related errors
///
/// Every variant is terminal for the session that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    /// Locator could not be parsed
    MalformedUrl(String),
    /// Capture device denied or missing for one media kind
    DeviceUnavailable { kind: MediaKind, reason: String },
    /// A PeerConnection call reported failure
    Negotiation(String),
    /// HTTP POST failed or returned non-2xx
    SignalingExchange(String),
    /// Session torn down before reaching a terminal state
    Cancelled,
    /// Operation not allowed in the current session state
    InvalidState(String),
}

impl fmt::Display for SignalingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalingError::MalformedUrl(msg) => write!(f, "Malformed url: {}", msg),
            SignalingError::DeviceUnavailable { kind, reason } => {
                write!(f, "{} device unavailable: {}", kind, reason)
            }
            SignalingError::Negotiation(msg) => write!(f, "Negotiation error: {}", msg),
            SignalingError::SignalingExchange(msg) => write!(f, "Signaling exchange error: {}", msg),
            SignalingError::Cancelled => write!(f, "Session cancelled"),
            SignalingError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl Error for SignalingError {}
