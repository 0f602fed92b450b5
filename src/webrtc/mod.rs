//! WebRTC session establishment
//!
//! This module provides the publish/play negotiation against an SRS server:
//! - PeerConnection capability and its webrtc-rs adapter
//! - Local media tracks for publishing
//! - WHIP-style HTTP offer/answer exchange
//! - The signaling session state machine

pub mod peer_connection;
pub mod media_track;
pub mod signaling;
pub mod session;

pub use peer_connection::{
    MediaKind, PeerConnection, PeerConnectionFactory, RemoteTrackInfo, RtcPeerConnection,
    SdpType, SessionDescription, TransceiverDirection,
};
pub use media_track::{LocalTrack, MediaSource, RtpTrackSource};
pub use signaling::WhipClient;
pub use session::{Role, SessionHandle, SessionObserver, SessionState, SignalingSession};
