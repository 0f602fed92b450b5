//! WebRTC PeerConnection capability
//!
//! The signaling session only talks to the [`PeerConnection`] trait. The
//! [`RtcPeerConnection`] adapter backs it with a webrtc-rs `RTCPeerConnection`
//! built by [`PeerConnectionFactory`].

use super::media_track::LocalTrack;
use crate::config::{IceServerConfig, VideoCodec, WebRTCConfig};
use crate::error::SignalingError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_VP8, MIME_TYPE_VP9};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Media kind of a transceiver or track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed transceiver direction, no renegotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverDirection {
    SendOnly,
    RecvOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session description as exchanged with the signaling server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SdpType::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SdpType::Answer, sdp: sdp.into() }
    }
}

/// Remote track announced by the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackInfo {
    pub kind: MediaKind,
    pub id: String,
    pub stream_id: String,
}

/// Callback for ICE candidate discovery, `None` when gathering completes
pub type IceCandidateCallback = Box<dyn Fn(Option<String>) + Send + Sync>;

/// Callback for ICE connection state changes
pub type IceStateCallback = Box<dyn Fn(String) + Send + Sync>;

/// Callback for remote track arrival
pub type TrackCallback = Box<dyn Fn(RemoteTrackInfo) + Send + Sync>;

/// Operations the signaling session needs from a WebRTC engine.
///
/// Registering a callback replaces any previously registered one.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_transceiver(
        &self,
        kind: MediaKind,
        direction: TransceiverDirection,
    ) -> Result<(), SignalingError>;

    async fn add_track(&self, track: &LocalTrack) -> Result<(), SignalingError>;

    async fn create_offer(&self) -> Result<SessionDescription, SignalingError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), SignalingError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), SignalingError>;

    fn on_ice_candidate(&self, callback: IceCandidateCallback);

    fn on_ice_connection_state_change(&self, callback: IceStateCallback);

    fn on_track(&self, callback: TrackCallback);

    async fn close(&self) -> Result<(), SignalingError>;
}

/// webrtc-rs backed [`PeerConnection`]
pub struct RtcPeerConnection {
    inner: Arc<RTCPeerConnection>,
}

impl RtcPeerConnection {
    pub fn new(inner: Arc<RTCPeerConnection>) -> Self {
        Self { inner }
    }

    /// Underlying webrtc-rs connection, for stats or data channels
    pub fn inner(&self) -> &Arc<RTCPeerConnection> {
        &self.inner
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, SignalingError> {
    match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)
            .map_err(|e| SignalingError::Negotiation(format!("Invalid SDP offer: {}", e))),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)
            .map_err(|e| SignalingError::Negotiation(format!("Invalid SDP answer: {}", e))),
    }
}

#[async_trait]
impl PeerConnection for RtcPeerConnection {
    async fn add_transceiver(
        &self,
        kind: MediaKind,
        direction: TransceiverDirection,
    ) -> Result<(), SignalingError> {
        let codec_type = match kind {
            MediaKind::Audio => RTPCodecType::Audio,
            MediaKind::Video => RTPCodecType::Video,
        };
        let direction = match direction {
            TransceiverDirection::SendOnly => RTCRtpTransceiverDirection::Sendonly,
            TransceiverDirection::RecvOnly => RTCRtpTransceiverDirection::Recvonly,
        };
        self.inner
            .add_transceiver_from_kind(
                codec_type,
                Some(RTCRtpTransceiverInit {
                    direction,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| SignalingError::Negotiation(format!("Failed to add {} transceiver: {}", kind, e)))?;
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<(), SignalingError> {
        let rtp_track: Arc<dyn TrackLocal + Send + Sync> = track.rtp_track();
        self.inner
            .add_track(rtp_track)
            .await
            .map_err(|e| SignalingError::Negotiation(format!("Failed to add track {}: {}", track.id(), e)))?;
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, SignalingError> {
        let offer = self.inner.create_offer(None).await
            .map_err(|e| SignalingError::Negotiation(format!("Failed to create offer: {}", e)))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), SignalingError> {
        let desc = to_rtc_description(desc)?;
        self.inner.set_local_description(desc).await
            .map_err(|e| SignalingError::Negotiation(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), SignalingError> {
        let desc = to_rtc_description(desc)?;
        self.inner.set_remote_description(desc).await
            .map_err(|e| SignalingError::Negotiation(format!("Failed to set remote description: {}", e)))
    }

    fn on_ice_candidate(&self, callback: IceCandidateCallback) {
        let callback = Arc::new(callback);
        self.inner.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let callback = callback.clone();
            Box::pin(async move {
                let candidate_str = candidate.map(|c| c.to_json().map(|j| j.candidate).unwrap_or_default());
                callback(candidate_str);
            })
        }));
    }

    fn on_ice_connection_state_change(&self, callback: IceStateCallback) {
        let callback = Arc::new(callback);
        self.inner.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let callback = callback.clone();
            Box::pin(async move {
                callback(state.to_string());
            })
        }));
    }

    fn on_track(&self, callback: TrackCallback) {
        let callback = Arc::new(callback);
        self.inner.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                let callback = callback.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Audio => MediaKind::Audio,
                        _ => MediaKind::Video,
                    };
                    callback(RemoteTrackInfo {
                        kind,
                        id: track.id().to_string(),
                        stream_id: track.stream_id().to_string(),
                    });
                })
            },
        ));
    }

    async fn close(&self) -> Result<(), SignalingError> {
        self.inner.close().await
            .map_err(|e| SignalingError::Negotiation(format!("Failed to close connection: {}", e)))
    }
}

/// Builds webrtc-rs peer connections from configuration
pub struct PeerConnectionFactory {
    config: WebRTCConfig,
}

impl PeerConnectionFactory {
    pub fn new(config: WebRTCConfig) -> Self {
        Self { config }
    }

    /// Create a new PeerConnection with the configured codecs and ICE servers
    pub async fn create(&self) -> Result<RtcPeerConnection, SignalingError> {
        let mut media_engine = MediaEngine::default();
        self.register_codecs(&mut media_engine)?;

        // Interceptors for RTCP feedback
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| SignalingError::Negotiation(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: to_rtc_ice_servers(&self.config.ice_servers),
            ..Default::default()
        };

        let peer_connection = api.new_peer_connection(rtc_config).await
            .map_err(|e| SignalingError::Negotiation(format!("Failed to create peer connection: {}", e)))?;

        Ok(RtcPeerConnection::new(Arc::new(peer_connection)))
    }

    /// Register Opus plus the configured video codec
    fn register_codecs(&self, media_engine: &mut MediaEngine) -> Result<(), SignalingError> {
        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_string(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                    rtcp_feedback: vec![],
                },
                payload_type: 111,
                ..Default::default()
            },
            RTPCodecType::Audio,
        ).map_err(|e| SignalingError::Negotiation(format!("Failed to register Opus: {}", e)))?;

        let codec = self.config.video_codec;
        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: video_capability(codec),
                payload_type: codec.rtp_payload_type(),
                ..Default::default()
            },
            RTPCodecType::Video,
        ).map_err(|e| SignalingError::Negotiation(format!("Failed to register {}: {}", codec.as_str(), e)))?;

        Ok(())
    }
}

/// RTP capability advertised for a video codec
pub fn video_capability(codec: VideoCodec) -> RTCRtpCodecCapability {
    let (mime_type, fmtp) = match codec {
        VideoCodec::H264 => (MIME_TYPE_H264, "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"),
        VideoCodec::VP8 => (MIME_TYPE_VP8, ""),
        VideoCodec::VP9 => (MIME_TYPE_VP9, "profile-id=0"),
    };
    RTCRtpCodecCapability {
        mime_type: mime_type.to_string(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: fmtp.to_string(),
        rtcp_feedback: vec![],
    }
}

fn to_rtc_ice_servers(servers: &[IceServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}
