//! Local media tracks for publishing
//!
//! Capture devices live outside this crate. A [`MediaSource`] hands the
//! session one outbound track per media kind; [`RtpTrackSource`] creates RTP
//! tracks the host feeds with already-encoded packets.

use super::peer_connection::{video_capability, MediaKind};
use crate::config::VideoCodec;
use crate::error::SignalingError;
use async_trait::async_trait;
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};

/// Stream id shared by the tracks of one publisher
pub const DEFAULT_STREAM_ID: &str = "srs-webrtc-stream";

/// Outbound track bound to a peer connection
#[derive(Clone)]
pub struct LocalTrack {
    kind: MediaKind,
    track: Arc<TrackLocalStaticRTP>,
    first_rtp_logged: Arc<AtomicBool>,
}

impl LocalTrack {
    pub fn new(kind: MediaKind, track: Arc<TrackLocalStaticRTP>) -> Self {
        Self {
            kind,
            track,
            first_rtp_logged: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        self.track.id()
    }

    pub fn stream_id(&self) -> &str {
        self.track.stream_id()
    }

    pub fn rtp_track(&self) -> Arc<TrackLocalStaticRTP> {
        self.track.clone()
    }

    /// Write one marshalled RTP packet to every bound sender
    pub async fn write_rtp(&self, packet: &[u8]) -> Result<usize, SignalingError> {
        let written = self.track.write(packet).await
            .map_err(|e| SignalingError::Negotiation(format!("RTP write on {} failed: {}", self.id(), e)))?;
        if !self.first_rtp_logged.swap(true, Ordering::Relaxed) {
            info!("Track {} sent first RTP packet ({} bytes)", self.id(), packet.len());
        }
        Ok(written)
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("kind", &self.kind)
            .field("id", &self.id())
            .finish()
    }
}

/// Provider of local outbound tracks
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire the producer for `kind`.
    ///
    /// Returns [`SignalingError::DeviceUnavailable`] when the device is
    /// missing or access was denied.
    async fn acquire(&self, kind: MediaKind) -> Result<LocalTrack, SignalingError>;
}

/// Creates static RTP tracks, H.264/VP8/VP9 video and Opus audio
pub struct RtpTrackSource {
    video_codec: VideoCodec,
    stream_id: String,
    unavailable: HashSet<MediaKind>,
    tracks: Mutex<Vec<LocalTrack>>,
}

impl RtpTrackSource {
    pub fn new(video_codec: VideoCodec) -> Self {
        Self {
            video_codec,
            stream_id: DEFAULT_STREAM_ID.to_string(),
            unavailable: HashSet::new(),
            tracks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = stream_id.into();
        self
    }

    /// Report `kind` as having no device
    pub fn without(mut self, kind: MediaKind) -> Self {
        self.unavailable.insert(kind);
        self
    }

    /// Tracks handed out so far
    pub fn tracks(&self) -> Vec<LocalTrack> {
        self.tracks.lock().clone()
    }

    /// Most recent track of `kind`
    pub fn track(&self, kind: MediaKind) -> Option<LocalTrack> {
        self.tracks.lock().iter().rev().find(|t| t.kind() == kind).cloned()
    }

    fn capability(&self, kind: MediaKind) -> RTCRtpCodecCapability {
        match kind {
            MediaKind::Video => video_capability(self.video_codec),
            MediaKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                rtcp_feedback: vec![],
            },
        }
    }
}

#[async_trait]
impl MediaSource for RtpTrackSource {
    async fn acquire(&self, kind: MediaKind) -> Result<LocalTrack, SignalingError> {
        if self.unavailable.contains(&kind) {
            return Err(SignalingError::DeviceUnavailable {
                kind,
                reason: "no device found".to_string(),
            });
        }

        let track = Arc::new(TrackLocalStaticRTP::new(
            self.capability(kind),
            format!("{}-{}", kind, uuid::Uuid::new_v4()),
            self.stream_id.clone(),
        ));
        let local = LocalTrack::new(kind, track);
        debug!("Created {} track {} in stream {}", kind, local.id(), self.stream_id);

        self.tracks.lock().push(local.clone());
        Ok(local)
    }
}
