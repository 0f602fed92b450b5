//! End-to-end negotiation against a mock WHIP server

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::routing::post;
use axum::Router;
use parking_lot::Mutex;
use srs_webrtc_core::webrtc::peer_connection::{IceCandidateCallback, IceStateCallback, TrackCallback};
use srs_webrtc_core::webrtc::{
    LocalTrack, MediaKind, PeerConnection, RemoteTrackInfo, RtpTrackSource, SdpType,
    SessionDescription, SessionObserver, TransceiverDirection,
};
use srs_webrtc_core::{Config, Role, SessionState, SignalingError, SignalingSession, VideoCodec};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;

const OFFER_SDP: &str = "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";
const ANSWER_SDP: &str = "v=0\r\no=SRS/6.0 1 2 IN IP4 0.0.0.0\r\ns=SRSPublishSession\r\nt=0 0\r\n";

#[derive(Default)]
struct MockPeer {
    calls: Mutex<Vec<String>>,
    remote: Mutex<Option<SessionDescription>>,
    on_ice_state: Mutex<Option<IceStateCallback>>,
    on_track: Mutex<Option<TrackCallback>>,
    fail_local: bool,
    fail_remote: bool,
}

impl MockPeer {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == call).count()
    }
}

#[async_trait]
impl PeerConnection for MockPeer {
    async fn add_transceiver(&self, kind: MediaKind, direction: TransceiverDirection) -> Result<(), SignalingError> {
        self.calls.lock().push(format!("transceiver {} {:?}", kind, direction));
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<(), SignalingError> {
        self.calls.lock().push(format!("track {}", track.kind()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, SignalingError> {
        self.calls.lock().push("create_offer".to_string());
        Ok(SessionDescription::offer(OFFER_SDP))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), SignalingError> {
        assert_eq!(desc.sdp_type, SdpType::Offer);
        self.calls.lock().push("set_local".to_string());
        if self.fail_local {
            return Err(SignalingError::Negotiation("offer rejected locally".to_string()));
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), SignalingError> {
        self.calls.lock().push("set_remote".to_string());
        if self.fail_remote {
            return Err(SignalingError::Negotiation("answer has no matching m-lines".to_string()));
        }
        *self.remote.lock() = Some(desc);

        if let Some(ref callback) = *self.on_ice_state.lock() {
            callback("connected".to_string());
        }
        if let Some(ref callback) = *self.on_track.lock() {
            callback(RemoteTrackInfo {
                kind: MediaKind::Video,
                id: "remote-video".to_string(),
                stream_id: "livestream".to_string(),
            });
        }
        Ok(())
    }

    fn on_ice_candidate(&self, _callback: IceCandidateCallback) {}

    fn on_ice_connection_state_change(&self, callback: IceStateCallback) {
        *self.on_ice_state.lock() = Some(callback);
    }

    fn on_track(&self, callback: TrackCallback) {
        *self.on_track.lock() = Some(callback);
    }

    async fn close(&self) -> Result<(), SignalingError> {
        self.calls.lock().push("close".to_string());
        Ok(())
    }
}

#[derive(Default)]
struct Recorder {
    states: Mutex<Vec<SessionState>>,
    ice: Mutex<Vec<String>>,
    tracks: Mutex<Vec<RemoteTrackInfo>>,
}

impl SessionObserver for Recorder {
    fn on_state(&self, _session_id: &str, state: SessionState) {
        self.states.lock().push(state);
    }

    fn on_ice_connection_state(&self, _session_id: &str, state: &str) {
        self.ice.lock().push(state.to_string());
    }

    fn on_remote_track(&self, _session_id: &str, track: &RemoteTrackInfo) {
        self.tracks.lock().push(track.clone());
    }
}

#[derive(Debug, Clone)]
struct SeenRequest {
    path_and_query: String,
    content_type: Option<String>,
    body: String,
}

struct MockServer {
    status: StatusCode,
    delay: Option<Duration>,
    requests: Mutex<Vec<SeenRequest>>,
    received: Notify,
    abandoned: AtomicBool,
}

/// Flags the request as abandoned if the handler is dropped before replying
struct InFlight<'a> {
    server: &'a MockServer,
    replied: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.replied {
            self.server.abandoned.store(true, Ordering::SeqCst);
        }
    }
}

async fn whip_handler(
    State(server): State<Arc<MockServer>>,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    server.requests.lock().push(SeenRequest {
        path_and_query: uri.path_and_query().map(|pq| pq.to_string()).unwrap_or_default(),
        content_type: headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string()),
        body,
    });
    server.received.notify_one();

    let mut in_flight = InFlight { server: &server, replied: false };
    if let Some(delay) = server.delay {
        tokio::time::sleep(delay).await;
    }
    in_flight.replied = true;
    drop(in_flight);
    if server.status.is_success() {
        (server.status, ANSWER_SDP.to_string())
    } else {
        (server.status, "internal error".to_string())
    }
}

async fn start_server(status: StatusCode, delay: Option<Duration>) -> (u16, Arc<MockServer>) {
    let server = Arc::new(MockServer {
        status,
        delay,
        requests: Mutex::new(Vec::new()),
        received: Notify::new(),
        abandoned: AtomicBool::new(false),
    });
    let app = Router::new()
        .route("/rtc/v1/whip/", post(whip_handler))
        .route("/rtc/v1/whip-play/", post(whip_handler))
        .with_state(server.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (port, server)
}

fn publish_session(port: u16, config: &Config, peer: Arc<MockPeer>, source: RtpTrackSource) -> SignalingSession {
    let locator = format!("http://127.0.0.1:{}/rtc/v1/whip/?app=live&stream=livestream", port);
    SignalingSession::for_locator(&locator, Role::Publish, &config.signaling, peer)
        .unwrap()
        .with_media_source(Arc::new(source))
}

#[tokio::test]
async fn publish_reaches_remote_description_set() {
    let (port, server) = start_server(StatusCode::OK, None).await;
    let peer = Arc::new(MockPeer::default());
    let recorder = Arc::new(Recorder::default());
    let config = Config::default();

    let mut session = publish_session(port, &config, peer.clone(), RtpTrackSource::new(VideoCodec::H264))
        .with_observer(recorder.clone());
    assert_eq!(
        session.endpoint().api_url,
        format!("http://127.0.0.1:{}/rtc/v1/whip/?app=live&stream=livestream", port)
    );

    let answer = session.negotiate().await.unwrap();
    assert_eq!(answer, ANSWER_SDP);

    let expected = [
        SessionState::Idle,
        SessionState::TransceiversConfigured,
        SessionState::CapturingMedia,
        SessionState::OfferCreated,
        SessionState::LocalDescriptionSet,
        SessionState::AwaitingAnswer,
        SessionState::RemoteDescriptionSet,
    ];
    assert_eq!(session.history(), &expected);
    assert_eq!(*recorder.states.lock(), expected[1..].to_vec());
    assert_eq!(session.handle().state(), SessionState::RemoteDescriptionSet);

    let requests = server.requests.lock().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path_and_query, "/rtc/v1/whip/?app=live&stream=livestream");
    assert_eq!(requests[0].content_type.as_deref(), Some("application/sdp"));
    assert_eq!(requests[0].body, OFFER_SDP);

    assert_eq!(
        peer.calls(),
        vec![
            "transceiver audio SendOnly",
            "transceiver video SendOnly",
            "track video",
            "track audio",
            "create_offer",
            "set_local",
            "set_remote",
        ]
    );
    let remote = peer.remote.lock().clone().unwrap();
    assert_eq!(remote.sdp_type, SdpType::Answer);
    assert_eq!(remote.sdp, ANSWER_SDP);

    assert_eq!(*recorder.ice.lock(), vec!["connected".to_string()]);
    assert_eq!(recorder.tracks.lock().len(), 1);

    assert!(session.is_open());
    session.close().await;
    assert_eq!(peer.count("close"), 1);
    assert_eq!(session.state(), SessionState::RemoteDescriptionSet);
    assert!(!session.is_open());
}

#[tokio::test]
async fn server_error_fails_without_remote_commit() {
    let (port, server) = start_server(StatusCode::INTERNAL_SERVER_ERROR, None).await;
    let peer = Arc::new(MockPeer::default());
    let config = Config::default();

    let mut session = publish_session(port, &config, peer.clone(), RtpTrackSource::new(VideoCodec::H264));
    let err = session.negotiate().await.unwrap_err();

    assert!(matches!(err, SignalingError::SignalingExchange(ref msg) if msg.contains("500")));
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(
        &session.history()[session.history().len() - 2..],
        &[SessionState::AwaitingAnswer, SessionState::Failed]
    );
    assert_eq!(server.requests.lock().len(), 1);
    assert_eq!(peer.count("set_remote"), 0);
    assert_eq!(peer.count("close"), 1);
    assert!(!session.is_open());

    session.close().await;
    assert_eq!(peer.count("close"), 1);
}

#[tokio::test]
async fn play_receives_only_and_skips_media() {
    let (port, server) = start_server(StatusCode::CREATED, None).await;
    let peer = Arc::new(MockPeer::default());
    let recorder = Arc::new(Recorder::default());
    let config = Config::default();

    let locator = format!("webrtc://127.0.0.1:{}/live/livestream?app=live&stream=livestream", port);
    let mut session = SignalingSession::for_locator(&locator, Role::Play, &config.signaling, peer.clone())
        .unwrap()
        .with_observer(recorder.clone());

    session.negotiate().await.unwrap();

    assert!(!session.history().contains(&SessionState::CapturingMedia));
    assert_eq!(session.state(), SessionState::RemoteDescriptionSet);
    assert_eq!(
        server.requests.lock()[0].path_and_query,
        "/rtc/v1/whip-play/?app=live&stream=livestream"
    );
    let calls = peer.calls();
    assert_eq!(calls[0], "transceiver audio RecvOnly");
    assert_eq!(calls[1], "transceiver video RecvOnly");
    assert!(!calls.iter().any(|c| c.starts_with("track")));
    assert_eq!(recorder.tracks.lock()[0].id, "remote-video");
}

#[tokio::test]
async fn missing_microphone_stops_before_offer() {
    let (port, server) = start_server(StatusCode::OK, None).await;
    let peer = Arc::new(MockPeer::default());
    let config = Config::default();
    let source = RtpTrackSource::new(VideoCodec::H264).without(MediaKind::Audio);

    let mut session = publish_session(port, &config, peer.clone(), source);
    let err = session.negotiate().await.unwrap_err();

    assert!(matches!(err, SignalingError::DeviceUnavailable { kind: MediaKind::Audio, .. }));
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(peer.count("track video"), 1);
    assert_eq!(peer.count("create_offer"), 0);
    assert!(server.requests.lock().is_empty());
}

#[tokio::test]
async fn cancel_during_exchange_discards_answer() {
    let (port, server) = start_server(StatusCode::OK, Some(Duration::from_secs(30))).await;
    let peer = Arc::new(MockPeer::default());
    let config = Config::default();

    let mut session = publish_session(port, &config, peer.clone(), RtpTrackSource::new(VideoCodec::H264));
    let handle = session.handle();

    let task = tokio::spawn(async move {
        let result = session.negotiate().await;
        (result, session)
    });

    server.received.notified().await;
    assert_eq!(handle.state(), SessionState::AwaitingAnswer);
    handle.cancel();

    let (result, session) = task.await.unwrap();
    assert_eq!(result.unwrap_err(), SignalingError::Cancelled);
    assert_eq!(handle.terminal().await, SessionState::Failed);
    assert_eq!(peer.count("set_remote"), 0);
    assert_eq!(peer.count("close"), 1);
    assert!(!session.is_open());
}

#[tokio::test]
async fn exchange_timeout_is_configurable() {
    let (port, _server) = start_server(StatusCode::OK, Some(Duration::from_secs(30))).await;
    let peer = Arc::new(MockPeer::default());
    let mut config = Config::default();
    config.signaling.exchange_timeout_ms = Some(200);

    let mut session = publish_session(port, &config, peer.clone(), RtpTrackSource::new(VideoCodec::H264));
    let err = session.negotiate().await.unwrap_err();

    assert!(matches!(err, SignalingError::SignalingExchange(ref msg) if msg.contains("200ms")));
    assert_eq!(peer.count("set_remote"), 0);
    assert_eq!(peer.count("close"), 1);
}

#[tokio::test]
async fn local_commit_failure_never_posts() {
    let (port, server) = start_server(StatusCode::OK, None).await;
    let peer = Arc::new(MockPeer { fail_local: true, ..Default::default() });
    let config = Config::default();

    let mut session = publish_session(port, &config, peer.clone(), RtpTrackSource::new(VideoCodec::H264));
    let err = session.negotiate().await.unwrap_err();

    assert!(matches!(err, SignalingError::Negotiation(_)));
    assert_eq!(
        &session.history()[session.history().len() - 2..],
        &[SessionState::OfferCreated, SessionState::Failed]
    );
    assert!(server.requests.lock().is_empty());
    assert_eq!(peer.count("set_remote"), 0);
    assert_eq!(peer.count("close"), 1);
    assert!(!session.is_open());
}

#[tokio::test]
async fn remote_commit_failure_is_terminal() {
    let (port, server) = start_server(StatusCode::OK, None).await;
    let peer = Arc::new(MockPeer { fail_remote: true, ..Default::default() });
    let config = Config::default();

    let mut session = publish_session(port, &config, peer.clone(), RtpTrackSource::new(VideoCodec::H264));
    let handle = session.handle();
    let err = session.negotiate().await.unwrap_err();

    assert!(matches!(err, SignalingError::Negotiation(_)));
    assert_eq!(
        &session.history()[session.history().len() - 2..],
        &[SessionState::AwaitingAnswer, SessionState::Failed]
    );
    assert_eq!(handle.terminal().await, SessionState::Failed);
    assert_eq!(server.requests.lock().len(), 1);
    assert_eq!(peer.count("set_remote"), 1);
    assert_eq!(peer.count("close"), 1);

    session.close().await;
    assert_eq!(peer.count("close"), 1);
}

#[tokio::test]
async fn dropping_negotiation_abandons_exchange() {
    let (port, server) = start_server(StatusCode::OK, Some(Duration::from_secs(30))).await;
    let peer = Arc::new(MockPeer::default());
    let config = Config::default();

    let mut session = publish_session(port, &config, peer.clone(), RtpTrackSource::new(VideoCodec::H264));
    let handle = session.handle();

    tokio::select! {
        _ = session.negotiate() => panic!("negotiation finished while the server was stalled"),
        _ = server.received.notified() => {}
    }
    assert_eq!(session.state(), SessionState::AwaitingAnswer);

    for _ in 0..50 {
        if server.abandoned.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(server.abandoned.load(Ordering::SeqCst));

    session.close().await;
    assert_eq!(handle.terminal().await, SessionState::Failed);
    assert_eq!(peer.count("set_remote"), 0);
    assert_eq!(peer.count("close"), 1);
    assert!(!session.is_open());
}
