//! Signaling session state machine
//!
//! Drives one publish/play attempt against an SRS server:
//! - Transceiver setup with a fixed direction
//! - Local media acquisition (publish/stream only)
//! - Offer creation and local commit
//! - One HTTP offer/answer exchange
//! - Remote commit of the answer
//!
//! Any failure is terminal. The session owns its PeerConnection and closes it
//! exactly once.

use super::media_track::MediaSource;
use super::peer_connection::{MediaKind, PeerConnection, RemoteTrackInfo, SessionDescription, TransceiverDirection};
use super::signaling::WhipClient;
use crate::config::SignalingConfig;
use crate::error::SignalingError;
use crate::locator::{self, SignalingEndpoint};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What the session does with the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Push local camera/microphone
    Publish,
    /// Pull a remote stream
    Play,
    /// Push a rendered scene
    Stream,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Publish => "publish",
            Role::Play => "play",
            Role::Stream => "stream",
        }
    }

    pub fn direction(&self) -> TransceiverDirection {
        match self {
            Role::Play => TransceiverDirection::RecvOnly,
            Role::Publish | Role::Stream => TransceiverDirection::SendOnly,
        }
    }

    pub fn needs_local_media(&self) -> bool {
        !matches!(self, Role::Play)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "publish" => Ok(Role::Publish),
            "play" => Ok(Role::Play),
            "stream" => Ok(Role::Stream),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    TransceiversConfigured,
    CapturingMedia,
    OfferCreated,
    LocalDescriptionSet,
    AwaitingAnswer,
    /// Terminal success
    RemoteDescriptionSet,
    /// Terminal failure
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::RemoteDescriptionSet | SessionState::Failed)
    }
}

/// Diagnostic hooks, never consulted for control flow
pub trait SessionObserver: Send + Sync {
    fn on_state(&self, _session_id: &str, _state: SessionState) {}

    fn on_ice_candidate(&self, _session_id: &str, _candidate: Option<&str>) {}

    fn on_ice_connection_state(&self, _session_id: &str, _state: &str) {}

    fn on_remote_track(&self, _session_id: &str, _track: &RemoteTrackInfo) {}
}

/// Cloneable view used to watch or tear down a running session
#[derive(Clone)]
pub struct SessionHandle {
    state_rx: watch::Receiver<SessionState>,
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Abandon the session; an in-flight exchange result is discarded
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Resolves with the terminal state once one is reached
    pub async fn terminal(&self) -> SessionState {
        let mut rx = self.state_rx.clone();
        if let Ok(state) = rx.wait_for(|state| state.is_terminal()).await {
            return *state;
        }
        let state = *rx.borrow();
        state
    }
}

/// A single publish/play negotiation
pub struct SignalingSession {
    id: String,
    role: Role,
    endpoint: SignalingEndpoint,
    client: WhipClient,
    peer_connection: Option<Arc<dyn PeerConnection>>,
    media_source: Option<Arc<dyn MediaSource>>,
    observer: Option<Arc<dyn SessionObserver>>,
    state_tx: watch::Sender<SessionState>,
    cancel_tx: Arc<watch::Sender<bool>>,
    history: Vec<SessionState>,
}

impl SignalingSession {
    pub fn new(
        role: Role,
        endpoint: SignalingEndpoint,
        peer_connection: Arc<dyn PeerConnection>,
        client: WhipClient,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (cancel_tx, _) = watch::channel(false);

        Self {
            id: endpoint.transaction_id.clone(),
            role,
            endpoint,
            client,
            peer_connection: Some(peer_connection),
            media_source: None,
            observer: None,
            state_tx,
            cancel_tx: Arc::new(cancel_tx),
            history: vec![SessionState::Idle],
        }
    }

    /// Parse `locator` and build a session using the configured defaults for `role`
    pub fn for_locator(
        locator: &str,
        role: Role,
        config: &SignalingConfig,
        peer_connection: Arc<dyn PeerConnection>,
    ) -> Result<Self, SignalingError> {
        let endpoint = locator::prepare(locator, &config.defaults_for(role))?;
        let client = WhipClient::new(config.exchange_timeout());
        Ok(Self::new(role, endpoint, peer_connection, client))
    }

    pub fn with_media_source(mut self, source: Arc<dyn MediaSource>) -> Self {
        self.media_source = Some(source);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn endpoint(&self) -> &SignalingEndpoint {
        &self.endpoint
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Every state entered so far, starting with `Idle`
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            state_rx: self.state_tx.subscribe(),
            cancel_tx: self.cancel_tx.clone(),
        }
    }

    /// Whether the PeerConnection is still held
    pub fn is_open(&self) -> bool {
        self.peer_connection.is_some()
    }

    /// Run the whole negotiation and return the answer SDP.
    ///
    /// Every PeerConnection call is made from the task awaiting this future;
    /// only the HTTP exchange runs on a spawned task.
    pub async fn negotiate(&mut self) -> Result<String, SignalingError> {
        if self.state() != SessionState::Idle {
            return Err(SignalingError::InvalidState(format!(
                "negotiate called in state {:?}",
                self.state()
            )));
        }
        let pc = match self.peer_connection.clone() {
            Some(pc) => pc,
            None => {
                return Err(SignalingError::InvalidState(
                    "peer connection already released".to_string(),
                ))
            }
        };

        info!(
            "Session {} start to {} {} via {}",
            self.id, self.role, self.endpoint.stream_url, self.endpoint.api_url
        );

        match self.run(pc).await {
            Ok(answer) => {
                info!("Session {} negotiated, remote description set", self.id);
                Ok(answer)
            }
            Err(e) => {
                error!("Session {} failed: {}", self.id, e);
                self.transition(SessionState::Failed);
                self.release().await;
                Err(e)
            }
        }
    }

    async fn run(&mut self, pc: Arc<dyn PeerConnection>) -> Result<String, SignalingError> {
        self.register_observers(&pc);

        let direction = self.role.direction();
        self.guarded(pc.add_transceiver(MediaKind::Audio, direction)).await?;
        self.guarded(pc.add_transceiver(MediaKind::Video, direction)).await?;
        debug!("Session {} added audio+video transceivers {:?}", self.id, direction);
        self.transition(SessionState::TransceiversConfigured);

        if self.role.needs_local_media() {
            self.transition(SessionState::CapturingMedia);
            self.acquire_local_media(&pc).await?;
        }

        let offer = self.guarded(pc.create_offer()).await?;
        debug!("Session {} offer: {}", self.id, offer.sdp);
        self.transition(SessionState::OfferCreated);

        self.guarded(pc.set_local_description(offer.clone())).await?;
        self.transition(SessionState::LocalDescriptionSet);

        self.transition(SessionState::AwaitingAnswer);
        let answer = self.exchange_description(&offer).await?;
        debug!("Session {} answer: {}", self.id, answer);

        self.guarded(pc.set_remote_description(SessionDescription::answer(answer.clone()))).await?;
        self.transition(SessionState::RemoteDescriptionSet);

        Ok(answer)
    }

    /// Video first, then audio
    async fn acquire_local_media(&self, pc: &Arc<dyn PeerConnection>) -> Result<(), SignalingError> {
        let source = match self.media_source.clone() {
            Some(source) => source,
            None => {
                return Err(SignalingError::DeviceUnavailable {
                    kind: MediaKind::Video,
                    reason: "no media source attached".to_string(),
                })
            }
        };

        for kind in [MediaKind::Video, MediaKind::Audio] {
            let track = self.guarded(source.acquire(kind)).await?;
            self.guarded(pc.add_track(&track)).await?;
            info!("Session {} add {} track {}", self.id, kind, track.id());
        }
        Ok(())
    }

    /// POST the offer on a separate task and bring the answer back here
    async fn exchange_description(&self, offer: &SessionDescription) -> Result<String, SignalingError> {
        let client = self.client.clone();
        let api_url = self.endpoint.api_url.clone();
        let sdp = offer.sdp.clone();
        info!("Session {} exchange SDP with {}", self.id, api_url);

        let mut task = ExchangeTask(tokio::spawn(async move { client.exchange(&api_url, &sdp).await }));

        tokio::select! {
            joined = &mut task.0 => match joined {
                Ok(result) => result,
                Err(e) => Err(SignalingError::SignalingExchange(format!("exchange task failed: {}", e))),
            },
            _ = cancelled(self.cancel_tx.subscribe()) => {
                task.0.abort();
                warn!("Session {} cancelled during exchange, answer discarded", self.id);
                Err(SignalingError::Cancelled)
            }
        }
    }

    /// Await `fut` unless the session gets cancelled first
    async fn guarded<T>(
        &self,
        fut: impl Future<Output = Result<T, SignalingError>>,
    ) -> Result<T, SignalingError> {
        if *self.cancel_tx.borrow() {
            return Err(SignalingError::Cancelled);
        }
        tokio::select! {
            result = fut => result,
            _ = cancelled(self.cancel_tx.subscribe()) => Err(SignalingError::Cancelled),
        }
    }

    fn register_observers(&self, pc: &Arc<dyn PeerConnection>) {
        let id = self.id.clone();
        let observer = self.observer.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<String>| {
            match candidate.as_deref() {
                Some(c) => debug!("Session {} OnIceCandidate {}", id, c),
                None => debug!("Session {} ICE gathering complete", id),
            }
            if let Some(ref observer) = observer {
                observer.on_ice_candidate(&id, candidate.as_deref());
            }
        }));

        let id = self.id.clone();
        let observer = self.observer.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: String| {
            info!("Session {} OnIceConnectionChange {}", id, state);
            if let Some(ref observer) = observer {
                observer.on_ice_connection_state(&id, &state);
            }
        }));

        let id = self.id.clone();
        let observer = self.observer.clone();
        pc.on_track(Box::new(move |track: RemoteTrackInfo| {
            info!("Session {} OnTrack {} id={}", id, track.kind, track.id);
            if let Some(ref observer) = observer {
                observer.on_remote_track(&id, &track);
            }
        }));
    }

    fn transition(&mut self, next: SessionState) {
        let prev = self.state();
        debug!("Session {} state change: {:?} -> {:?}", self.id, prev, next);
        self.state_tx.send_replace(next);
        self.history.push(next);
        if let Some(ref observer) = self.observer {
            observer.on_state(&self.id, next);
        }
    }

    async fn release(&mut self) {
        if let Some(pc) = self.peer_connection.take() {
            if let Err(e) = pc.close().await {
                warn!("Session {} close failed: {}", self.id, e);
            }
            info!("Session {} peer connection released", self.id);
        }
    }

    /// Tear the session down, releasing the PeerConnection if still held.
    ///
    /// A negotiated session keeps `RemoteDescriptionSet` as its state, so
    /// use `is_open()` to tell whether it has been closed. A session left
    /// mid-negotiation (its `negotiate()` future dropped) moves to `Failed`.
    pub async fn close(&mut self) {
        self.cancel_tx.send_replace(true);
        let state = self.state();
        if state != SessionState::Idle && !state.is_terminal() {
            warn!("Session {} closed while {:?}", self.id, state);
            self.transition(SessionState::Failed);
        }
        self.release().await;
    }
}

/// Aborts the exchange task when dropped, including when the caller drops
/// the `negotiate()` future mid-exchange
struct ExchangeTask(JoinHandle<Result<String, SignalingError>>);

impl Drop for ExchangeTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Drop for SignalingSession {
    fn drop(&mut self) {
        let Some(pc) = self.peer_connection.take() else {
            return;
        };
        let id = self.id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = pc.close().await {
                        warn!("Session {} close on drop failed: {}", id, e);
                    }
                });
            }
            Err(_) => warn!("Session {} dropped outside a runtime, peer connection not closed", id),
        }
    }
}

async fn cancelled(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::EndpointDefaults;
    use crate::webrtc::media_track::LocalTrack;
    use crate::webrtc::peer_connection::{IceCandidateCallback, IceStateCallback, TrackCallback};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingPeer {
        calls: Mutex<Vec<String>>,
        fail_offer: bool,
    }

    #[async_trait]
    impl PeerConnection for RecordingPeer {
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
            if self.fail_offer {
                return Err(SignalingError::Negotiation("no codecs".to_string()));
            }
            Ok(SessionDescription::offer("v=0\r\n"))
        }

        async fn set_local_description(&self, _desc: SessionDescription) -> Result<(), SignalingError> {
            self.calls.lock().push("set_local".to_string());
            Ok(())
        }

        async fn set_remote_description(&self, _desc: SessionDescription) -> Result<(), SignalingError> {
            self.calls.lock().push("set_remote".to_string());
            Ok(())
        }

        fn on_ice_candidate(&self, _callback: IceCandidateCallback) {}

        fn on_ice_connection_state_change(&self, _callback: IceStateCallback) {}

        fn on_track(&self, _callback: TrackCallback) {}

        async fn close(&self) -> Result<(), SignalingError> {
            self.calls.lock().push("close".to_string());
            Ok(())
        }
    }

    fn endpoint() -> SignalingEndpoint {
        locator::prepare(
            "webrtc://127.0.0.1:9/live/livestream",
            &EndpointDefaults::new("/rtc/v1/whip-play/", "http:"),
        )
        .unwrap()
    }

    #[test]
    fn test_role_directions() {
        assert_eq!(Role::Play.direction(), TransceiverDirection::RecvOnly);
        assert_eq!(Role::Publish.direction(), TransceiverDirection::SendOnly);
        assert_eq!(Role::Stream.direction(), TransceiverDirection::SendOnly);
        assert!(!Role::Play.needs_local_media());
        assert_eq!("Stream".parse::<Role>().unwrap(), Role::Stream);
        assert!("record".parse::<Role>().is_err());
    }

    #[tokio::test]
    async fn test_offer_failure_stops_sequence() {
        let peer = Arc::new(RecordingPeer { fail_offer: true, ..Default::default() });
        let mut session = SignalingSession::new(Role::Play, endpoint(), peer.clone(), WhipClient::default());

        let err = session.negotiate().await.unwrap_err();
        assert!(matches!(err, SignalingError::Negotiation(_)));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(
            session.history(),
            &[SessionState::Idle, SessionState::TransceiversConfigured, SessionState::Failed]
        );
        assert_eq!(
            *peer.calls.lock(),
            vec![
                "transceiver audio RecvOnly".to_string(),
                "transceiver video RecvOnly".to_string(),
                "create_offer".to_string(),
                "close".to_string(),
            ]
        );
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_publish_without_media_source_fails() {
        let peer = Arc::new(RecordingPeer::default());
        let mut session = SignalingSession::new(Role::Publish, endpoint(), peer.clone(), WhipClient::default());

        let err = session.negotiate().await.unwrap_err();
        assert!(matches!(err, SignalingError::DeviceUnavailable { kind: MediaKind::Video, .. }));
        assert_eq!(session.history().last(), Some(&SessionState::Failed));
        assert!(!peer.calls.lock().contains(&"create_offer".to_string()));
    }

    #[tokio::test]
    async fn test_negotiate_twice_is_invalid() {
        let peer = Arc::new(RecordingPeer { fail_offer: true, ..Default::default() });
        let mut session = SignalingSession::new(Role::Play, endpoint(), peer, WhipClient::default());
        let _ = session.negotiate().await;
        assert!(matches!(session.negotiate().await, Err(SignalingError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let peer = Arc::new(RecordingPeer::default());
        let mut session = SignalingSession::new(Role::Play, endpoint(), peer.clone(), WhipClient::default());
        let handle = session.handle();
        handle.cancel();

        assert_eq!(session.negotiate().await.unwrap_err(), SignalingError::Cancelled);
        assert_eq!(handle.state(), SessionState::Failed);
        assert_eq!(*peer.calls.lock(), vec!["close".to_string()]);
    }

    #[tokio::test]
    async fn test_close_releases_once() {
        let peer = Arc::new(RecordingPeer::default());
        let mut session = SignalingSession::new(Role::Play, endpoint(), peer.clone(), WhipClient::default());
        session.close().await;
        session.close().await;
        drop(session);
        assert_eq!(*peer.calls.lock(), vec!["close".to_string()]);
    }
}
