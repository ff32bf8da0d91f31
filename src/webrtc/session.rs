//! WebRTC Session Management
//!
//! Manages the lifecycle of ingest sessions including:
//! - Offer/answer negotiation per process id
//! - Binding the inbound video track once ICE connects
//! - Periodic keyframe requests while connected
//! - Teardown on stop, disconnect or transport failure

use super::data_channel::{ControlChannel, SessionControl};
use super::media_track::{InboundTrack, KeyframeRequester, RemoteTrack};
use super::peer_connection::PeerConnectionManager;
use super::signaling::NegotiationRequest;
use super::track_registry::TrackRegistry;
use super::WebRTCError;
use crate::config::{RecordingConfig, WebRTCConfig};
use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no offer applied yet
    New,
    /// Offer applied, waiting for ICE
    Negotiating,
    /// ICE connected, track bound if one arrived
    Connected,
    /// Transport lost, peer connection released
    Disconnected,
    /// Torn down
    Closed,
}

/// Inputs to the session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    OfferReceived,
    TransportConnected,
    TransportDisconnected,
    Close,
}

impl SessionState {
    /// Next state for `event`, or `None` if the event does not apply
    pub fn next(self, event: SessionEvent) -> Option<SessionState> {
        match (self, event) {
            (SessionState::Closed, _) => None,
            (_, SessionEvent::Close) => Some(SessionState::Closed),
            (SessionState::New, SessionEvent::OfferReceived) => Some(SessionState::Negotiating),
            (SessionState::Negotiating, SessionEvent::TransportConnected) => Some(SessionState::Connected),
            (SessionState::Connected, SessionEvent::TransportDisconnected) => Some(SessionState::Disconnected),
            _ => None,
        }
    }
}

struct SessionInner<T> {
    state: SessionState,
    /// Track received before ICE connected
    pending: Option<Arc<T>>,
    bound: Option<Arc<T>>,
    keyframes: Option<KeyframeRequester>,
}

/// One negotiated peer connection
pub struct SignalingSession<T: RemoteTrack = InboundTrack> {
    id: String,
    peer_connection: Arc<RTCPeerConnection>,
    registry: TrackRegistry<T>,
    keyframe_interval: Duration,
    inner: Mutex<SessionInner<T>>,
    created_at: Instant,
}

impl<T: RemoteTrack> SignalingSession<T> {
    pub fn new(
        id: String,
        peer_connection: Arc<RTCPeerConnection>,
        registry: TrackRegistry<T>,
        keyframe_interval: Duration,
    ) -> Self {
        Self {
            id,
            peer_connection,
            registry,
            keyframe_interval,
            inner: Mutex::new(SessionInner {
                state: SessionState::New,
                pending: None,
                bound: None,
                keyframes: None,
            }),
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn bound_track(&self) -> Option<Arc<T>> {
        self.inner.lock().bound.clone()
    }

    pub fn requesting_keyframes(&self) -> bool {
        self.inner
            .lock()
            .keyframes
            .as_ref()
            .is_some_and(|k| !k.is_finished())
    }

    fn transition(&self, inner: &mut SessionInner<T>, event: SessionEvent) -> bool {
        match inner.state.next(event) {
            Some(next) => {
                debug!("Session {} state change: {:?} -> {:?}", self.id, inner.state, next);
                inner.state = next;
                true
            }
            None => {
                debug!("Session {} ignoring {:?} in state {:?}", self.id, event, inner.state);
                false
            }
        }
    }

    /// Record that the remote offer is being applied
    pub fn offer_received(&self) -> bool {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, SessionEvent::OfferReceived)
    }

    /// Inbound track from the transport. Non-video tracks are ignored.
    pub fn add_track(&self, track: Arc<T>) {
        if !track.is_video() {
            debug!("Session {} ignoring non-video track ssrc={}", self.id, track.ssrc());
            return;
        }

        let mut inner = self.inner.lock();
        let state = inner.state;
        match state {
            SessionState::Connected => self.bind(&mut inner, track),
            SessionState::New | SessionState::Negotiating => {
                debug!("Session {} holding track ssrc={} until connected", self.id, track.ssrc());
                inner.pending = Some(track);
            }
            state => debug!("Session {} dropping track in state {:?}", self.id, state),
        }
    }

    /// ICE reached connected or completed
    pub fn connected(&self) {
        let mut inner = self.inner.lock();
        if !self.transition(&mut inner, SessionEvent::TransportConnected) {
            return;
        }
        info!("Session {} connected", self.id);

        let pending = inner.pending.take();
        if let Some(track) = pending {
            self.bind(&mut inner, track);
        }
    }

    fn bind(&self, inner: &mut SessionInner<T>, track: Arc<T>) {
        if let Some(mut keyframes) = inner.keyframes.take() {
            keyframes.stop();
        }
        if let Some(previous) = inner.bound.take() {
            self.registry.unregister(&self.id, &previous);
        }

        let ssrc = track.ssrc();
        self.registry.register(&self.id, track.clone());
        inner.bound = Some(track);

        let pc = self.peer_connection.clone();
        inner.keyframes = Some(KeyframeRequester::spawn(
            self.id.clone(),
            self.keyframe_interval,
            move || {
                let pc = pc.clone();
                async move {
                    PeerConnectionManager::request_keyframe(&pc, ssrc)
                        .await
                        .map_err(|e| e.to_string())
                }
            },
        ));

        info!("Session {} bound video track ssrc={}", self.id, ssrc);
    }

    /// Transport lost: release the peer connection
    pub async fn disconnected(&self) -> Result<(), WebRTCError> {
        let changed = {
            let mut inner = self.inner.lock();
            self.transition(&mut inner, SessionEvent::TransportDisconnected)
        };
        if !changed {
            return Ok(());
        }

        info!("Session {} disconnected, releasing transport", self.id);
        PeerConnectionManager::close(&self.peer_connection).await
    }

    /// Stop keyframe requests, unregister the track and close the transport.
    /// Calling it again is a no-op.
    pub async fn close(&self) -> Result<(), WebRTCError> {
        let bound = {
            let mut inner = self.inner.lock();
            if !self.transition(&mut inner, SessionEvent::Close) {
                return Ok(());
            }
            if let Some(mut keyframes) = inner.keyframes.take() {
                keyframes.stop();
            }
            inner.pending = None;
            inner.bound.take()
        };

        if let Some(track) = bound {
            self.registry.unregister(&self.id, &track);
        }

        PeerConnectionManager::close(&self.peer_connection).await?;
        info!("Session {} closed after {:?}", self.id, self.age());
        Ok(())
    }
}

/// Weak handle given to callbacks owned by the peer connection
pub struct SessionHandle<T: RemoteTrack = InboundTrack> {
    id: String,
    session: Weak<SignalingSession<T>>,
}

impl<T: RemoteTrack> SessionHandle<T> {
    pub fn new(session: &Arc<SignalingSession<T>>) -> Self {
        Self {
            id: session.id.clone(),
            session: Arc::downgrade(session),
        }
    }
}

#[async_trait]
impl<T: RemoteTrack> SessionControl for SessionHandle<T> {
    fn id(&self) -> &str {
        &self.id
    }

    async fn close(&self) -> Result<(), WebRTCError> {
        match self.session.upgrade() {
            Some(session) => session.close().await,
            None => Ok(()),
        }
    }
}

type SessionTable = Arc<RwLock<HashMap<String, Arc<SignalingSession>>>>;

/// Session manager keyed by process id
pub struct SessionManager {
    /// Active sessions
    sessions: SessionTable,
    /// Peer connection manager
    pc_manager: PeerConnectionManager,
    /// Tracks shared with the control path
    registry: TrackRegistry<InboundTrack>,
    /// Recording policy handed to control channels
    recording: RecordingConfig,
}

impl SessionManager {
    pub fn new(webrtc: WebRTCConfig, recording: RecordingConfig, registry: TrackRegistry<InboundTrack>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            pc_manager: PeerConnectionManager::new(webrtc),
            registry,
            recording,
        }
    }

    /// Negotiate a new session and return the complete local answer
    pub async fn negotiate(&self, request: NegotiationRequest) -> Result<RTCSessionDescription, WebRTCError> {
        request.validate()?;
        let NegotiationRequest { process_id, offer } = request;

        if let Some(previous) = self.sessions.write().await.remove(&process_id) {
            info!("Replacing existing session {}", process_id);
            if let Err(e) = previous.close().await {
                warn!("Failed to close replaced session {}: {}", process_id, e);
            }
        }

        let config = self.pc_manager.config();
        let peer_connection = self.pc_manager.create_peer_connection().await?;
        let session = Arc::new(SignalingSession::new(
            process_id.clone(),
            peer_connection.clone(),
            self.registry.clone(),
            config.keyframe_interval(),
        ));
        session.offer_received();

        self.setup_session_callbacks(&session);
        self.sessions.write().await.insert(process_id.clone(), session.clone());
        info!("Created session {}", process_id);

        match PeerConnectionManager::answer_offer(&peer_connection, offer, config.gather_timeout()).await {
            Ok(answer) => Ok(answer),
            Err(e) => {
                warn!("Negotiation for {} failed: {}", process_id, e);
                teardown(&self.sessions, &session).await;
                Err(e)
            }
        }
    }

    /// Set up session callbacks
    fn setup_session_callbacks(&self, session: &Arc<SignalingSession>) {
        let pc = session.peer_connection().clone();

        // ICE drives binding and the disconnect path
        let weak = Arc::downgrade(session);
        let sessions = self.sessions.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let weak = weak.clone();
            let sessions = sessions.clone();
            Box::pin(async move {
                let Some(session) = weak.upgrade() else {
                    return;
                };
                info!("Session {} ICE state: {}", session.id(), state);

                match state {
                    RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => session.connected(),
                    RTCIceConnectionState::Disconnected => {
                        // Closing from inside a transport callback can stall the transport
                        tokio::spawn(async move {
                            if let Err(e) = session.disconnected().await {
                                warn!("Session {} release failed: {}", session.id(), e);
                            }
                        });
                    }
                    RTCIceConnectionState::Failed | RTCIceConnectionState::Closed => {
                        tokio::spawn(async move { teardown(&sessions, &session).await });
                    }
                    _ => {}
                }
            })
        }));

        let weak = Arc::downgrade(session);
        let sessions = self.sessions.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let weak = weak.clone();
            let sessions = sessions.clone();
            Box::pin(async move {
                let Some(session) = weak.upgrade() else {
                    return;
                };
                debug!("Session {} connection state: {}", session.id(), state);

                if state == RTCPeerConnectionState::Failed || state == RTCPeerConnectionState::Closed {
                    tokio::spawn(async move { teardown(&sessions, &session).await });
                }
            })
        }));

        let weak = Arc::downgrade(session);
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(session) = weak.upgrade() else {
                    return;
                };
                info!(
                    "Session {} track started: {} (payload type {})",
                    session.id(),
                    track.codec().capability.mime_type,
                    track.payload_type()
                );
                session.add_track(Arc::new(InboundTrack::new(track)));
            })
        }));

        let control = Arc::new(ControlChannel::new(
            self.registry.clone(),
            Arc::new(SessionHandle::new(session)),
            self.recording.clone(),
        ));
        pc.on_data_channel(Box::new(move |channel| {
            let control = control.clone();
            Box::pin(async move {
                info!("Data channel opened: {}", channel.label());
                channel.on_message(Box::new(move |message: DataChannelMessage| {
                    let control = control.clone();
                    Box::pin(async move {
                        // Recording and closing must not run on the channel's read loop
                        tokio::spawn(async move {
                            if let Err(e) = control.handle_message(&message.data).await {
                                warn!("Rejected control message: {}", e);
                            }
                        });
                    })
                }));
            })
        }));
    }

    /// Get a session by id
    pub async fn get_session(&self, process_id: &str) -> Option<Arc<SignalingSession>> {
        self.sessions.read().await.get(process_id).cloned()
    }

    /// Close and remove a session
    pub async fn close_session(&self, process_id: &str) -> Result<(), WebRTCError> {
        let session = self.sessions.write().await.remove(process_id)
            .ok_or_else(|| WebRTCError::SessionNotFound(process_id.to_string()))?;
        session.close().await
    }

    /// Close every session, used on shutdown
    pub async fn close_all(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            if let Err(e) = session.close().await {
                warn!("Failed to close session {}: {}", session.id(), e);
            }
        }
    }

    /// Get number of active sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Close `session` and drop it from the table unless a newer session took its id
async fn teardown(sessions: &SessionTable, session: &Arc<SignalingSession>) {
    if let Err(e) = session.close().await {
        warn!("Session {} close failed: {}", session.id(), e);
    }

    let mut table = sessions.write().await;
    if table.get(session.id()).is_some_and(|current| Arc::ptr_eq(current, session)) {
        table.remove(session.id());
        info!("Removed session {}", session.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::api::APIBuilder;
    use webrtc::api::media_engine::MediaEngine;
    use webrtc::peer_connection::configuration::RTCConfiguration;
    use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
    use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
    use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
    use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

    struct FakeTrack {
        ssrc: u32,
        video: bool,
    }

    impl RemoteTrack for FakeTrack {
        fn ssrc(&self) -> u32 {
            self.ssrc
        }

        fn is_video(&self) -> bool {
            self.video
        }
    }

    fn offline_config() -> WebRTCConfig {
        WebRTCConfig {
            ice_servers: vec![],
            ..WebRTCConfig::default()
        }
    }

    async fn fake_session(registry: TrackRegistry<FakeTrack>) -> SignalingSession<FakeTrack> {
        let pc = PeerConnectionManager::new(offline_config())
            .create_peer_connection()
            .await
            .unwrap();
        SignalingSession::new("abc".to_string(), pc, registry, Duration::from_secs(3))
    }

    fn video(ssrc: u32) -> Arc<FakeTrack> {
        Arc::new(FakeTrack { ssrc, video: true })
    }

    #[test]
    fn test_state_transitions() {
        use SessionEvent::*;
        assert_eq!(SessionState::New.next(OfferReceived), Some(SessionState::Negotiating));
        assert_eq!(SessionState::Negotiating.next(TransportConnected), Some(SessionState::Connected));
        assert_eq!(SessionState::Connected.next(TransportDisconnected), Some(SessionState::Disconnected));
        assert_eq!(SessionState::Disconnected.next(Close), Some(SessionState::Closed));
        assert_eq!(SessionState::Negotiating.next(Close), Some(SessionState::Closed));
    }

    #[test]
    fn test_invalid_events_are_ignored() {
        use SessionEvent::*;
        assert_eq!(SessionState::New.next(TransportConnected), None);
        assert_eq!(SessionState::Connected.next(TransportConnected), None);
        assert_eq!(SessionState::Connected.next(OfferReceived), None);
        assert_eq!(SessionState::Negotiating.next(TransportDisconnected), None);
        assert_eq!(SessionState::Closed.next(Close), None);
        assert_eq!(SessionState::Closed.next(TransportConnected), None);
    }

    #[tokio::test]
    async fn test_track_before_connect_binds_on_connect() {
        let registry = TrackRegistry::new();
        let session = fake_session(registry.clone()).await;
        session.offer_received();

        session.add_track(video(42));
        assert!(registry.lookup("abc").is_none());

        session.connected();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(registry.lookup("abc").map(|t| t.ssrc), Some(42));
        assert!(session.bound_track().is_some());

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_track_after_connect_binds_immediately() {
        let registry = TrackRegistry::new();
        let session = fake_session(registry.clone()).await;
        session.offer_received();
        session.connected();

        session.add_track(video(7));
        assert_eq!(registry.lookup("abc").map(|t| t.ssrc), Some(7));
        assert!(session.requesting_keyframes());

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_non_video_track_is_ignored() {
        let registry = TrackRegistry::new();
        let session = fake_session(registry.clone()).await;
        session.offer_received();
        session.connected();

        session.add_track(Arc::new(FakeTrack { ssrc: 9, video: false }));
        assert!(registry.lookup("abc").is_none());
        assert!(session.bound_track().is_none());

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_unregisters_and_is_idempotent() {
        let registry = TrackRegistry::new();
        let session = fake_session(registry.clone()).await;
        session.offer_received();
        session.connected();
        session.add_track(video(1));

        session.close().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(registry.lookup("abc").is_none());
        assert!(!session.requesting_keyframes());

        session.close().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_close_leaves_newer_binding() {
        let registry = TrackRegistry::new();
        let session = fake_session(registry.clone()).await;
        session.offer_received();
        session.connected();
        session.add_track(video(1));

        // a replacement session bound the same id
        registry.register("abc", video(2));
        session.close().await.unwrap();
        assert_eq!(registry.lookup("abc").map(|t| t.ssrc), Some(2));
    }

    #[tokio::test]
    async fn test_disconnect_releases_transport() {
        let registry = TrackRegistry::new();
        let session = fake_session(registry.clone()).await;
        session.offer_received();
        session.connected();

        session.disconnected().await.unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
        // a second disconnect is ignored
        session.disconnected().await.unwrap();

        session.close().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
    }

    async fn browser_offer() -> (Arc<RTCPeerConnection>, RTCSessionDescription) {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().unwrap();
        let api = APIBuilder::new().with_media_engine(media_engine).build();
        let pc = Arc::new(api.new_peer_connection(RTCConfiguration::default()).await.unwrap());

        pc.add_transceiver_from_kind(
            RTPCodecType::Video,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Sendonly,
                send_encodings: vec![],
            }),
        )
        .await
        .unwrap();
        pc.create_data_channel("control", None).await.unwrap();

        let offer = pc.create_offer(None).await.unwrap();
        let mut gathered = pc.gathering_complete_promise().await;
        pc.set_local_description(offer).await.unwrap();
        let _ = gathered.recv().await;
        let offer = pc.local_description().await.unwrap();
        (pc, offer)
    }

    #[tokio::test]
    async fn test_negotiate_answers_offer() {
        let manager = SessionManager::new(offline_config(), RecordingConfig::default(), TrackRegistry::new());
        let (browser, offer) = browser_offer().await;

        let answer = manager
            .negotiate(NegotiationRequest {
                process_id: "abc".to_string(),
                offer,
            })
            .await
            .unwrap();

        assert_eq!(answer.sdp_type, RTCSdpType::Answer);
        assert!(answer.sdp.contains("VP8"));
        assert_eq!(manager.session_count().await, 1);
        assert_eq!(manager.get_session("abc").await.map(|s| s.state()), Some(SessionState::Negotiating));

        manager.close_session("abc").await.unwrap();
        assert_eq!(manager.session_count().await, 0);
        browser.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_negotiate_replaces_existing_session() {
        let manager = SessionManager::new(offline_config(), RecordingConfig::default(), TrackRegistry::new());

        let (first_browser, offer) = browser_offer().await;
        manager
            .negotiate(NegotiationRequest { process_id: "abc".to_string(), offer })
            .await
            .unwrap();
        let first = manager.get_session("abc").await.unwrap();

        let (second_browser, offer) = browser_offer().await;
        manager
            .negotiate(NegotiationRequest { process_id: "abc".to_string(), offer })
            .await
            .unwrap();

        assert_eq!(first.state(), SessionState::Closed);
        assert_eq!(manager.session_count().await, 1);

        manager.close_all().await;
        assert_eq!(manager.session_count().await, 0);
        first_browser.close().await.unwrap();
        second_browser.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_negotiate_rejects_answer_without_session() {
        let manager = SessionManager::new(offline_config(), RecordingConfig::default(), TrackRegistry::new());
        let mut offer = RTCSessionDescription::default();
        offer.sdp_type = RTCSdpType::Answer;
        offer.sdp = "v=0\r\n".to_string();

        let err = manager
            .negotiate(NegotiationRequest { process_id: "abc".to_string(), offer })
            .await
            .unwrap_err();

        assert!(matches!(err, WebRTCError::InvalidRequest(_)));
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_close_unknown_session() {
        let manager = SessionManager::new(offline_config(), RecordingConfig::default(), TrackRegistry::new());
        assert!(matches!(
            manager.close_session("nope").await,
            Err(WebRTCError::SessionNotFound(_))
        ));
    }
}
