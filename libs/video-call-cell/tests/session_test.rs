use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use video_call_cell::services::media::LocalMedia;
use video_call_cell::services::peer::PeerEvent;
use video_call_cell::{
    CallRole, CallSession, CallSessionConfig, ChannelEvent, IceCandidateDescriptor, InboundSignal,
    MediaConstraints, MediaKind, MediaProvider, NotificationLevel, NotificationSink,
    OutboundSignal, PeerConnection, PeerConnectionProvider, PrescriptionArtifact,
    RemoteMediaTrack, RenderSink, SessionState, SignalDescriptor, SignalingChannel,
    VideoCallError,
};

// ==============================================================================
// IN-MEMORY FAKES
// ==============================================================================

#[derive(Default)]
struct FakeChannel {
    sent: Mutex<Vec<OutboundSignal>>,
    fail_join: AtomicBool,
    room_tx: Mutex<Option<mpsc::UnboundedSender<ChannelEvent>>>,
}

impl FakeChannel {
    fn sent_events(&self) -> Vec<&'static str> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.event_name())
            .collect()
    }

    fn inject(&self, signal: InboundSignal) {
        let tx = self.room_tx.lock().unwrap();
        tx.as_ref()
            .expect("no room subscription")
            .send(ChannelEvent::Signal(signal))
            .unwrap();
    }
}

#[async_trait]
impl SignalingChannel for FakeChannel {
    async fn connect(&self) -> Result<(), VideoCallError> {
        Ok(())
    }

    async fn send(&self, signal: OutboundSignal) -> Result<(), VideoCallError> {
        if self.fail_join.load(Ordering::SeqCst)
            && matches!(signal, OutboundSignal::JoinRoom { .. })
        {
            return Err(VideoCallError::SignalingConnection {
                message: "relay unavailable".to_string(),
            });
        }
        self.sent.lock().unwrap().push(signal);
        Ok(())
    }

    fn subscribe(&self, _room: &str) -> mpsc::UnboundedReceiver<ChannelEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.room_tx.lock().unwrap() = Some(tx);
        rx
    }
}

struct FakeLocalMedia {
    stopped: AtomicBool,
}

impl LocalMedia for FakeLocalMedia {
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn has_video(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[derive(Default)]
struct FakeMediaProvider {
    fail: AtomicBool,
    last: Mutex<Option<Arc<FakeLocalMedia>>>,
}

impl FakeMediaProvider {
    fn last_stopped(&self) -> bool {
        self.last
            .lock()
            .unwrap()
            .as_ref()
            .map(|m| m.stopped.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

#[async_trait]
impl MediaProvider for FakeMediaProvider {
    async fn acquire_local(
        &self,
        _constraints: &MediaConstraints,
    ) -> Result<Arc<dyn LocalMedia>, VideoCallError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(VideoCallError::MediaAcquisition {
                message: "camera in use".to_string(),
            });
        }
        let media = Arc::new(FakeLocalMedia {
            stopped: AtomicBool::new(false),
        });
        *self.last.lock().unwrap() = Some(Arc::clone(&media));
        Ok(media)
    }
}

#[derive(Default)]
struct FakePeer {
    ops: Mutex<Vec<String>>,
}

impl FakePeer {
    fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    fn record(&self, op: impl Into<String>) {
        self.ops.lock().unwrap().push(op.into());
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_local_media(&self, _media: Arc<dyn LocalMedia>) -> Result<(), VideoCallError> {
        self.record("add_local_media");
        Ok(())
    }

    async fn create_offer(&self) -> Result<SignalDescriptor, VideoCallError> {
        self.record("create_offer");
        Ok(SignalDescriptor::offer("v=0 fake offer"))
    }

    async fn create_answer(&self) -> Result<SignalDescriptor, VideoCallError> {
        self.record("create_answer");
        Ok(SignalDescriptor::answer("v=0 fake answer"))
    }

    async fn set_remote_description(
        &self,
        descriptor: SignalDescriptor,
    ) -> Result<(), VideoCallError> {
        self.record(format!("set_remote:{:?}", descriptor.sdp_type));
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        candidate: IceCandidateDescriptor,
    ) -> Result<(), VideoCallError> {
        self.record(format!("candidate:{}", candidate.candidate));
        Ok(())
    }

    async fn close(&self) -> Result<(), VideoCallError> {
        self.record("close");
        Ok(())
    }
}

#[derive(Default)]
struct FakePeerProvider {
    created: Mutex<Option<Arc<FakePeer>>>,
}

impl FakePeerProvider {
    fn peer(&self) -> Option<Arc<FakePeer>> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerConnectionProvider for FakePeerProvider {
    async fn create(
        &self,
        _ice_servers: &[String],
        _events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, VideoCallError> {
        let peer = Arc::new(FakePeer::default());
        *self.created.lock().unwrap() = Some(Arc::clone(&peer));
        Ok(peer)
    }
}

#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<(NotificationLevel, String)>>,
}

impl RecordingNotifier {
    fn texts(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, message: &str, level: NotificationLevel) {
        self.messages
            .lock()
            .unwrap()
            .push((level, message.to_string()));
    }
}

#[derive(Default)]
struct RecordingRender {
    waiting: Mutex<Vec<String>>,
    hidden: AtomicBool,
    prescriptions: Mutex<Vec<PrescriptionArtifact>>,
}

impl RenderSink for RecordingRender {
    fn attach_local(&self, _media: &Arc<dyn LocalMedia>) {}
    fn attach_remote(&self, _track: &Arc<dyn RemoteMediaTrack>) {}

    fn show_waiting(&self, message: &str) {
        self.waiting.lock().unwrap().push(message.to_string());
    }

    fn hide_waiting(&self) {
        self.hidden.store(true, Ordering::SeqCst);
    }

    fn present_prescription(&self, artifact: &PrescriptionArtifact) {
        self.prescriptions.lock().unwrap().push(artifact.clone());
    }
}

struct FakeRemoteTrack {
    kind: MediaKind,
}

impl RemoteMediaTrack for FakeRemoteTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn id(&self) -> String {
        "remote-1".to_string()
    }
}

// ==============================================================================
// HARNESS
// ==============================================================================

struct Harness {
    session: CallSession,
    channel: Arc<FakeChannel>,
    media: Arc<FakeMediaProvider>,
    peers: Arc<FakePeerProvider>,
    notifier: Arc<RecordingNotifier>,
    render: Arc<RecordingRender>,
}

fn session_config(role: CallRole) -> CallSessionConfig {
    CallSessionConfig {
        room_name: "appointment-room-42".to_string(),
        appointment_id: Uuid::new_v4(),
        role,
        constraints: MediaConstraints::default(),
        ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
    }
}

async fn start_session(role: CallRole) -> Harness {
    let channel = Arc::new(FakeChannel::default());
    let media = Arc::new(FakeMediaProvider::default());
    let peers = Arc::new(FakePeerProvider::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let render = Arc::new(RecordingRender::default());

    let session = CallSession::start(
        session_config(role),
        Arc::clone(&channel) as Arc<dyn SignalingChannel>,
        Arc::clone(&media) as Arc<dyn MediaProvider>,
        Arc::clone(&peers) as Arc<dyn PeerConnectionProvider>,
        Arc::clone(&notifier) as Arc<dyn NotificationSink>,
        Arc::clone(&render) as Arc<dyn RenderSink>,
    )
    .await
    .expect("session start");

    Harness {
        session,
        channel,
        media,
        peers,
        notifier,
        render,
    }
}

fn offer() -> SignalDescriptor {
    SignalDescriptor::offer("v=0 remote offer")
}

fn answer() -> SignalDescriptor {
    SignalDescriptor::answer("v=0 remote answer")
}

fn candidate(n: u16) -> IceCandidateDescriptor {
    IceCandidateDescriptor {
        candidate: format!("candidate:{}", n),
        sdp_mline_index: 0,
        sdp_mid: "0".to_string(),
    }
}

async fn signal(h: &mut Harness, signal: InboundSignal) {
    h.session
        .process_channel_event(ChannelEvent::Signal(signal))
        .await;
}

async fn remote_video(h: &mut Harness) {
    h.session
        .process_peer_event(PeerEvent::RemoteTrack(Arc::new(FakeRemoteTrack {
            kind: MediaKind::Video,
        })))
        .await;
}

/// Drives a clinician session through OTP verification and negotiation up to
/// an active call.
async fn active_clinician() -> Harness {
    let mut h = start_session(CallRole::Clinician).await;
    signal(
        &mut h,
        InboundSignal::UserJoined {
            role: CallRole::Patient,
        },
    )
    .await;
    signal(&mut h, InboundSignal::OtpVerified {}).await;
    signal(
        &mut h,
        InboundSignal::ReceiveAnswer {
            room: "appointment-room-42".to_string(),
            answer: answer(),
        },
    )
    .await;
    remote_video(&mut h).await;
    h
}

// ==============================================================================
// CLINICIAN LIFECYCLE
// ==============================================================================

#[tokio::test]
async fn test_start_joins_room_and_waits_for_peer() {
    let h = start_session(CallRole::Clinician).await;
    assert_eq!(h.session.state(), SessionState::WaitingForPeer);
    assert_eq!(h.channel.sent_events(), vec!["join_room"]);
}

#[tokio::test]
async fn test_start_fails_when_join_cannot_be_sent() {
    let channel = Arc::new(FakeChannel::default());
    channel.fail_join.store(true, Ordering::SeqCst);

    let result = CallSession::start(
        session_config(CallRole::Patient),
        Arc::clone(&channel) as Arc<dyn SignalingChannel>,
        Arc::new(FakeMediaProvider::default()),
        Arc::new(FakePeerProvider::default()),
        Arc::new(RecordingNotifier::default()),
        Arc::new(RecordingRender::default()),
    )
    .await;

    assert!(matches!(
        result,
        Err(VideoCallError::SignalingConnection { .. })
    ));
}

#[tokio::test]
async fn test_clinician_offers_only_after_otp() {
    let mut h = start_session(CallRole::Clinician).await;

    signal(
        &mut h,
        InboundSignal::UserJoined {
            role: CallRole::Patient,
        },
    )
    .await;
    assert_eq!(h.session.state(), SessionState::WaitingForOtp);
    // No media, no peer, no offer before the OTP gate clears.
    assert!(h.peers.peer().is_none());
    assert!(!h.channel.sent_events().contains(&"send_offer"));

    signal(&mut h, InboundSignal::OtpVerified {}).await;
    assert_eq!(h.session.state(), SessionState::Negotiating);
    assert_eq!(h.channel.sent_events(), vec!["join_room", "send_offer"]);
    match &h.channel.sent.lock().unwrap()[1] {
        OutboundSignal::SendOffer { room, offer } => {
            assert_eq!(room, "appointment-room-42");
            assert_eq!(offer.sdp_type, video_call_cell::SdpType::Offer);
            assert!(!offer.sdp.is_empty());
        }
        other => panic!("expected SendOffer, got {:?}", other),
    }

    let peer = h.peers.peer().expect("peer created");
    assert_eq!(peer.ops(), vec!["add_local_media", "create_offer"]);
    assert!(h.notifier.texts().contains(&"Call started!".to_string()));
}

#[tokio::test]
async fn test_clinician_call_goes_active_on_answer_and_remote_track() {
    let h = active_clinician().await;
    assert_eq!(h.session.state(), SessionState::Active);
    assert!(h.session.elapsed_display().is_some());
    assert!(h.session.metrics().is_some());

    let peer = h.peers.peer().unwrap();
    assert!(peer.ops().contains(&"set_remote:Answer".to_string()));
}

#[tokio::test]
async fn test_local_candidates_trickle_while_negotiating() {
    let mut h = start_session(CallRole::Clinician).await;
    signal(
        &mut h,
        InboundSignal::UserJoined {
            role: CallRole::Patient,
        },
    )
    .await;
    signal(&mut h, InboundSignal::OtpVerified {}).await;

    h.session
        .process_peer_event(PeerEvent::LocalCandidate(candidate(9)))
        .await;
    assert_eq!(
        h.channel.sent_events(),
        vec!["join_room", "send_offer", "send_ice_candidate"]
    );
}

// ==============================================================================
// PATIENT LIFECYCLE
// ==============================================================================

#[tokio::test]
async fn test_patient_buffers_candidates_until_offer_arrives() {
    let mut h = start_session(CallRole::Patient).await;

    signal(
        &mut h,
        InboundSignal::WaitingForDoctor {
            message: "Waiting for the doctor to join...".to_string(),
        },
    )
    .await;
    assert_eq!(
        h.render.waiting.lock().unwrap().as_slice(),
        ["Waiting for the doctor to join..."]
    );

    // Candidates before the offer must not touch a peer connection.
    signal(
        &mut h,
        InboundSignal::ReceiveIceCandidate {
            room: "appointment-room-42".to_string(),
            candidate: candidate(1),
        },
    )
    .await;
    signal(
        &mut h,
        InboundSignal::ReceiveIceCandidate {
            room: "appointment-room-42".to_string(),
            candidate: candidate(2),
        },
    )
    .await;
    assert!(h.peers.peer().is_none());

    signal(
        &mut h,
        InboundSignal::ReceiveOffer {
            room: "appointment-room-42".to_string(),
            offer: offer(),
        },
    )
    .await;
    assert_eq!(h.session.state(), SessionState::Negotiating);
    assert!(h.render.hidden.load(Ordering::SeqCst));

    // Remote description first, then the buffered candidates in order.
    let peer = h.peers.peer().expect("peer created");
    assert_eq!(
        peer.ops(),
        vec![
            "set_remote:Offer",
            "create_answer",
            "candidate:candidate:1",
            "candidate:candidate:2",
        ]
    );
    assert_eq!(h.channel.sent_events(), vec!["join_room", "send_answer"]);

    remote_video(&mut h).await;
    h.session
        .process_peer_event(PeerEvent::RemoteTrack(Arc::new(FakeRemoteTrack {
            kind: MediaKind::Audio,
        })))
        .await;
    assert_eq!(h.session.state(), SessionState::Active);
}

#[tokio::test]
async fn test_patient_sees_prescription_without_state_change() {
    let mut h = start_session(CallRole::Patient).await;
    signal(
        &mut h,
        InboundSignal::ReceiveOffer {
            room: "appointment-room-42".to_string(),
            offer: offer(),
        },
    )
    .await;
    remote_video(&mut h).await;
    assert_eq!(h.session.state(), SessionState::Active);

    signal(
        &mut h,
        InboundSignal::NewPrescription {
            filename: "rx.pdf".to_string(),
            download_url: "/files/rx.pdf".to_string(),
        },
    )
    .await;

    assert_eq!(h.session.state(), SessionState::Active);
    let prescriptions = h.render.prescriptions.lock().unwrap();
    assert_eq!(prescriptions.len(), 1);
    assert_eq!(prescriptions[0].filename, "rx.pdf");
    assert!(h
        .notifier
        .texts()
        .contains(&"New prescription available!".to_string()));
}

// ==============================================================================
// ENDING AND FAILURE
// ==============================================================================

#[tokio::test]
async fn test_end_call_is_idempotent_and_releases_resources() {
    let mut h = active_clinician().await;

    h.session.end_call().await;
    assert_eq!(h.session.state(), SessionState::Ended);
    assert!(h.media.last_stopped());
    assert!(h.peers.peer().unwrap().ops().contains(&"close".to_string()));
    assert!(h.session.elapsed_display().is_none());

    h.session.end_call().await;
    let end_calls = h
        .channel
        .sent_events()
        .iter()
        .filter(|e| **e == "end_call")
        .count();
    assert_eq!(end_calls, 1);
}

#[tokio::test]
async fn test_peer_ending_completes_the_session() {
    let mut h = active_clinician().await;
    signal(&mut h, InboundSignal::CallEnded {}).await;

    assert_eq!(h.session.state(), SessionState::Ended);
    assert!(h
        .notifier
        .texts()
        .contains(&"Consultation completed".to_string()));

    // A late local hang-up after the peer ended must not re-notify.
    h.session.end_call().await;
    let end_calls = h
        .channel
        .sent_events()
        .iter()
        .filter(|e| **e == "end_call")
        .count();
    assert_eq!(end_calls, 1);
}

#[tokio::test]
async fn test_media_failure_fails_the_session() {
    let mut h = start_session(CallRole::Clinician).await;
    h.media.fail.store(true, Ordering::SeqCst);

    signal(
        &mut h,
        InboundSignal::UserJoined {
            role: CallRole::Patient,
        },
    )
    .await;
    signal(&mut h, InboundSignal::OtpVerified {}).await;

    assert_eq!(h.session.state(), SessionState::Failed);
    assert!(h
        .notifier
        .texts()
        .contains(&"Failed to access camera/microphone".to_string()));
    // Failure tears down locally without notifying the relay.
    assert!(!h.channel.sent_events().contains(&"end_call"));
}

#[tokio::test]
async fn test_relay_disconnect_fails_the_session() {
    let mut h = active_clinician().await;
    h.session
        .process_channel_event(ChannelEvent::Disconnected)
        .await;

    assert_eq!(h.session.state(), SessionState::Failed);
    assert!(h.media.last_stopped());
    assert!(h
        .notifier
        .texts()
        .contains(&"Lost connection to the consultation service".to_string()));
}

#[tokio::test]
async fn test_peer_connection_failure_fails_the_session() {
    let mut h = active_clinician().await;
    h.session
        .process_peer_event(PeerEvent::StateChanged(
            video_call_cell::PeerState::Failed,
        ))
        .await;

    assert_eq!(h.session.state(), SessionState::Failed);
    assert!(h.notifier.texts().contains(&"Connection lost".to_string()));
}

#[tokio::test]
async fn test_run_consumes_relay_events_until_terminal() {
    let mut h = start_session(CallRole::Patient).await;
    h.channel.inject(InboundSignal::WaitingForDoctor {
        message: "Waiting for the doctor to join...".to_string(),
    });
    h.channel.inject(InboundSignal::CallEnded {});

    h.session.run().await;

    assert_eq!(h.session.state(), SessionState::Ended);
    assert!(h
        .notifier
        .texts()
        .contains(&"Consultation completed".to_string()));
}
