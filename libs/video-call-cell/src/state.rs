// libs/video-call-cell/src/state.rs
//! Pure session state machine for a video consultation.
//!
//! The machine holds the session state and negotiation bookkeeping and maps
//! each input to the list of effects the orchestrator must perform. It does
//! no I/O itself, which keeps every transition testable without a relay,
//! media devices, or a peer connection.

use std::collections::VecDeque;

use crate::models::{
    CallRole, IceCandidateDescriptor, NotificationLevel, PrescriptionArtifact, SessionState,
    SignalDescriptor, VideoCallError,
};

/// Everything that can happen to a session: relay messages, peer-connection
/// callbacks, settled local operations, and user intent.
#[derive(Debug)]
pub enum SessionInput {
    /// The session was constructed and the channel is connected.
    Started,
    /// `join_room` was delivered to the relay.
    JoinSent,
    /// The other participant announced presence (`user_joined`).
    PeerJoined { role: CallRole },
    /// Relay notice shown while the clinician is absent (`waiting_for_doctor`).
    WaitingForPeerNotice { message: String },
    /// Relay notice shown while the OTP gate is open (`waiting_for_otp`).
    WaitingForOtpNotice { message: String },
    /// The relay confirmed OTP verification for this room.
    OtpVerified,
    /// Local capture settled successfully.
    LocalMediaReady,
    /// The local offer was set as local description and sent.
    OfferSent,
    /// The local answer was set as local description and sent.
    AnswerSent,
    /// An SDP offer arrived from the peer.
    OfferReceived(SignalDescriptor),
    /// An SDP answer arrived from the peer.
    AnswerReceived(SignalDescriptor),
    /// A remote ICE candidate arrived.
    CandidateReceived(IceCandidateDescriptor),
    /// The local peer connection discovered a candidate.
    LocalCandidate(IceCandidateDescriptor),
    /// The first remote track was attached to the render sink.
    RemoteTrackAttached,
    /// The underlying transport reported an established connection.
    PeerConnected,
    /// A prescription file became available.
    PrescriptionReceived(PrescriptionArtifact),
    /// The local user ended the call.
    EndRequested,
    /// The peer or the relay ended the call (`call_ended`).
    PeerEnded,
    /// Teardown effects finished.
    CleanupComplete,
    /// An unrecoverable error occurred somewhere in the effect layer.
    Failure(VideoCallError),
}

/// Effects the orchestrator performs after a transition. Order matters:
/// actions are executed in the order they are returned.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    SendJoin,
    ShowWaiting { message: String },
    HideWaiting,
    AcquireMedia,
    CreateOffer,
    /// Set the remote offer, then create, set, and send the answer.
    AnswerOffer(SignalDescriptor),
    ApplyRemoteAnswer(SignalDescriptor),
    ApplyCandidate(IceCandidateDescriptor),
    SendCandidate(IceCandidateDescriptor),
    StartTimer,
    StopTimer,
    Notify {
        level: NotificationLevel,
        message: String,
    },
    OfferPrescription(PrescriptionArtifact),
    /// Stop local media, close the peer connection, drop buffered candidates.
    ReleaseResources,
    SendEndCall,
}

/// The session state machine. One instance per appointment and role.
pub struct SessionMachine {
    role: CallRole,
    state: SessionState,
    local_description_set: bool,
    remote_description_set: bool,
    remote_track_attached: bool,
    pending_candidates: VecDeque<IceCandidateDescriptor>,
}

impl SessionMachine {
    pub fn new(role: CallRole) -> Self {
        Self {
            role,
            state: SessionState::Idle,
            local_description_set: false,
            remote_description_set: false,
            remote_track_attached: false,
            pending_candidates: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    /// Number of remote candidates held back until the remote description
    /// is set.
    pub fn buffered_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Apply one input and return the effects to perform, in order.
    pub fn apply(&mut self, input: SessionInput) -> Vec<SessionAction> {
        match input {
            SessionInput::Started => self.on_started(),
            SessionInput::JoinSent => self.on_join_sent(),
            SessionInput::PeerJoined { role } => self.on_peer_joined(role),
            SessionInput::WaitingForPeerNotice { message } => self.on_waiting_for_peer(message),
            SessionInput::WaitingForOtpNotice { message } => self.on_waiting_for_otp(message),
            SessionInput::OtpVerified => self.on_otp_verified(),
            SessionInput::LocalMediaReady => self.on_local_media_ready(),
            SessionInput::OfferSent => self.on_offer_sent(),
            SessionInput::AnswerSent => self.on_answer_sent(),
            SessionInput::OfferReceived(offer) => self.on_offer_received(offer),
            SessionInput::AnswerReceived(answer) => self.on_answer_received(answer),
            SessionInput::CandidateReceived(candidate) => self.on_candidate_received(candidate),
            SessionInput::LocalCandidate(candidate) => self.on_local_candidate(candidate),
            SessionInput::RemoteTrackAttached => self.on_remote_track(),
            SessionInput::PeerConnected => self.on_peer_connected(),
            SessionInput::PrescriptionReceived(artifact) => self.on_prescription(artifact),
            SessionInput::EndRequested => self.end("Call ended"),
            SessionInput::PeerEnded => self.end("Consultation completed"),
            SessionInput::CleanupComplete => self.on_cleanup_complete(),
            SessionInput::Failure(error) => self.fail(&error),
        }
    }

    fn on_started(&mut self) -> Vec<SessionAction> {
        if self.state != SessionState::Idle {
            return Vec::new();
        }
        self.state = SessionState::Joining;
        vec![SessionAction::SendJoin]
    }

    fn on_join_sent(&mut self) -> Vec<SessionAction> {
        if self.state != SessionState::Joining {
            return Vec::new();
        }
        self.state = SessionState::WaitingForPeer;
        Vec::new()
    }

    fn on_peer_joined(&mut self, role: CallRole) -> Vec<SessionAction> {
        if self.state != SessionState::WaitingForPeer {
            return Vec::new();
        }
        match (self.role, role) {
            (CallRole::Clinician, CallRole::Patient) => {
                self.state = SessionState::WaitingForOtp;
                vec![SessionAction::Notify {
                    level: NotificationLevel::Info,
                    message: "Patient has joined the consultation".to_string(),
                }]
            }
            (CallRole::Patient, CallRole::Clinician) => vec![SessionAction::Notify {
                level: NotificationLevel::Info,
                message: "Doctor has joined the consultation".to_string(),
            }],
            _ => Vec::new(),
        }
    }

    fn on_waiting_for_peer(&mut self, message: String) -> Vec<SessionAction> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        vec![SessionAction::ShowWaiting { message }]
    }

    fn on_waiting_for_otp(&mut self, message: String) -> Vec<SessionAction> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        // A clinician joining after the patient never sees `user_joined`;
        // the OTP notice is its signal that the peer is present.
        if self.role == CallRole::Clinician && self.state == SessionState::WaitingForPeer {
            self.state = SessionState::WaitingForOtp;
        }
        vec![SessionAction::ShowWaiting { message }]
    }

    fn on_otp_verified(&mut self) -> Vec<SessionAction> {
        match self.role {
            CallRole::Clinician => {
                if self.state != SessionState::WaitingForOtp {
                    return Vec::new();
                }
                self.state = SessionState::Negotiating;
                vec![SessionAction::HideWaiting, SessionAction::AcquireMedia]
            }
            CallRole::Patient => {
                if self.state.is_terminal() {
                    return Vec::new();
                }
                vec![
                    SessionAction::HideWaiting,
                    SessionAction::Notify {
                        level: NotificationLevel::Success,
                        message: "Doctor has started the consultation!".to_string(),
                    },
                ]
            }
        }
    }

    fn on_local_media_ready(&mut self) -> Vec<SessionAction> {
        if self.role != CallRole::Clinician
            || self.state != SessionState::Negotiating
            || self.local_description_set
        {
            return Vec::new();
        }
        vec![SessionAction::CreateOffer]
    }

    fn on_offer_sent(&mut self) -> Vec<SessionAction> {
        if self.state != SessionState::Negotiating {
            return Vec::new();
        }
        self.local_description_set = true;
        vec![SessionAction::Notify {
            level: NotificationLevel::Success,
            message: "Call started!".to_string(),
        }]
    }

    fn on_answer_sent(&mut self) -> Vec<SessionAction> {
        if self.state != SessionState::Negotiating {
            return Vec::new();
        }
        self.local_description_set = true;
        self.maybe_activate()
    }

    fn on_offer_received(&mut self, offer: SignalDescriptor) -> Vec<SessionAction> {
        if self.role != CallRole::Patient {
            return self.fail(&VideoCallError::Negotiation {
                message: "unexpected offer: only the patient side answers offers".to_string(),
            });
        }
        if !matches!(
            self.state,
            SessionState::Joining | SessionState::WaitingForPeer
        ) {
            return self.fail(&VideoCallError::Negotiation {
                message: format!("offer received in state {}", self.state),
            });
        }
        self.state = SessionState::Negotiating;
        self.remote_description_set = true;
        let mut actions = vec![SessionAction::HideWaiting, SessionAction::AnswerOffer(offer)];
        actions.extend(self.flush_candidates());
        actions
    }

    fn on_answer_received(&mut self, answer: SignalDescriptor) -> Vec<SessionAction> {
        if self.role != CallRole::Clinician
            || self.state != SessionState::Negotiating
            || !self.local_description_set
            || self.remote_description_set
        {
            return self.fail(&VideoCallError::Negotiation {
                message: format!("unexpected answer in state {}", self.state),
            });
        }
        self.remote_description_set = true;
        let mut actions = vec![SessionAction::ApplyRemoteAnswer(answer)];
        actions.extend(self.flush_candidates());
        actions
    }

    fn on_candidate_received(&mut self, candidate: IceCandidateDescriptor) -> Vec<SessionAction> {
        if self.state.is_terminal() || self.state == SessionState::Ending {
            return Vec::new();
        }
        if self.remote_description_set {
            vec![SessionAction::ApplyCandidate(candidate)]
        } else {
            // Buffered in receipt order, flushed right after the remote
            // description is set. Never dropped.
            self.pending_candidates.push_back(candidate);
            Vec::new()
        }
    }

    fn on_local_candidate(&mut self, candidate: IceCandidateDescriptor) -> Vec<SessionAction> {
        // Trickle ICE: forward each locally discovered candidate immediately.
        if !matches!(
            self.state,
            SessionState::Negotiating | SessionState::Active
        ) {
            return Vec::new();
        }
        vec![SessionAction::SendCandidate(candidate)]
    }

    fn on_remote_track(&mut self) -> Vec<SessionAction> {
        self.remote_track_attached = true;
        self.maybe_activate()
    }

    fn on_peer_connected(&mut self) -> Vec<SessionAction> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        vec![SessionAction::Notify {
            level: NotificationLevel::Success,
            message: "Connected successfully!".to_string(),
        }]
    }

    fn on_prescription(&mut self, artifact: PrescriptionArtifact) -> Vec<SessionAction> {
        // Prescription delivery is patient-facing; it never disturbs the
        // call state.
        if self.role != CallRole::Patient || self.state.is_terminal() {
            return Vec::new();
        }
        vec![
            SessionAction::Notify {
                level: NotificationLevel::Info,
                message: "New prescription available!".to_string(),
            },
            SessionAction::OfferPrescription(artifact),
        ]
    }

    fn on_cleanup_complete(&mut self) -> Vec<SessionAction> {
        if self.state != SessionState::Ending {
            return Vec::new();
        }
        self.state = SessionState::Ended;
        Vec::new()
    }

    fn maybe_activate(&mut self) -> Vec<SessionAction> {
        if self.state == SessionState::Negotiating
            && self.local_description_set
            && self.remote_track_attached
        {
            self.state = SessionState::Active;
            return vec![SessionAction::StartTimer];
        }
        Vec::new()
    }

    fn flush_candidates(&mut self) -> Vec<SessionAction> {
        self.pending_candidates
            .drain(..)
            .map(SessionAction::ApplyCandidate)
            .collect()
    }

    fn end(&mut self, notice: &str) -> Vec<SessionAction> {
        // Idempotent: a second end request while Ending or after a terminal
        // state produces no effects and therefore no second `end_call`.
        if self.state == SessionState::Ending || self.state.is_terminal() {
            return Vec::new();
        }
        self.state = SessionState::Ending;
        self.pending_candidates.clear();
        vec![
            SessionAction::ReleaseResources,
            SessionAction::StopTimer,
            SessionAction::SendEndCall,
            SessionAction::Notify {
                level: NotificationLevel::Info,
                message: notice.to_string(),
            },
        ]
    }

    fn fail(&mut self, error: &VideoCallError) -> Vec<SessionAction> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        self.state = SessionState::Failed;
        self.pending_candidates.clear();
        vec![
            SessionAction::ReleaseResources,
            SessionAction::StopTimer,
            SessionAction::Notify {
                level: NotificationLevel::Error,
                message: user_notice(error),
            },
        ]
    }
}

/// User-facing message for a failure, matching the wording of the web client.
fn user_notice(error: &VideoCallError) -> String {
    match error {
        VideoCallError::MediaAcquisition { .. } => {
            "Failed to access camera/microphone".to_string()
        }
        VideoCallError::SignalingConnection { .. } => {
            "Lost connection to the consultation service".to_string()
        }
        VideoCallError::PeerConnectionFailure { .. } => "Connection lost".to_string(),
        VideoCallError::Negotiation { .. } => "Failed to establish the call".to_string(),
        _ => "Video call failed".to_string(),
    }
}
