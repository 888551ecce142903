// libs/video-call-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// VIDEO CALL DOMAIN MODELS
// ==============================================================================

/// Role of the local participant in a consultation call.
///
/// The wire format accepts the legacy `user`/`doctor` spellings emitted by
/// older relay deployments.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CallRole {
    #[serde(rename = "patient", alias = "user")]
    Patient,
    #[serde(rename = "clinician", alias = "doctor")]
    Clinician,
}

impl fmt::Display for CallRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallRole::Patient => write!(f, "patient"),
            CallRole::Clinician => write!(f, "clinician"),
        }
    }
}

/// Lifecycle of one call session. Owned exclusively by the session state
/// machine; everything else only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Joining,
    WaitingForPeer,
    WaitingForOtp,
    Negotiating,
    Active,
    Ending,
    Ended,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Ended | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Joining => "joining",
            SessionState::WaitingForPeer => "waiting_for_peer",
            SessionState::WaitingForOtp => "waiting_for_otp",
            SessionState::Negotiating => "negotiating",
            SessionState::Active => "active",
            SessionState::Ending => "ending",
            SessionState::Ended => "ended",
            SessionState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SdpType {
    #[serde(rename = "offer")]
    Offer,
    #[serde(rename = "answer")]
    Answer,
}

/// An immutable SDP negotiation message. Exactly one offer and at most one
/// answer exist per successful session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalDescriptor {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SignalDescriptor {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A trickled ICE candidate. Candidates are additive and connection-scoped;
/// each must be applied only after the remote description is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IceCandidateDescriptor {
    pub candidate: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: u16,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
}

/// A prescription file made available by the clinician mid- or post-call.
/// The client only renders a download link; the file lives server-side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrescriptionArtifact {
    pub filename: String,
    pub download_url: String,
}

/// Wall-clock start of an active call. Elapsed time is derived on read.
#[derive(Debug, Clone, Serialize)]
pub struct CallMetrics {
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Success,
    Error,
}

/// Capture constraints requested from the media provider. Defaults match
/// the web client: 640x480 minimum, 1280x720 ideal, 30 fps ceiling, audio on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConstraints {
    pub min_width: u32,
    pub min_height: u32,
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub max_frame_rate: u32,
    pub audio: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            min_width: 640,
            min_height: 480,
            ideal_width: 1280,
            ideal_height: 720,
            max_frame_rate: 30,
            audio: true,
        }
    }
}

// ==============================================================================
// SIGNALING WIRE MODELS
// ==============================================================================

/// Room-scoped messages received from the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundSignal {
    UserJoined {
        role: CallRole,
    },
    WaitingForDoctor {
        message: String,
    },
    WaitingForOtp {
        message: String,
    },
    OtpVerified {},
    ReceiveOffer {
        room: String,
        offer: SignalDescriptor,
    },
    ReceiveAnswer {
        room: String,
        answer: SignalDescriptor,
    },
    ReceiveIceCandidate {
        room: String,
        candidate: IceCandidateDescriptor,
    },
    NewPrescription {
        filename: String,
        download_url: String,
    },
    CallEnded {},
}

/// Room-scoped messages sent to the relay. Fire-and-forget from the
/// caller's perspective; FIFO per sender within a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundSignal {
    JoinRoom {
        room: String,
        appointment_id: Uuid,
        role: CallRole,
    },
    SendOffer {
        room: String,
        offer: SignalDescriptor,
    },
    SendAnswer {
        room: String,
        answer: SignalDescriptor,
    },
    SendIceCandidate {
        room: String,
        candidate: IceCandidateDescriptor,
    },
    EndCall {
        room: String,
        appointment_id: Uuid,
    },
}

impl OutboundSignal {
    pub fn room(&self) -> &str {
        match self {
            OutboundSignal::JoinRoom { room, .. }
            | OutboundSignal::SendOffer { room, .. }
            | OutboundSignal::SendAnswer { room, .. }
            | OutboundSignal::SendIceCandidate { room, .. }
            | OutboundSignal::EndCall { room, .. } => room,
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundSignal::JoinRoom { .. } => "join_room",
            OutboundSignal::SendOffer { .. } => "send_offer",
            OutboundSignal::SendAnswer { .. } => "send_answer",
            OutboundSignal::SendIceCandidate { .. } => "send_ice_candidate",
            OutboundSignal::EndCall { .. } => "end_call",
        }
    }
}

// ==============================================================================
// OTP VERIFICATION API MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOtpRequest {
    pub appointment_id: Uuid,
    pub otp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOtpResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ==============================================================================
// ERROR HANDLING
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum VideoCallError {
    #[error("Media acquisition failed: {message}")]
    MediaAcquisition { message: String },

    #[error("Signaling connection error: {message}")]
    SignalingConnection { message: String },

    #[error("Negotiation error: {message}")]
    Negotiation { message: String },

    #[error("Peer connection failure: {message}")]
    PeerConnectionFailure { message: String },

    #[error("OTP rejected: {message}")]
    OtpRejected { message: String },

    #[error("OTP must be a 6-digit numeric code")]
    InvalidOtpFormat,

    #[error("Session is not in a state that allows this operation: {state}")]
    InvalidSessionState { state: String },

    #[error("Video calling not configured")]
    NotConfigured,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<anyhow::Error> for VideoCallError {
    fn from(err: anyhow::Error) -> Self {
        VideoCallError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for VideoCallError {
    fn from(err: reqwest::Error) -> Self {
        VideoCallError::Internal {
            message: err.to_string(),
        }
    }
}
