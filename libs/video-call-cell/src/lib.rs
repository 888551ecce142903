// libs/video-call-cell/src/lib.rs
//! # Video Call Cell
//!
//! This cell implements the client-side core of a video consultation between
//! a patient and a clinician: session lifecycle, relay signaling, WebRTC
//! negotiation, and the OTP gate that protects call start.
//!
//! ## Features
//!
//! - **Session State Machine**: pure, I/O-free lifecycle from `Idle` to
//!   `Ended`/`Failed`, one instance per appointment and role
//! - **Relay Signaling**: room-scoped WebSocket channel carrying join,
//!   SDP, trickle ICE, prescription, and end-of-call events
//! - **Role Asymmetry**: only the clinician creates offers, and only after
//!   the patient's OTP has been verified out of band
//! - **Candidate Buffering**: remote ICE candidates received early are held
//!   in order until the remote description is set
//! - **Prescription Delivery**: in-call prescription artifacts surfaced to
//!   the patient without disturbing the media session
//! - **Call Timer**: `MM:SS` elapsed display while the call is active
//!
//! ## Architecture
//!
//! The video call cell follows the established cell architecture pattern:
//!
//! ```text
//! +-----------------------------------------------------+
//! |                 Video Call Cell                     |
//! +-----------------------------------------------------+
//! |  models.rs      |  Domain, wire & error types       |
//! |  state.rs       |  Pure session state machine       |
//! |  services/      |  Effect layer                     |
//! |    session.rs   |  Call orchestration               |
//! |    signaling.rs |  WebSocket relay channel          |
//! |    peer.rs      |  WebRTC peer connection adapter   |
//! |    media.rs     |  Local/remote media pipeline      |
//! |    otp.rs       |  OTP verification API client      |
//! |    notify.rs    |  User notification sink           |
//! |    timer.rs     |  Call duration tracking           |
//! +-----------------------------------------------------+
//! ```
//!
//! All I/O sits behind traits ([`SignalingChannel`],
//! [`PeerConnectionProvider`], [`MediaProvider`], [`RenderSink`],
//! [`NotificationSink`]) so the whole session can be driven in tests with
//! in-memory fakes.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use uuid::Uuid;
//! use shared_config::AppConfig;
//! use video_call_cell::{
//!     CallRole, CallSession, CallSessionConfig, NullRenderSink,
//!     TracingNotificationSink, WebRtcMediaProvider, WebRtcPeerProvider,
//!     WebSocketSignalingChannel,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::from_env();
//! let session_config = CallSessionConfig::new(
//!     "appointment-room-42",
//!     Uuid::new_v4(),
//!     CallRole::Clinician,
//!     &config,
//! );
//!
//! let mut session = CallSession::start(
//!     session_config,
//!     Arc::new(WebSocketSignalingChannel::new(config.signaling_url.clone())),
//!     Arc::new(WebRtcMediaProvider),
//!     Arc::new(WebRtcPeerProvider),
//!     Arc::new(TracingNotificationSink),
//!     Arc::new(NullRenderSink),
//! )
//! .await?;
//!
//! session.run().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! Required environment variables:
//! - `SIGNALING_URL` - WebSocket URL of the signaling relay
//! - `EXPERTEASE_API_BASE_URL` - Base URL of the REST API (OTP verification)
//! - `STUN_URLS` - Comma-separated STUN server URLs (optional, has a default)

pub mod models;
pub mod services;
pub mod state;

// Re-export commonly used types
pub use models::{
    CallMetrics, CallRole, IceCandidateDescriptor, InboundSignal, MediaConstraints,
    NotificationLevel, OutboundSignal, PrescriptionArtifact, SdpType, SessionState,
    SignalDescriptor, VerifyOtpRequest, VerifyOtpResponse, VideoCallError,
};

pub use state::{SessionAction, SessionInput, SessionMachine};

pub use services::media::{
    LocalMedia, MediaKind, MediaPipeline, MediaProvider, NullRenderSink, RemoteMediaTrack,
    RenderSink, WebRtcLocalMedia, WebRtcMediaProvider,
};
pub use services::{
    CallSession, CallSessionConfig, CallTimer, ChannelEvent, NotificationSink,
    OtpVerificationClient, PeerConnection, PeerConnectionProvider, PeerEvent, PeerState,
    SignalingChannel, TracingNotificationSink, WebRtcPeerProvider, WebSocketSignalingChannel,
};
