// libs/video-call-cell/src/services/mod.rs

pub mod media;
pub mod notify;
pub mod otp;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod timer;

pub use media::{MediaPipeline, MediaProvider, RenderSink, WebRtcMediaProvider};
pub use notify::{NotificationSink, TracingNotificationSink};
pub use otp::OtpVerificationClient;
pub use peer::{PeerConnection, PeerConnectionProvider, PeerEvent, PeerState, WebRtcPeerProvider};
pub use session::{CallSession, CallSessionConfig};
pub use signaling::{ChannelEvent, SignalingChannel, WebSocketSignalingChannel};
pub use timer::CallTimer;
