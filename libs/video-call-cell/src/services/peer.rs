// libs/video-call-cell/src/services/peer.rs
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::models::{IceCandidateDescriptor, SdpType, SignalDescriptor, VideoCallError};
use crate::services::media::{LocalMedia, MediaKind, RemoteMediaTrack, WebRtcLocalMedia};

/// Connection state of the underlying transport, mapped away from any
/// particular WebRTC implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Asynchronous notifications from the peer connection.
pub enum PeerEvent {
    /// Trickle ICE: a locally discovered candidate, forwarded as-is.
    LocalCandidate(IceCandidateDescriptor),
    RemoteTrack(Arc<dyn RemoteMediaTrack>),
    StateChanged(PeerState),
}

/// One peer connection, owned exclusively by one session.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Publish local tracks on the connection.
    async fn add_local_media(&self, media: Arc<dyn LocalMedia>) -> Result<(), VideoCallError>;

    /// Create the offer and set it as the local description.
    async fn create_offer(&self) -> Result<SignalDescriptor, VideoCallError>;

    /// Create the answer and set it as the local description. Only valid
    /// after the remote offer has been set.
    async fn create_answer(&self) -> Result<SignalDescriptor, VideoCallError>;

    async fn set_remote_description(
        &self,
        descriptor: SignalDescriptor,
    ) -> Result<(), VideoCallError>;

    async fn add_ice_candidate(
        &self,
        candidate: IceCandidateDescriptor,
    ) -> Result<(), VideoCallError>;

    async fn close(&self) -> Result<(), VideoCallError>;
}

/// Creates peer connections. The session passes an event sender so candidate
/// discovery, remote tracks, and state changes flow back into its queue.
#[async_trait]
pub trait PeerConnectionProvider: Send + Sync {
    async fn create(
        &self,
        ice_servers: &[String],
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, VideoCallError>;
}

// ==============================================================================
// WEBRTC-RS ADAPTER
// ==============================================================================

struct WebRtcRemoteTrack {
    track: Arc<TrackRemote>,
}

impl RemoteMediaTrack for WebRtcRemoteTrack {
    fn kind(&self) -> MediaKind {
        if self.track.kind() == webrtc::rtp_transceiver::rtp_codec::RTPCodecType::Audio {
            MediaKind::Audio
        } else {
            MediaKind::Video
        }
    }

    fn id(&self) -> String {
        self.track.id()
    }
}

fn map_peer_state(state: RTCPeerConnectionState) -> PeerState {
    match state {
        RTCPeerConnectionState::New => PeerState::New,
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
        _ => PeerState::New,
    }
}

pub struct WebRtcPeerConnection {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnection for WebRtcPeerConnection {
    async fn add_local_media(&self, media: Arc<dyn LocalMedia>) -> Result<(), VideoCallError> {
        let media = media
            .as_any()
            .downcast_ref::<WebRtcLocalMedia>()
            .ok_or_else(|| VideoCallError::Internal {
                message: "local media handle was not produced by the webrtc provider".to_string(),
            })?;

        for track in media.tracks() {
            self.pc
                .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| VideoCallError::PeerConnectionFailure {
                    message: format!("Failed to publish local track: {}", e),
                })?;
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SignalDescriptor, VideoCallError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| VideoCallError::Negotiation {
                message: format!("Failed to create offer: {}", e),
            })?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| VideoCallError::Negotiation {
                message: format!("Failed to set local offer: {}", e),
            })?;
        Ok(SignalDescriptor::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SignalDescriptor, VideoCallError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| VideoCallError::Negotiation {
                message: format!("Failed to create answer: {}", e),
            })?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| VideoCallError::Negotiation {
                message: format!("Failed to set local answer: {}", e),
            })?;
        Ok(SignalDescriptor::answer(answer.sdp))
    }

    async fn set_remote_description(
        &self,
        descriptor: SignalDescriptor,
    ) -> Result<(), VideoCallError> {
        let description = match descriptor.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(descriptor.sdp),
            SdpType::Answer => RTCSessionDescription::answer(descriptor.sdp),
        }
        .map_err(|e| VideoCallError::Negotiation {
            message: format!("Malformed remote description: {}", e),
        })?;

        self.pc
            .set_remote_description(description)
            .await
            .map_err(|e| VideoCallError::Negotiation {
                message: format!("Failed to set remote description: {}", e),
            })
    }

    async fn add_ice_candidate(
        &self,
        candidate: IceCandidateDescriptor,
    ) -> Result<(), VideoCallError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: Some(candidate.sdp_mid),
                sdp_mline_index: Some(candidate.sdp_mline_index),
                username_fragment: None,
            })
            .await
            .map_err(|e| VideoCallError::Negotiation {
                message: format!("Failed to apply ICE candidate: {}", e),
            })
    }

    async fn close(&self) -> Result<(), VideoCallError> {
        self.pc
            .close()
            .await
            .map_err(|e| VideoCallError::PeerConnectionFailure {
                message: format!("Failed to close peer connection: {}", e),
            })
    }
}

/// Production [`PeerConnectionProvider`] over webrtc-rs.
pub struct WebRtcPeerProvider;

#[async_trait]
impl PeerConnectionProvider for WebRtcPeerProvider {
    async fn create(
        &self,
        ice_servers: &[String],
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, VideoCallError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| VideoCallError::PeerConnectionFailure {
                message: format!("Failed to register codecs: {}", e),
            })?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| VideoCallError::PeerConnectionFailure {
                message: format!("Failed to register interceptors: {}", e),
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: ice_servers.to_vec(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await.map_err(|e| {
            VideoCallError::PeerConnectionFailure {
                message: format!("Failed to create peer connection: {}", e),
            }
        })?);

        info!("Peer connection created ({} ICE server urls)", ice_servers.len());

        let candidate_tx = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = candidate_tx.send(PeerEvent::LocalCandidate(
                            IceCandidateDescriptor {
                                candidate: init.candidate,
                                sdp_mline_index: init.sdp_mline_index.unwrap_or(0),
                                sdp_mid: init.sdp_mid.unwrap_or_default(),
                            },
                        ));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {}", e),
                }
            } else {
                debug!("ICE candidate gathering completed");
            }
            Box::pin(async {})
        }));

        let track_tx = events.clone();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            debug!("Remote track received: {}", track.id());
            let _ = track_tx.send(PeerEvent::RemoteTrack(Arc::new(WebRtcRemoteTrack {
                track,
            })));
            Box::pin(async {})
        }));

        let state_tx = events;
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!("Peer connection state changed to {:?}", state);
            let _ = state_tx.send(PeerEvent::StateChanged(map_peer_state(state)));
            Box::pin(async {})
        }));

        Ok(Arc::new(WebRtcPeerConnection { pc }))
    }
}
