// libs/video-call-cell/src/services/session.rs
use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{
    CallMetrics, CallRole, InboundSignal, MediaConstraints, OutboundSignal, PrescriptionArtifact,
    SessionState, SignalDescriptor, VideoCallError,
};
use crate::services::media::{MediaPipeline, MediaProvider, RenderSink};
use crate::services::notify::NotificationSink;
use crate::services::peer::{PeerConnection, PeerConnectionProvider, PeerEvent, PeerState};
use crate::services::signaling::{ChannelEvent, SignalingChannel};
use crate::services::timer::CallTimer;
use crate::state::{SessionAction, SessionInput, SessionMachine};

/// Per-appointment call parameters.
#[derive(Debug, Clone)]
pub struct CallSessionConfig {
    pub room_name: String,
    pub appointment_id: Uuid,
    pub role: CallRole,
    pub constraints: MediaConstraints,
    pub ice_servers: Vec<String>,
}

impl CallSessionConfig {
    pub fn new(
        room_name: impl Into<String>,
        appointment_id: Uuid,
        role: CallRole,
        config: &AppConfig,
    ) -> Self {
        Self {
            room_name: room_name.into(),
            appointment_id,
            role,
            constraints: MediaConstraints::default(),
            ice_servers: config.stun_urls.clone(),
        }
    }
}

/// Orchestrates one consultation call: owns the session state machine,
/// consumes signaling and peer-connection events, and performs the effects
/// each transition demands.
///
/// Processing is strictly sequential. Events arriving while a transition
/// awaits queue up in the channels and are handled one at a time, so no
/// transition ever observes the session mid-mutation.
pub struct CallSession {
    config: CallSessionConfig,
    machine: SessionMachine,
    channel: Arc<dyn SignalingChannel>,
    media: MediaPipeline,
    peer_provider: Arc<dyn PeerConnectionProvider>,
    notifier: Arc<dyn NotificationSink>,
    render: Arc<dyn RenderSink>,
    timer: CallTimer,
    peer: Option<Arc<dyn PeerConnection>>,
    peer_events_tx: mpsc::UnboundedSender<PeerEvent>,
    peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl CallSession {
    /// Connect the relay channel and join the appointment room.
    pub async fn start(
        config: CallSessionConfig,
        channel: Arc<dyn SignalingChannel>,
        media_provider: Arc<dyn MediaProvider>,
        peer_provider: Arc<dyn PeerConnectionProvider>,
        notifier: Arc<dyn NotificationSink>,
        render: Arc<dyn RenderSink>,
    ) -> Result<Self, VideoCallError> {
        info!(
            "Starting video session for appointment {} in room {} as {}",
            config.appointment_id, config.room_name, config.role
        );

        channel.connect().await?;
        let channel_events = channel.subscribe(&config.room_name);
        let (peer_events_tx, peer_events) = mpsc::unbounded_channel();

        let mut session = Self {
            machine: SessionMachine::new(config.role),
            media: MediaPipeline::new(media_provider, Arc::clone(&render)),
            channel,
            peer_provider,
            notifier,
            render,
            timer: CallTimer::new(),
            peer: None,
            peer_events_tx,
            peer_events,
            channel_events,
            config,
        };

        session.dispatch(SessionInput::Started).await;
        if session.machine.state() == SessionState::Failed {
            return Err(VideoCallError::SignalingConnection {
                message: "failed to join the consultation room".to_string(),
            });
        }

        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn role(&self) -> CallRole {
        self.config.role
    }

    pub fn room_name(&self) -> &str {
        &self.config.room_name
    }

    pub fn metrics(&self) -> Option<CallMetrics> {
        self.timer.metrics()
    }

    /// Elapsed call time formatted `MM:SS`, while the call is active.
    pub fn elapsed_display(&self) -> Option<String> {
        self.timer.display()
    }

    /// Drive the session until it reaches a terminal state.
    pub async fn run(&mut self) {
        enum Step {
            Channel(ChannelEvent),
            Peer(PeerEvent),
            Closed,
        }

        while !self.machine.state().is_terminal() {
            let step = tokio::select! {
                event = self.channel_events.recv() => {
                    event.map(Step::Channel).unwrap_or(Step::Closed)
                }
                event = self.peer_events.recv() => {
                    event.map(Step::Peer).unwrap_or(Step::Closed)
                }
            };
            match step {
                Step::Channel(event) => self.process_channel_event(event).await,
                Step::Peer(event) => self.process_peer_event(event).await,
                Step::Closed => break,
            }
        }
    }

    /// End the call. Idempotent: a second call is a no-op and never
    /// re-notifies the relay.
    pub async fn end_call(&mut self) {
        self.dispatch(SessionInput::EndRequested).await;
    }

    pub async fn process_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Signal(signal) => self.process_signal(signal).await,
            ChannelEvent::Disconnected => {
                self.dispatch(SessionInput::Failure(VideoCallError::SignalingConnection {
                    message: "relay connection lost".to_string(),
                }))
                .await;
            }
        }
    }

    pub async fn process_signal(&mut self, signal: InboundSignal) {
        let input = match signal {
            InboundSignal::UserJoined { role } => SessionInput::PeerJoined { role },
            InboundSignal::WaitingForDoctor { message } => {
                SessionInput::WaitingForPeerNotice { message }
            }
            InboundSignal::WaitingForOtp { message } => {
                SessionInput::WaitingForOtpNotice { message }
            }
            InboundSignal::OtpVerified {} => SessionInput::OtpVerified,
            InboundSignal::ReceiveOffer { offer, .. } => SessionInput::OfferReceived(offer),
            InboundSignal::ReceiveAnswer { answer, .. } => SessionInput::AnswerReceived(answer),
            InboundSignal::ReceiveIceCandidate { candidate, .. } => {
                SessionInput::CandidateReceived(candidate)
            }
            InboundSignal::NewPrescription {
                filename,
                download_url,
            } => SessionInput::PrescriptionReceived(PrescriptionArtifact {
                filename,
                download_url,
            }),
            InboundSignal::CallEnded {} => SessionInput::PeerEnded,
        };
        self.dispatch(input).await;
    }

    pub async fn process_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                self.dispatch(SessionInput::LocalCandidate(candidate)).await;
            }
            PeerEvent::RemoteTrack(track) => {
                let first_video = self.media.attach_remote(track);
                if first_video {
                    self.dispatch(SessionInput::RemoteTrackAttached).await;
                }
            }
            PeerEvent::StateChanged(state) => match state {
                PeerState::Connected => self.dispatch(SessionInput::PeerConnected).await,
                PeerState::Disconnected | PeerState::Failed => {
                    self.dispatch(SessionInput::Failure(
                        VideoCallError::PeerConnectionFailure {
                            message: format!("peer connection state {:?}", state),
                        },
                    ))
                    .await;
                }
                PeerState::New | PeerState::Connecting | PeerState::Closed => {}
            },
        }
    }

    /// Apply one input, execute the resulting effects, and keep going while
    /// effects settle into follow-up inputs. The explicit worklist keeps
    /// processing sequential without re-entrant transitions.
    async fn dispatch(&mut self, input: SessionInput) {
        let mut queue = VecDeque::new();
        queue.push_back(input);

        while let Some(input) = queue.pop_front() {
            debug!("session {} in {}: {:?}", self.config.room_name, self.machine.state(), input);
            let actions = self.machine.apply(input);
            for action in actions {
                if let Some(follow_up) = self.execute(action).await {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    async fn execute(&mut self, action: SessionAction) -> Option<SessionInput> {
        match action {
            SessionAction::SendJoin => {
                match self
                    .channel
                    .join_room(
                        &self.config.room_name,
                        self.config.appointment_id,
                        self.config.role,
                    )
                    .await
                {
                    Ok(()) => {
                        info!(
                            "Joined room {} as {}",
                            self.config.room_name, self.config.role
                        );
                        Some(SessionInput::JoinSent)
                    }
                    Err(e) => {
                        error!("Failed to join room {}: {}", self.config.room_name, e);
                        Some(SessionInput::Failure(e))
                    }
                }
            }
            SessionAction::ShowWaiting { message } => {
                self.render.show_waiting(&message);
                None
            }
            SessionAction::HideWaiting => {
                self.render.hide_waiting();
                None
            }
            SessionAction::AcquireMedia => {
                let preview = self.config.role == CallRole::Clinician;
                match self
                    .media
                    .acquire_local(&self.config.constraints, preview)
                    .await
                {
                    Ok(()) => Some(SessionInput::LocalMediaReady),
                    Err(e) => {
                        error!("Media acquisition failed: {}", e);
                        Some(SessionInput::Failure(e))
                    }
                }
            }
            SessionAction::CreateOffer => match self.create_and_send_offer().await {
                Ok(()) => Some(SessionInput::OfferSent),
                Err(e) => {
                    error!("Failed to start negotiation: {}", e);
                    Some(SessionInput::Failure(e))
                }
            },
            SessionAction::AnswerOffer(offer) => match self.answer_offer(offer).await {
                Ok(()) => Some(SessionInput::AnswerSent),
                Err(e) => {
                    error!("Failed to answer offer: {}", e);
                    Some(SessionInput::Failure(e))
                }
            },
            SessionAction::ApplyRemoteAnswer(answer) => {
                let result = match self.require_peer() {
                    Ok(peer) => peer.set_remote_description(answer).await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(()) => {
                        debug!("Remote answer applied");
                        None
                    }
                    Err(e) => {
                        error!("Failed to apply remote answer: {}", e);
                        Some(SessionInput::Failure(e))
                    }
                }
            }
            SessionAction::ApplyCandidate(candidate) => {
                let result = match self.require_peer() {
                    Ok(peer) => peer.add_ice_candidate(candidate).await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(()) => None,
                    Err(e) => {
                        error!("Failed to apply ICE candidate: {}", e);
                        Some(SessionInput::Failure(e))
                    }
                }
            }
            SessionAction::SendCandidate(candidate) => {
                let signal = OutboundSignal::SendIceCandidate {
                    room: self.config.room_name.clone(),
                    candidate,
                };
                // Fire-and-forget: a dead relay surfaces as its own
                // Disconnected event.
                if let Err(e) = self.channel.send(signal).await {
                    warn!("Failed to trickle ICE candidate: {}", e);
                }
                None
            }
            SessionAction::StartTimer => {
                self.timer.start();
                info!("Call active in room {}", self.config.room_name);
                None
            }
            SessionAction::StopTimer => {
                self.timer.stop();
                None
            }
            SessionAction::Notify { level, message } => {
                self.notifier.notify(&message, level);
                None
            }
            SessionAction::OfferPrescription(artifact) => {
                info!("Prescription available: {}", artifact.filename);
                self.render.present_prescription(&artifact);
                None
            }
            SessionAction::ReleaseResources => {
                self.media.release();
                if let Some(peer) = self.peer.take() {
                    if let Err(e) = peer.close().await {
                        warn!("Failed to close peer connection: {}", e);
                    }
                }
                None
            }
            SessionAction::SendEndCall => {
                let signal = OutboundSignal::EndCall {
                    room: self.config.room_name.clone(),
                    appointment_id: self.config.appointment_id,
                };
                // Ending must always complete; a relay that is already gone
                // cannot block local cleanup.
                match self.channel.send(signal).await {
                    Ok(()) => info!("Notified relay of call end"),
                    Err(e) => warn!("Failed to notify relay of call end: {}", e),
                }
                Some(SessionInput::CleanupComplete)
            }
        }
    }

    async fn create_and_send_offer(&mut self) -> Result<(), VideoCallError> {
        let peer = self.ensure_peer().await?;
        let media = self
            .media
            .local()
            .ok_or_else(|| VideoCallError::Internal {
                message: "local media not acquired before offer".to_string(),
            })?;
        peer.add_local_media(media).await?;

        let offer = peer.create_offer().await?;
        self.channel
            .send(OutboundSignal::SendOffer {
                room: self.config.room_name.clone(),
                offer,
            })
            .await?;
        info!("Offer sent to room {}", self.config.room_name);
        Ok(())
    }

    async fn answer_offer(&mut self, offer: SignalDescriptor) -> Result<(), VideoCallError> {
        let peer = self.ensure_peer().await?;
        peer.set_remote_description(offer).await?;

        let answer = peer.create_answer().await?;
        self.channel
            .send(OutboundSignal::SendAnswer {
                room: self.config.room_name.clone(),
                answer,
            })
            .await?;
        info!("Answer sent to room {}", self.config.room_name);
        Ok(())
    }

    async fn ensure_peer(&mut self) -> Result<Arc<dyn PeerConnection>, VideoCallError> {
        if let Some(peer) = &self.peer {
            return Ok(Arc::clone(peer));
        }
        let peer = self
            .peer_provider
            .create(&self.config.ice_servers, self.peer_events_tx.clone())
            .await?;
        self.peer = Some(Arc::clone(&peer));
        Ok(peer)
    }

    fn require_peer(&self) -> Result<Arc<dyn PeerConnection>, VideoCallError> {
        self.peer
            .clone()
            .ok_or_else(|| VideoCallError::Negotiation {
                message: "no peer connection for this session".to_string(),
            })
    }
}
