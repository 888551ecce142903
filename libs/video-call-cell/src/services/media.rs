// libs/video-call-cell/src/services/media.rs
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::models::{MediaConstraints, PrescriptionArtifact, VideoCallError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Handle to acquired local capture. `stop` must be safe to call more than
/// once.
pub trait LocalMedia: Send + Sync {
    fn stop(&self);
    fn has_video(&self) -> bool;
    /// Concrete-type escape hatch so a peer-connection adapter can publish
    /// the tracks of a media handle produced by its matching provider.
    fn as_any(&self) -> &dyn Any;
}

/// One remote media track as seen by the render sink.
pub trait RemoteMediaTrack: Send + Sync {
    fn kind(&self) -> MediaKind;
    fn id(&self) -> String;
}

/// Acquires local audio/video capture.
#[async_trait]
pub trait MediaProvider: Send + Sync {
    async fn acquire_local(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Arc<dyn LocalMedia>, VideoCallError>;
}

/// Where streams and call-scoped artifacts become visible to the user.
/// Purely a sink; it holds no business state.
pub trait RenderSink: Send + Sync {
    fn attach_local(&self, media: &Arc<dyn LocalMedia>);
    fn attach_remote(&self, track: &Arc<dyn RemoteMediaTrack>);
    fn show_waiting(&self, message: &str);
    fn hide_waiting(&self);
    fn present_prescription(&self, artifact: &PrescriptionArtifact);
}

/// Render sink for headless embeddings; every event is dropped.
pub struct NullRenderSink;

impl RenderSink for NullRenderSink {
    fn attach_local(&self, _media: &Arc<dyn LocalMedia>) {}
    fn attach_remote(&self, _track: &Arc<dyn RemoteMediaTrack>) {}
    fn show_waiting(&self, _message: &str) {}
    fn hide_waiting(&self) {}
    fn present_prescription(&self, _artifact: &PrescriptionArtifact) {}
}

/// Owns the local/remote media lifecycle of one session: acquisition,
/// remote-track hand-off to the render sink, and release.
pub struct MediaPipeline {
    provider: Arc<dyn MediaProvider>,
    render: Arc<dyn RenderSink>,
    local: Option<Arc<dyn LocalMedia>>,
    remote_video_attached: bool,
}

impl MediaPipeline {
    pub fn new(provider: Arc<dyn MediaProvider>, render: Arc<dyn RenderSink>) -> Self {
        Self {
            provider,
            render,
            local: None,
            remote_video_attached: false,
        }
    }

    /// Acquire local capture. With `preview` set, the local stream is also
    /// handed to the render sink (the clinician sees their own camera).
    pub async fn acquire_local(
        &mut self,
        constraints: &MediaConstraints,
        preview: bool,
    ) -> Result<(), VideoCallError> {
        let media = self.provider.acquire_local(constraints).await?;
        info!("Local media acquired (video: {})", media.has_video());
        if preview {
            self.render.attach_local(&media);
        }
        self.local = Some(media);
        Ok(())
    }

    pub fn local(&self) -> Option<Arc<dyn LocalMedia>> {
        self.local.clone()
    }

    /// Hand a remote track to the render sink. Returns true the first time
    /// a remote video track arrives.
    pub fn attach_remote(&mut self, track: Arc<dyn RemoteMediaTrack>) -> bool {
        debug!("Remote track attached: {:?} ({})", track.kind(), track.id());
        self.render.attach_remote(&track);
        if track.kind() == MediaKind::Video && !self.remote_video_attached {
            self.remote_video_attached = true;
            return true;
        }
        false
    }

    /// Stop all local tracks. Safe to call when acquisition never happened
    /// or release already ran; both are no-ops.
    pub fn release(&mut self) {
        if let Some(media) = self.local.take() {
            info!("Releasing local media");
            media.stop();
        }
    }
}

// ==============================================================================
// WEBRTC-RS ADAPTER
// ==============================================================================

/// Local capture handle backed by webrtc-rs sample tracks. The embedding
/// capture loop feeds samples into [`WebRtcLocalMedia::video_track`] and
/// [`WebRtcLocalMedia::audio_track`] and polls [`WebRtcLocalMedia::is_stopped`]
/// to know when to shut down.
pub struct WebRtcLocalMedia {
    video_track: Option<Arc<TrackLocalStaticSample>>,
    audio_track: Option<Arc<TrackLocalStaticSample>>,
    constraints: MediaConstraints,
    stopped: AtomicBool,
}

impl WebRtcLocalMedia {
    pub fn video_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.video_track.clone()
    }

    pub fn audio_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.audio_track.clone()
    }

    pub fn tracks(&self) -> Vec<Arc<TrackLocalStaticSample>> {
        self.video_track
            .iter()
            .chain(self.audio_track.iter())
            .cloned()
            .collect()
    }

    pub fn constraints(&self) -> &MediaConstraints {
        &self.constraints
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl LocalMedia for WebRtcLocalMedia {
    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    fn has_video(&self) -> bool {
        self.video_track.is_some()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Production [`MediaProvider`] creating webrtc-rs sample tracks (VP8 video,
/// Opus audio). Frame production is owned by the embedding capture loop.
pub struct WebRtcMediaProvider;

#[async_trait]
impl MediaProvider for WebRtcMediaProvider {
    async fn acquire_local(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Arc<dyn LocalMedia>, VideoCallError> {
        let video_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            "expertease-local".to_owned(),
        ));

        let audio_track = constraints.audio.then(|| {
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    ..Default::default()
                },
                "audio".to_owned(),
                "expertease-local".to_owned(),
            ))
        });

        info!(
            "Prepared local tracks ({}x{} ideal, {} fps max, audio: {})",
            constraints.ideal_width,
            constraints.ideal_height,
            constraints.max_frame_rate,
            constraints.audio
        );

        Ok(Arc::new(WebRtcLocalMedia {
            video_track: Some(video_track),
            audio_track,
            constraints: constraints.clone(),
            stopped: AtomicBool::new(false),
        }))
    }
}
