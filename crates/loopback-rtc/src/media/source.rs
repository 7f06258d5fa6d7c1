//! Local media source

use super::{MediaBundle, MediaConstraints, MediaKind, MediaTrack};
use crate::{Error, Result};
use async_trait::async_trait;
use tracing::debug;

/// Produces a bundle of local tracks on request
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire local media matching `constraints`
    ///
    /// # Errors
    ///
    /// Returns `Error::MediaAccessError` on permission denial or when no
    /// device can satisfy the request.
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaBundle>;
}

/// Media source that fabricates one track per requested kind
///
/// Stands in for a capture device; it can be configured to deny access or
/// to report a missing device for one kind.
#[derive(Debug, Clone)]
pub struct SyntheticMediaSource {
    audio_label: Option<String>,
    video_label: Option<String>,
    denied: Option<String>,
}

impl SyntheticMediaSource {
    /// Source with a default microphone and camera
    pub fn new() -> Self {
        Self {
            audio_label: Some("Synthetic Microphone".to_string()),
            video_label: Some("Synthetic Camera".to_string()),
            denied: None,
        }
    }

    /// Source that refuses every request with `reason`
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            denied: Some(reason.into()),
            ..Self::new()
        }
    }

    /// Remove the microphone
    pub fn without_audio(mut self) -> Self {
        self.audio_label = None;
        self
    }

    /// Remove the camera
    pub fn without_video(mut self) -> Self {
        self.video_label = None;
        self
    }
}

impl Default for SyntheticMediaSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaSource for SyntheticMediaSource {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaBundle> {
        if let Some(reason) = &self.denied {
            return Err(Error::MediaAccessError {
                reason: reason.clone(),
            });
        }

        if !constraints.audio && !constraints.video {
            return Err(Error::MediaAccessError {
                reason: "TypeError: at least one of audio and video must be requested"
                    .to_string(),
            });
        }

        let mut bundle = MediaBundle::new();

        for (wanted, kind, label) in [
            (constraints.audio, MediaKind::Audio, &self.audio_label),
            (constraints.video, MediaKind::Video, &self.video_label),
        ] {
            if !wanted {
                continue;
            }
            match label {
                Some(label) => bundle.push(MediaTrack::new(kind, label.clone())),
                None => {
                    return Err(Error::MediaAccessError {
                        reason: format!("NotFoundError: no {} device", kind),
                    })
                }
            }
        }

        debug!(
            "Acquired synthetic media: stream={}, tracks={}",
            bundle.id(),
            bundle.len()
        );

        Ok(bundle)
    }
}
