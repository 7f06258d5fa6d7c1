//! Inbound streams and the consumer that renders them

use super::{MediaBundle, MediaKind, MediaTrack};
use crate::Error;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{error, info};

/// Handle to an inbound media stream
///
/// Cloning yields another handle to the same stream. Tracks announced later
/// for the same stream are added to the existing handle.
#[derive(Debug, Clone)]
pub struct RemoteStream {
    inner: Arc<RemoteStreamInner>,
}

#[derive(Debug)]
struct RemoteStreamInner {
    id: String,
    tracks: RwLock<Vec<MediaTrack>>,
}

impl RemoteStream {
    /// Create an empty stream handle
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RemoteStreamInner {
                id: id.into(),
                tracks: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Stream identifier (the sender's stream id)
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Record a track; returns `false` if it was already known
    pub fn add_track(&self, track: MediaTrack) -> bool {
        let mut tracks = self.inner.tracks.write();
        if tracks.iter().any(|t| t.id == track.id) {
            return false;
        }
        tracks.push(track);
        true
    }

    /// Snapshot of the tracks received so far
    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.inner.tracks.read().clone()
    }

    /// Whether a track of `kind` has arrived
    pub fn has_kind(&self, kind: MediaKind) -> bool {
        self.inner.tracks.read().iter().any(|t| t.kind == kind)
    }

    /// Whether both handles refer to the same stream object
    pub fn ptr_eq(&self, other: &RemoteStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Receives media produced by a call (the UI in an interactive app)
pub trait MediaConsumer: Send + Sync {
    /// Local bundle acquired; render a preview
    fn local_preview(&self, bundle: &MediaBundle);

    /// A new inbound stream became available
    fn remote_stream(&self, stream: RemoteStream);

    /// A user-visible failure occurred
    fn session_error(&self, _error: &Error) {}
}

/// Consumer that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingConsumer;

impl MediaConsumer for LoggingConsumer {
    fn local_preview(&self, bundle: &MediaBundle) {
        info!(
            stream_id = %bundle.id(),
            audio_tracks = bundle.audio_tracks().len(),
            video_tracks = bundle.video_tracks().len(),
            "Local preview ready"
        );
    }

    fn remote_stream(&self, stream: RemoteStream) {
        info!(stream_id = %stream.id(), "Received remote stream");
    }

    fn session_error(&self, error: &Error) {
        error!("Session error: {}", error);
    }
}
