//! Local and remote media handles
//!
//! Media capture and rendering are external collaborators. This module only
//! models what negotiation needs from them: which tracks exist, which stream
//! they belong to, and where inbound streams are delivered.

pub mod remote;
pub mod source;

pub use remote::{LoggingConsumer, MediaConsumer, RemoteStream};
pub use source::{MediaSource, SyntheticMediaSource};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

impl MediaKind {
    /// SDP media type (`m=` line)
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    /// Parse an SDP media type
    pub fn from_sdp(media: &str) -> Option<Self> {
        match media {
            "audio" => Some(MediaKind::Audio),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single audio or video track
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaTrack {
    /// Track identifier (unique within the stream)
    pub id: String,

    /// Audio or video
    pub kind: MediaKind,

    /// Device label, empty for remote tracks
    pub label: String,
}

impl MediaTrack {
    /// Create a track with a fresh identifier
    pub fn new(kind: MediaKind, label: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
        }
    }

    /// Create a track with an explicit identifier
    pub fn with_id(id: impl Into<String>, kind: MediaKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
        }
    }
}

/// Capture constraints passed to the media source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    /// Request a microphone track
    pub audio: bool,

    /// Request a camera track
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Captured local media: ordered audio tracks and ordered video tracks
///
/// A bundle is moved into the offering endpoint when the call starts; it is
/// deliberately not `Clone`.
#[derive(Debug)]
pub struct MediaBundle {
    id: String,
    audio: Vec<MediaTrack>,
    video: Vec<MediaTrack>,
}

impl MediaBundle {
    /// Create an empty bundle with a fresh stream identifier
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    /// Create an empty bundle with an explicit stream identifier
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            audio: Vec::new(),
            video: Vec::new(),
        }
    }

    /// Append a track, keeping per-kind order
    pub fn push(&mut self, track: MediaTrack) {
        match track.kind {
            MediaKind::Audio => self.audio.push(track),
            MediaKind::Video => self.video.push(track),
        }
    }

    /// Builder-style `push`
    pub fn with_track(mut self, track: MediaTrack) -> Self {
        self.push(track);
        self
    }

    /// Stream identifier shared by all tracks of the bundle
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Audio tracks in capture order
    pub fn audio_tracks(&self) -> &[MediaTrack] {
        &self.audio
    }

    /// Video tracks in capture order
    pub fn video_tracks(&self) -> &[MediaTrack] {
        &self.video
    }

    /// All tracks, audio first
    pub fn tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.audio.iter().chain(self.video.iter())
    }

    /// Total number of tracks
    pub fn len(&self) -> usize {
        self.audio.len() + self.video.len()
    }

    /// Whether the bundle carries no tracks
    pub fn is_empty(&self) -> bool {
        self.audio.is_empty() && self.video.is_empty()
    }
}

impl Default for MediaBundle {
    fn default() -> Self {
        Self::new()
    }
}
