//! Descriptors handed to us by the media catalog.
//!
//! The orchestration core never looks inside a source beyond what is here: a
//! locator to read from, optional ground truth for progress, and the tracks the
//! caller picked.

use serde::{Deserialize, Serialize};

use crate::{SourceId, TrackId, TrackType};

/// A media source a job operates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaSource {
    pub id: SourceId,
    /// Local path or network URL.
    pub locator: String,
    /// Total duration in seconds, when the catalog has analysed the source.
    #[serde(default)]
    pub duration_secs: Option<f64>,
    /// Total frame count, when known.
    #[serde(default)]
    pub total_frames: Option<i64>,
}

impl MediaSource {
    pub fn new(id: impl Into<SourceId>, locator: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            locator: locator.into(),
            duration_secs: None,
            total_frames: None,
        }
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn with_total_frames(mut self, frames: i64) -> Self {
        self.total_frames = Some(frames);
        self
    }

    /// Whether the locator points at a network resource rather than a local file.
    pub fn is_remote(&self) -> bool {
        self.locator.contains("://")
    }
}

/// One selected track of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub id: TrackId,
    pub source_id: SourceId,
    /// Stream index inside the container.
    pub index: u32,
    pub track_type: TrackType,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub channels: Option<u32>,
    #[serde(default)]
    pub language: Option<String>,
    /// Already playable on the target devices, so it can be stream-copied.
    #[serde(default)]
    pub compatible: bool,
}

impl TrackDescriptor {
    pub fn new(
        id: impl Into<TrackId>,
        source_id: impl Into<SourceId>,
        index: u32,
        track_type: TrackType,
    ) -> Self {
        Self {
            id: id.into(),
            source_id: source_id.into(),
            index,
            track_type,
            codec: None,
            width: None,
            height: None,
            channels: None,
            language: None,
            compatible: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_detection() {
        assert!(MediaSource::new(1, "http://cdn.example/live.m3u8").is_remote());
        assert!(MediaSource::new(1, "rtsp://camera/1").is_remote());
        assert!(!MediaSource::new(1, "/media/movies/a.mkv").is_remote());
    }

    #[test]
    fn test_track_defaults_when_deserializing() {
        let track: TrackDescriptor = serde_json::from_str(
            r#"{"id": 3, "source_id": 1, "index": 0, "track_type": "video"}"#,
        )
        .unwrap();
        assert_eq!(track.track_type, TrackType::Video);
        assert!(!track.compatible);
        assert!(track.width.is_none());
    }
}
