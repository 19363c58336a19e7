//! Encoder profiles.
//!
//! A profile is a named parameter bundle. The orchestration layer only ever
//! carries the name; the registry turns it back into settings when a job is
//! admitted. Profiles are deserializable so deployments can add their own in
//! the config file:
//!
//! ```toml
//! [[profiles]]
//! kind = "transcode"
//! name = "Tablet_720"
//! video_codec = "libx264"
//! video_preset = "veryfast"
//! video_crf = 26
//! max_width = 1280
//! audio_codec = "aac"
//! audio_bitrate_kbps = 96
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use jiptv_common::JobType;

/// Settings for single-file TRANSCODE jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeProfile {
    pub name: String,
    pub video_codec: String,
    pub video_preset: String,
    pub video_crf: u32,
    /// Widest output frame; 0 disables scaling.
    #[serde(default)]
    pub max_width: u32,
    pub audio_codec: String,
    pub audio_bitrate_kbps: u32,
    #[serde(default = "default_audio_channels")]
    pub max_audio_channels: u32,
    #[serde(default = "default_subtitle_codec")]
    pub subtitle_codec: String,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    /// Re-encode even tracks that could be stream-copied.
    #[serde(default)]
    pub force_reencode: bool,
}

/// Settings for HLS SEGMENT jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentProfile {
    pub name: String,
    /// Overrides the service-wide segment duration.
    #[serde(default)]
    pub segment_duration_secs: Option<u32>,
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_video_preset")]
    pub video_preset: String,
    #[serde(default = "default_video_crf")]
    pub video_crf: u32,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate_kbps: u32,
    #[serde(default = "default_audio_channels")]
    pub audio_channels: u32,
}

/// Settings for THUMBNAIL jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThumbnailProfile {
    pub name: String,
    #[serde(default = "default_seek_secs")]
    pub seek_secs: f64,
    #[serde(default = "default_thumbnail_width")]
    pub width: u32,
    /// JPEG quality scale, 2 (best) to 31.
    #[serde(default = "default_thumbnail_quality")]
    pub quality: u32,
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_video_preset() -> String {
    "fast".to_string()
}

fn default_video_crf() -> u32 {
    23
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_audio_bitrate() -> u32 {
    128
}

fn default_audio_channels() -> u32 {
    2
}

fn default_subtitle_codec() -> String {
    "mov_text".to_string()
}

fn default_output_format() -> String {
    "mp4".to_string()
}

fn default_seek_secs() -> f64 {
    10.0
}

fn default_thumbnail_width() -> u32 {
    320
}

fn default_thumbnail_quality() -> u32 {
    2
}

/// Any registered profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Profile {
    Transcode(TranscodeProfile),
    Segment(SegmentProfile),
    Thumbnail(ThumbnailProfile),
}

impl Profile {
    pub fn name(&self) -> &str {
        match self {
            Self::Transcode(p) => &p.name,
            Self::Segment(p) => &p.name,
            Self::Thumbnail(p) => &p.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transcode(_) => "transcode",
            Self::Segment(_) => "segment",
            Self::Thumbnail(_) => "thumbnail",
        }
    }

    /// The job type this profile can drive.
    pub fn job_type(&self) -> JobType {
        match self {
            Self::Transcode(_) => JobType::Transcode,
            Self::Segment(_) => JobType::Segment,
            Self::Thumbnail(_) => JobType::Thumbnail,
        }
    }
}

/// Built-in profile names.
pub const WEBOS_COMPATIBLE: &str = "WebOS_Compatible";
pub const WEBOS_OPTIMIZED: &str = "WebOS_Optimized";
pub const WEBOS_HLS: &str = "WebOS_HLS";
pub const THUMBNAIL_DEFAULT: &str = "Thumbnail_Default";

/// Name-indexed profile lookup.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, Profile>,
}

impl ProfileRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock WebOS profiles plus a default thumbnail profile.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.insert(Profile::Transcode(TranscodeProfile {
            name: WEBOS_COMPATIBLE.to_string(),
            video_codec: "libx264".to_string(),
            video_preset: "fast".to_string(),
            video_crf: 23,
            max_width: 1920,
            audio_codec: "aac".to_string(),
            audio_bitrate_kbps: 128,
            max_audio_channels: 2,
            subtitle_codec: default_subtitle_codec(),
            output_format: "mp4".to_string(),
            force_reencode: false,
        }));
        registry.insert(Profile::Transcode(TranscodeProfile {
            name: WEBOS_OPTIMIZED.to_string(),
            video_codec: "libx264".to_string(),
            video_preset: "medium".to_string(),
            video_crf: 25,
            max_width: 1280,
            audio_codec: "aac".to_string(),
            audio_bitrate_kbps: 96,
            max_audio_channels: 2,
            subtitle_codec: default_subtitle_codec(),
            output_format: "mp4".to_string(),
            force_reencode: true,
        }));
        registry.insert(Profile::Segment(SegmentProfile {
            name: WEBOS_HLS.to_string(),
            segment_duration_secs: Some(6),
            video_codec: default_video_codec(),
            video_preset: default_video_preset(),
            video_crf: default_video_crf(),
            audio_codec: default_audio_codec(),
            audio_bitrate_kbps: default_audio_bitrate(),
            audio_channels: default_audio_channels(),
        }));
        registry.insert(Profile::Thumbnail(ThumbnailProfile {
            name: THUMBNAIL_DEFAULT.to_string(),
            seek_secs: default_seek_secs(),
            width: default_thumbnail_width(),
            quality: default_thumbnail_quality(),
        }));

        registry
    }

    /// Register a profile, replacing any profile with the same name.
    pub fn insert(&mut self, profile: Profile) -> Option<Profile> {
        self.profiles.insert(profile.name().to_string(), profile)
    }

    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
