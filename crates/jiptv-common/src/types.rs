//! Core type definitions for jobs and tracks.
//!
//! All enums are serialized in lowercase, which is also how they are stored.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// Probe the source and store its stream layout.
    Analysis,
    /// Convert the source into a single playable file.
    Transcode,
    /// Extract one still frame.
    Thumbnail,
    /// Produce HLS segments and a manifest.
    Segment,
}

impl JobType {
    /// Every job type, in admission priority order.
    pub const BY_PRIORITY: [JobType; 4] = [
        JobType::Analysis,
        JobType::Thumbnail,
        JobType::Transcode,
        JobType::Segment,
    ];

    /// Admission priority, lower runs first.
    pub fn priority(self) -> u8 {
        match self {
            Self::Analysis => 1,
            Self::Thumbnail => 2,
            Self::Transcode => 3,
            Self::Segment => 4,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analysis => write!(f, "analysis"),
            Self::Transcode => write!(f, "transcode"),
            Self::Thumbnail => write!(f, "thumbnail"),
            Self::Segment => write!(f, "segment"),
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "analysis" => Ok(Self::Analysis),
            "transcode" => Ok(Self::Transcode),
            "thumbnail" => Ok(Self::Thumbnail),
            "segment" => Ok(Self::Segment),
            _ => Err(format!("Invalid job type: {}", s)),
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// Whether the job has reached the end of its lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

/// Type of elementary stream inside a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    Video,
    Audio,
    Subtitle,
}

impl fmt::Display for TrackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::Subtitle => write!(f, "subtitle"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_type_priority_order() {
        let mut types = vec![
            JobType::Segment,
            JobType::Transcode,
            JobType::Analysis,
            JobType::Thumbnail,
        ];
        types.sort_by_key(|t| t.priority());
        assert_eq!(types, JobType::BY_PRIORITY.to_vec());
    }

    #[test]
    fn test_job_type_parse() {
        assert_eq!("transcode".parse::<JobType>(), Ok(JobType::Transcode));
        assert_eq!("SEGMENT".parse::<JobType>(), Ok(JobType::Segment));
        assert!("remux".parse::<JobType>().is_err());
    }

    #[test]
    fn test_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_display_parse() {
        for status in JobStatus::ALL {
            assert_eq!(status.to_string().parse::<JobStatus>(), Ok(status));
        }
        assert_eq!(
            serde_json::to_string(&JobStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }
}
