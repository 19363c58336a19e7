//! Database models.
//!
//! `TranscodingJob` mirrors one row of `transcoding_jobs`. Its transition
//! methods are the only place lifecycle timestamps and the terminal progress
//! value get set, so every writer keeps the record consistent.

use chrono::{DateTime, Utc};
use jiptv_common::{JobId, JobStatus, JobType, SourceId};
use serde::{Deserialize, Serialize};

/// Fields supplied when a job is first recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub source_id: SourceId,
    pub job_type: JobType,
    pub input_locator: String,
    pub profile: Option<String>,
    /// Serialized track selection, opaque to the store.
    pub target_tracks: Option<String>,
    pub total_frames: Option<i64>,
    pub source_duration_secs: Option<f64>,
}

impl NewJob {
    pub fn new(source_id: SourceId, job_type: JobType, input_locator: impl Into<String>) -> Self {
        Self {
            source_id,
            job_type,
            input_locator: input_locator.into(),
            profile: None,
            target_tracks: None,
            total_frames: None,
            source_duration_secs: None,
        }
    }
}

/// Transcoding job model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscodingJob {
    pub id: JobId,
    pub source_id: SourceId,
    pub job_type: JobType,
    pub status: JobStatus,
    pub input_locator: String,
    pub output_locator: Option<String>,
    pub profile: Option<String>,
    pub target_tracks: Option<String>,
    /// Rendered encoder invocation, recorded at admission.
    pub encoder_command: Option<String>,
    pub progress_percent: i32,
    pub current_frame: Option<i64>,
    pub total_frames: Option<i64>,
    pub source_duration_secs: Option<f64>,
    /// Encoder speed as reported, e.g. `"2.0x"`.
    pub processing_speed: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_completion_at: Option<DateTime<Utc>>,
    pub output_size_bytes: Option<i64>,
    pub error_message: Option<String>,
    pub encoder_log: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TranscodingJob {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// PENDING -> RUNNING.
    pub fn start(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// RUNNING -> COMPLETED. The only transition that sets progress to 100.
    pub fn complete(&mut self, output_size_bytes: Option<i64>) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.progress_percent = 100;
        self.estimated_completion_at = None;
        self.output_size_bytes = output_size_bytes;
    }

    /// Any state -> FAILED. Also used for jobs rejected before they ever ran.
    pub fn fail(&mut self, message: impl Into<String>) {
        let now = Utc::now();
        self.started_at.get_or_insert(now);
        self.status = JobStatus::Failed;
        self.completed_at = Some(now);
        self.error_message = Some(message.into());
        self.estimated_completion_at = None;
        self.cap_progress();
    }

    /// PENDING or RUNNING -> CANCELLED.
    ///
    /// A job leaving PENDING without running still gets `started_at`, so
    /// `started_at` is unset exactly while the job is pending.
    pub fn cancel(&mut self) {
        let now = Utc::now();
        self.started_at.get_or_insert(now);
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(now);
        self.estimated_completion_at = None;
        self.cap_progress();
    }

    /// Raise progress, never lowering it and never reaching 100.
    pub fn advance_progress(&mut self, percent: i32) {
        self.progress_percent = self.progress_percent.max(percent.clamp(0, 99));
    }

    fn cap_progress(&mut self) {
        self.progress_percent = self.progress_percent.min(99);
    }

    /// Wall-clock minutes between start and completion.
    pub fn duration_minutes(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_minutes()),
            _ => None,
        }
    }

    /// Human-readable output size, e.g. `"1.5 MB"`.
    pub fn formatted_output_size(&self) -> String {
        match self.output_size_bytes {
            Some(bytes) => format_size(bytes),
            None => "Unknown".to_string(),
        }
    }
}

fn format_size(bytes: i64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let b = bytes as f64;
    if b < KB {
        format!("{} B", bytes)
    } else if b < MB {
        format!("{:.1} KB", b / KB)
    } else if b < GB {
        format!("{:.1} MB", b / MB)
    } else {
        format!("{:.1} GB", b / GB)
    }
}
