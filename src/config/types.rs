use jiptv_av::Profile;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub transcoding: TranscodingConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Extra encoder profiles on top of the built-in ones.
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("jiptv.db")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
        }
    }
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscodingConfig {
    /// Root for every artifact the encoder writes.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Wall-clock limit for a single encoder run.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Running jobs older than this are force-cancelled by the reaper.
    #[serde(default = "default_job_timeout_hours")]
    pub job_timeout_hours: u64,

    /// Finished jobs older than this are deleted with their artifacts.
    #[serde(default = "default_cleanup_days")]
    pub cleanup_days: u64,

    #[serde(default = "default_hls_segment_duration")]
    pub hls_segment_duration: u32,

    /// How often a running job's progress and log are written back.
    #[serde(default = "default_log_flush_millis")]
    pub log_flush_millis: u64,

    /// Upper bound of the captured encoder log kept per job.
    #[serde(default = "default_max_log_bytes")]
    pub max_log_bytes: usize,

    #[serde(default = "default_transcode_profile")]
    pub default_transcode_profile: String,

    #[serde(default = "default_segment_profile")]
    pub default_segment_profile: String,

    #[serde(default = "default_thumbnail_profile")]
    pub default_thumbnail_profile: String,
}

impl TranscodingConfig {
    pub fn encoder_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn log_flush_interval(&self) -> Duration {
        Duration::from_millis(self.log_flush_millis)
    }

    pub fn stuck_threshold(&self) -> chrono::Duration {
        chrono::Duration::hours(self.job_timeout_hours as i64)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.cleanup_days as i64)
    }
}

impl Default for TranscodingConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            timeout_secs: default_timeout_secs(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            job_timeout_hours: default_job_timeout_hours(),
            cleanup_days: default_cleanup_days(),
            hls_segment_duration: default_hls_segment_duration(),
            log_flush_millis: default_log_flush_millis(),
            max_log_bytes: default_max_log_bytes(),
            default_transcode_profile: default_transcode_profile(),
            default_segment_profile: default_segment_profile(),
            default_thumbnail_profile: default_thumbnail_profile(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./transcoded")
}

fn default_timeout_secs() -> u64 {
    3600
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_job_timeout_hours() -> u64 {
    4
}

fn default_cleanup_days() -> u64 {
    7
}

fn default_hls_segment_duration() -> u32 {
    6
}

fn default_log_flush_millis() -> u64 {
    2000
}

fn default_max_log_bytes() -> usize {
    1024 * 1024
}

fn default_transcode_profile() -> String {
    jiptv_av::profile::WEBOS_COMPATIBLE.to_string()
}

fn default_segment_profile() -> String {
    jiptv_av::profile::WEBOS_HLS.to_string()
}

fn default_thumbnail_profile() -> String {
    jiptv_av::profile::THUMBNAIL_DEFAULT.to_string()
}

/// Periods of the background drivers.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_queue_poll_secs")]
    pub queue_poll_secs: u64,

    #[serde(default = "default_stuck_sweep_secs")]
    pub stuck_sweep_secs: u64,

    #[serde(default = "default_cleanup_interval_hours")]
    pub cleanup_interval_hours: u64,
}

impl ScheduleConfig {
    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_secs(self.queue_poll_secs)
    }

    pub fn stuck_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.stuck_sweep_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_hours * 3600)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            queue_poll_secs: default_queue_poll_secs(),
            stuck_sweep_secs: default_stuck_sweep_secs(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
        }
    }
}

fn default_queue_poll_secs() -> u64 {
    60
}

fn default_stuck_sweep_secs() -> u64 {
    300
}

fn default_cleanup_interval_hours() -> u64 {
    24
}
