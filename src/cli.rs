use clap::{Parser, Subcommand};
use jiptv_common::{JobId, JobType};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "jiptv")]
#[command(author, version, about = "Transcoding job orchestration for IPTV sources")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the queue driver and reaper until interrupted
    Start,

    /// Record a job; a running daemon admits it
    Enqueue {
        /// Catalog id of the media source
        source_id: i64,

        /// Source locator (local path or URL)
        input: String,

        /// Job type: analysis, transcode, segment or thumbnail
        #[arg(short = 't', long = "type", default_value = "transcode")]
        job_type: JobType,

        /// Encoder profile name (defaults per job type)
        #[arg(short, long)]
        profile: Option<String>,

        /// JSON file with the selected track descriptors
        #[arg(long)]
        tracks: Option<PathBuf>,

        /// Source duration in seconds, for progress and ETA
        #[arg(long)]
        duration: Option<f64>,

        /// Total frame count, for frame-based progress
        #[arg(long)]
        total_frames: Option<i64>,
    },

    /// Show one job
    Status {
        job_id: JobId,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the jobs of a source
    List {
        source_id: i64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Cancel a pending or running job
    Cancel { job_id: JobId },

    /// Show queue statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the stuck-job and cleanup sweeps once
    Sweep,

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
