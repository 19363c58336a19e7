//! Error types for jiptv-av.

use jiptv_common::JobType;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while preparing an encoder run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required external tool is not available.
    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    /// The job names a profile nobody registered.
    #[error("unknown profile: {name}")]
    UnknownProfile { name: String },

    /// The profile exists but is meant for another kind of job.
    #[error("profile {name} is a {kind} profile and cannot drive a {job_type} job")]
    ProfileMismatch {
        name: String,
        kind: &'static str,
        job_type: JobType,
    },

    /// The job type needs a profile and none was given.
    #[error("{job_type} jobs require a profile")]
    MissingProfile { job_type: JobType },

    /// The track selection has nothing the job type can work on.
    #[error("{job_type} jobs require at least one video or audio track")]
    NoTracks { job_type: JobType },

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// JSON encoding or decoding of a track selection failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a tool not found error.
    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound { tool: tool.into() }
    }

    /// Create an unknown profile error.
    pub fn unknown_profile(name: impl Into<String>) -> Self {
        Self::UnknownProfile { name: name.into() }
    }
}

impl From<Error> for jiptv_common::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::ToolNotFound { .. } => jiptv_common::Error::not_found(err.to_string()),
            Error::InvalidInput(msg) => jiptv_common::Error::invalid_input(msg),
            other => jiptv_common::Error::build(other.to_string()),
        }
    }
}
