//! Database query modules.
//!
//! - transcoding_jobs: the job record store

pub mod transcoding_jobs;
