//! jiptv - transcoding job orchestration
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod transcoding;
