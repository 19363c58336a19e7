//! # jiptv-av
//!
//! The encoder-facing half of jiptv, free of any storage or process handling:
//!
//! - [`CommandBuilder`] turns a job description into an [`Invocation`]
//! - [`ProfileRegistry`] resolves opaque profile names into encoder settings
//! - [`progress`] extracts frame/time/speed samples from encoder log lines
//! - [`tools`] checks that the external executables exist
//!
//! ## Example
//!
//! ```
//! use jiptv_av::{BuildRequest, CommandBuilder, ProfileRegistry, ToolPaths};
//! use jiptv_common::{JobType, SourceId, TrackDescriptor, TrackType};
//!
//! let builder = CommandBuilder::new(
//!     ToolPaths::default(),
//!     "/srv/jiptv",
//!     ProfileRegistry::with_builtins(),
//! );
//! let tracks = vec![TrackDescriptor::new(1, 5, 0, TrackType::Video)];
//! let invocation = builder.build(&BuildRequest {
//!     job_type: JobType::Transcode,
//!     source_id: SourceId::from(5),
//!     input: "/media/in.mkv",
//!     tracks: &tracks,
//!     profile: Some("WebOS_Compatible"),
//! })?;
//! assert!(invocation.args.contains(&"libx264".to_string()));
//! # Ok::<(), jiptv_av::Error>(())
//! ```

pub mod command;
mod error;
pub mod profile;
pub mod progress;
pub mod tools;

pub use command::{decode_tracks, encode_tracks, BuildRequest, CommandBuilder, Invocation, ToolPaths};
pub use error::{Error, Result};
pub use profile::{Profile, ProfileRegistry, SegmentProfile, ThumbnailProfile, TranscodeProfile};
pub use progress::ProgressSample;
pub use tools::{check_tool, check_tools, require_tool, ToolInfo};
