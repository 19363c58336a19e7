//! Jiptv-Common: Shared types used by every jiptv crate.
//!
//! - **Typed IDs**: `JobId` (UUID) plus the numeric ids handed to us by the catalog
//! - **Core Types**: job type, job status and track type enums
//! - **Media descriptors**: the source and track shapes collaborators pass in
//! - **Error Handling**: common error type and result alias
//!
//! # Examples
//!
//! ```
//! use jiptv_common::{JobId, JobStatus, JobType, Error, Result};
//!
//! let job_id = JobId::new();
//! assert!(JobStatus::Completed.is_terminal());
//! assert!(JobType::Analysis.priority() < JobType::Segment.priority());
//!
//! fn example() -> Result<()> {
//!     Err(Error::not_found("transcoding_job"))
//! }
//! # let _ = (job_id, example());
//! ```

pub mod error;
pub mod ids;
pub mod media;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use media::{MediaSource, TrackDescriptor};
pub use types::*;
