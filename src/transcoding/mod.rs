//! Transcoding job orchestration.
//!
//! - [`JobQueue`] - dedup, admission under the concurrency cap, cancel, statistics
//! - [`Supervisor`] - one task per running encoder process
//! - [`Reaper`] - stuck-job sweep, retention cleanup, startup reclaim
//! - [`spawn_background_tasks`] - the periodic drivers

mod log_buffer;
pub mod queue;
pub mod reaper;
pub mod registry;
pub mod scheduler;
pub mod supervisor;

pub use queue::{JobQueue, QueueStatistics, Submission};
pub use reaper::Reaper;
pub use registry::ActiveJobs;
pub use scheduler::spawn_background_tasks;
pub use supervisor::{apply_progress, Supervisor, SupervisorSettings};
