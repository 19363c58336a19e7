//! Stuck-job sweep and retention cleanup.
//!
//! A safety net behind the supervisor: it force-cancels jobs that have been
//! RUNNING far longer than any encode should take, and deletes old terminal
//! jobs together with their artifacts.

use std::path::Path;

use chrono::{DateTime, Utc};
use jiptv_common::{JobStatus, JobType, Result};
use jiptv_db::models::TranscodingJob;
use jiptv_db::pool::{get_conn, DbPool};
use jiptv_db::queries::transcoding_jobs;
use tracing::{debug, info, warn};

use super::registry::ActiveJobs;
use crate::config::TranscodingConfig;

pub struct Reaper {
    pool: DbPool,
    active: ActiveJobs,
    stuck_threshold: chrono::Duration,
    retention: chrono::Duration,
}

impl Reaper {
    pub fn new(
        pool: DbPool,
        active: ActiveJobs,
        stuck_threshold: chrono::Duration,
        retention: chrono::Duration,
    ) -> Self {
        Self {
            pool,
            active,
            stuck_threshold,
            retention,
        }
    }

    pub fn from_config(pool: DbPool, active: ActiveJobs, config: &TranscodingConfig) -> Self {
        Self::new(pool, active, config.stuck_threshold(), config.retention())
    }

    /// Cancel RUNNING jobs that started before `now - stuck_threshold` and
    /// kill whatever process is still attached to them.
    pub fn sweep_stuck_jobs(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = get_conn(&self.pool)?;
        let threshold = now - self.stuck_threshold;

        let mut cancelled = 0;
        for mut job in transcoding_jobs::find_stuck_jobs(&conn, threshold)? {
            job.cancel();
            job.error_message = Some(format!(
                "Cancelled after running longer than {} hours",
                self.stuck_threshold.num_hours()
            ));
            if !transcoding_jobs::update_running_job(&conn, &job)? {
                continue;
            }
            warn!(
                job_id = %job.id,
                started_at = ?job.started_at,
                "Force-cancelled stuck job"
            );
            if self.active.kill(job.id) {
                debug!(job_id = %job.id, "Killed supervisor of stuck job");
            }
            cancelled += 1;
        }
        Ok(cancelled)
    }

    /// Delete terminal jobs that finished before `now - retention`, removing
    /// their artifacts first. Artifact errors are logged and skipped, and an
    /// artifact another job still points at is left in place.
    pub fn cleanup_finished_jobs(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = get_conn(&self.pool)?;
        let threshold = now - self.retention;

        let mut deleted = 0;
        for job in transcoding_jobs::find_jobs_for_cleanup(&conn, threshold)? {
            match job.output_locator.as_deref() {
                Some(output)
                    if transcoding_jobs::count_jobs_sharing_output(&conn, output, job.id)? > 0 =>
                {
                    debug!(job_id = %job.id, path = output, "Artifact still referenced, keeping it");
                }
                _ => remove_artifact(&job),
            }
            transcoding_jobs::delete_job(&conn, job.id)?;
            deleted += 1;
        }
        if deleted > 0 {
            info!(deleted, "Cleaned up finished jobs");
        }
        Ok(deleted)
    }

    /// Cancel RUNNING records no live supervisor owns.
    ///
    /// Run once at startup, before the queue driver starts, to release jobs
    /// left behind by a previous process.
    pub fn reclaim_orphaned_jobs(&self) -> Result<usize> {
        let conn = get_conn(&self.pool)?;

        let mut reclaimed = 0;
        for mut job in transcoding_jobs::list_jobs_by_status(&conn, JobStatus::Running)? {
            if self.active.contains(job.id) {
                continue;
            }
            job.cancel();
            job.error_message = Some("Interrupted by service restart".to_string());
            if transcoding_jobs::update_running_job(&conn, &job)? {
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            info!(reclaimed, "Reclaimed orphaned jobs from previous session");
        }
        Ok(reclaimed)
    }
}

fn remove_artifact(job: &TranscodingJob) {
    let Some(output) = job.output_locator.as_deref() else {
        return;
    };
    let output = Path::new(output);

    let (target, result) = match job.job_type {
        // The manifest lives inside its own segment directory.
        JobType::Segment => match output.parent() {
            Some(dir) => (dir, std::fs::remove_dir_all(dir)),
            None => return,
        },
        _ => (output, std::fs::remove_file(output)),
    };

    match result {
        Ok(()) => debug!(job_id = %job.id, path = %target.display(), "Removed artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            job_id = %job.id,
            path = %target.display(),
            error = %e,
            "Failed to remove artifact"
        ),
    }
}
