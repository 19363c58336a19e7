//! Admission queue.
//!
//! Deduplicates requests per (source, job type), records new jobs as PENDING
//! and admits them to the supervisor in priority order without exceeding the
//! concurrency cap. The dedup check shares one store transaction with its
//! insert. A job never starts while another for the same pair is running.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use jiptv_av::{decode_tracks, encode_tracks, BuildRequest, CommandBuilder, Invocation};
use jiptv_common::{Error, JobId, JobStatus, JobType, MediaSource, Result, SourceId, TrackDescriptor};
use jiptv_db::models::{NewJob, TranscodingJob};
use jiptv_db::pool::{get_conn, DbPool};
use jiptv_db::queries::transcoding_jobs::{self, Insertion};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::ActiveJobs;
use super::supervisor::{Supervisor, SupervisorSettings};
use crate::config::{self, Config, TranscodingConfig};

/// Result of recording a request.
#[derive(Debug, Clone)]
pub enum Submission {
    /// A new PENDING job was created.
    Created(TranscodingJob),
    /// A PENDING or RUNNING job for the same source and type already existed.
    Existing(TranscodingJob),
}

impl Submission {
    pub fn job(&self) -> &TranscodingJob {
        match self {
            Submission::Created(job) | Submission::Existing(job) => job,
        }
    }

    pub fn into_job(self) -> TranscodingJob {
        match self {
            Submission::Created(job) | Submission::Existing(job) => job,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Submission::Created(_))
    }
}

/// Snapshot of queue state.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatistics {
    pub pending_count: i64,
    pub running_count: i64,
    pub concurrency_cap: usize,
    pub average_duration_minutes: Option<f64>,
    pub counts_by_status: BTreeMap<JobStatus, i64>,
    pub counts_by_type: BTreeMap<JobType, i64>,
    pub counts_by_profile: BTreeMap<String, i64>,
}

impl QueueStatistics {
    pub fn at_capacity(&self) -> bool {
        self.running_count >= self.concurrency_cap as i64
    }

    pub fn available_slots(&self) -> usize {
        self.concurrency_cap
            .saturating_sub(usize::try_from(self.running_count).unwrap_or(usize::MAX))
    }
}

#[derive(Debug, Clone)]
struct DefaultProfiles {
    transcode: String,
    segment: String,
    thumbnail: String,
}

impl DefaultProfiles {
    fn from_config(config: &TranscodingConfig) -> Self {
        Self {
            transcode: config.default_transcode_profile.clone(),
            segment: config.default_segment_profile.clone(),
            thumbnail: config.default_thumbnail_profile.clone(),
        }
    }

    fn for_type(&self, job_type: JobType) -> Option<&str> {
        match job_type {
            JobType::Analysis => None,
            JobType::Transcode => Some(&self.transcode),
            JobType::Segment => Some(&self.segment),
            JobType::Thumbnail => Some(&self.thumbnail),
        }
    }
}

/// The transcoding job service.
pub struct JobQueue {
    pool: DbPool,
    builder: CommandBuilder,
    supervisor: Supervisor,
    defaults: DefaultProfiles,
    max_concurrent: usize,
    admission: Mutex<()>,
}

impl JobQueue {
    /// Build the queue on the current tokio runtime.
    ///
    /// Supervisors are children of `shutdown`; cancelling it stops every
    /// running encoder.
    pub fn new(pool: DbPool, config: &Config, shutdown: CancellationToken) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::internal(format!("Job queue requires a tokio runtime: {}", e)))?;

        let supervisor = Supervisor::new(
            pool.clone(),
            SupervisorSettings::from_config(&config.transcoding),
            shutdown,
            runtime,
        );

        Ok(Self {
            pool,
            builder: config::command_builder(config),
            supervisor,
            defaults: DefaultProfiles::from_config(&config.transcoding),
            max_concurrent: config.transcoding.max_concurrent_jobs.max(1),
            admission: Mutex::new(()),
        })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn active_jobs(&self) -> &ActiveJobs {
        self.supervisor.active_jobs()
    }

    /// Notified whenever a supervised job ends and capacity frees up.
    pub fn finished_signal(&self) -> Arc<Notify> {
        self.supervisor.finished_signal()
    }

    /// Record a request and try to admit it right away.
    ///
    /// Idempotent per (source, job type): while a job for the pair is PENDING
    /// or RUNNING it is returned unchanged and nothing new is created.
    pub fn enqueue(
        &self,
        source: &MediaSource,
        job_type: JobType,
        tracks: &[TrackDescriptor],
        profile: Option<&str>,
    ) -> Result<TranscodingJob> {
        let job = match self.submit(source, job_type, tracks, profile)? {
            Submission::Existing(job) => return Ok(job),
            Submission::Created(job) => job,
        };

        self.try_advance()?;

        let conn = get_conn(&self.pool)?;
        Ok(transcoding_jobs::find_job(&conn, job.id)?.unwrap_or(job))
    }

    /// Record a request without admitting anything.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when a track belongs to a different source or the
    /// locator is empty, `NotFound` when a local source path does not exist.
    pub fn submit(
        &self,
        source: &MediaSource,
        job_type: JobType,
        tracks: &[TrackDescriptor],
        profile: Option<&str>,
    ) -> Result<Submission> {
        validate_source(source, tracks)?;

        let profile = profile
            .or_else(|| self.defaults.for_type(job_type))
            .map(str::to_string);
        let target_tracks = if tracks.is_empty() {
            None
        } else {
            Some(encode_tracks(tracks)?)
        };

        let mut new = NewJob::new(source.id, job_type, source.locator.clone());
        new.profile = profile;
        new.target_tracks = target_tracks;
        new.total_frames = source.total_frames;
        new.source_duration_secs = source.duration_secs;

        let _admission = self.admission.lock();
        let mut conn = get_conn(&self.pool)?;

        let job = match transcoding_jobs::create_job_unless_active(&mut conn, &new)? {
            Insertion::Existing(existing) => {
                debug!(
                    job_id = %existing.id,
                    source_id = %source.id,
                    job_type = %job_type,
                    "Returning existing job"
                );
                return Ok(Submission::Existing(existing));
            }
            Insertion::Created(job) => job,
        };
        info!(
            job_id = %job.id,
            source_id = %source.id,
            job_type = %job_type,
            profile = job.profile.as_deref().unwrap_or("-"),
            "Queued job"
        );
        Ok(Submission::Created(job))
    }

    /// Admit at most one PENDING job.
    ///
    /// Returns the admitted job, or `None` when the cap is reached or nothing
    /// could be started. Candidates whose invocation cannot be built are
    /// failed on the spot and skipped.
    pub fn try_advance(&self) -> Result<Option<TranscodingJob>> {
        let _admission = self.admission.lock();
        let conn = get_conn(&self.pool)?;

        let running = transcoding_jobs::count_by_status(&conn, JobStatus::Running)?;
        if running >= self.max_concurrent as i64 {
            debug!(running, cap = self.max_concurrent, "At capacity");
            return Ok(None);
        }

        for job in transcoding_jobs::list_pending_jobs(&conn)? {
            if transcoding_jobs::has_running_job(&conn, job.source_id, job.job_type)? {
                debug!(
                    job_id = %job.id,
                    source_id = %job.source_id,
                    job_type = %job.job_type,
                    "Pair already running, leaving job pending"
                );
                continue;
            }
            match self.prepare(&job) {
                Ok(invocation) => {
                    if let Some(started) = self.supervisor.launch(&conn, job, invocation)? {
                        return Ok(Some(started));
                    }
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Cannot build encoder command");
                    let mut failed = job;
                    failed.fail(e.to_string());
                    transcoding_jobs::update_job_if_status(&conn, &failed, JobStatus::Pending)?;
                }
            }
        }

        Ok(None)
    }

    /// Admit jobs until the cap is reached or the queue is empty.
    pub fn advance_all(&self) -> Result<usize> {
        let mut admitted = 0;
        while self.try_advance()?.is_some() {
            admitted += 1;
        }
        if admitted > 0 {
            debug!(admitted, "Advanced queue");
        }
        Ok(admitted)
    }

    fn prepare(&self, job: &TranscodingJob) -> jiptv_av::Result<Invocation> {
        let tracks = decode_tracks(job.target_tracks.as_deref())?;
        self.builder.build(&BuildRequest {
            job_type: job.job_type,
            source_id: job.source_id,
            input: &job.input_locator,
            tracks: &tracks,
            profile: job.profile.as_deref(),
        })
    }

    /// Cancel a job. Terminal jobs are returned as they are.
    ///
    /// A running job's supervisor is signalled and stops its encoder.
    pub fn cancel(&self, id: JobId) -> Result<TranscodingJob> {
        let conn = get_conn(&self.pool)?;

        // Statuses only move forward, so this settles within two rounds.
        loop {
            let mut job = transcoding_jobs::get_job(&conn, id)?;
            if job.is_terminal() {
                return Ok(job);
            }

            let previous = job.status;
            job.cancel();
            if transcoding_jobs::update_job_if_status(&conn, &job, previous)? {
                if previous == JobStatus::Running {
                    self.active_jobs().signal(id);
                }
                info!(job_id = %id, was = %previous, "Cancelled job");
                return Ok(job);
            }
        }
    }

    /// Cancel every non-terminal job of a source. Returns how many were cancelled.
    pub fn cancel_jobs_for_source(&self, source_id: SourceId) -> Result<usize> {
        let candidates = self
            .list_jobs_for_source(source_id)?
            .into_iter()
            .filter(|job| !job.is_terminal());

        let mut cancelled = 0;
        for job in candidates {
            match self.cancel(job.id) {
                Ok(after) if after.status == JobStatus::Cancelled => cancelled += 1,
                Ok(_) => {}
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(cancelled)
    }

    pub fn get_job(&self, id: JobId) -> Result<TranscodingJob> {
        let conn = get_conn(&self.pool)?;
        transcoding_jobs::get_job(&conn, id)
    }

    /// All jobs of a source, newest first.
    pub fn list_jobs_for_source(&self, source_id: SourceId) -> Result<Vec<TranscodingJob>> {
        let conn = get_conn(&self.pool)?;
        transcoding_jobs::list_jobs_for_source(&conn, source_id)
    }

    pub fn statistics(&self) -> Result<QueueStatistics> {
        let conn = get_conn(&self.pool)?;

        let mut counts_by_status: BTreeMap<JobStatus, i64> =
            JobStatus::ALL.iter().map(|s| (*s, 0)).collect();
        counts_by_status.extend(transcoding_jobs::counts_by_status(&conn)?);

        let mut counts_by_type: BTreeMap<JobType, i64> =
            JobType::BY_PRIORITY.iter().map(|t| (*t, 0)).collect();
        counts_by_type.extend(transcoding_jobs::counts_by_type(&conn)?);

        Ok(QueueStatistics {
            pending_count: counts_by_status.get(&JobStatus::Pending).copied().unwrap_or(0),
            running_count: counts_by_status.get(&JobStatus::Running).copied().unwrap_or(0),
            concurrency_cap: self.max_concurrent,
            average_duration_minutes: transcoding_jobs::average_duration_minutes(&conn)?,
            counts_by_status,
            counts_by_type,
            counts_by_profile: transcoding_jobs::counts_by_profile(&conn)?.into_iter().collect(),
        })
    }
}

fn validate_source(source: &MediaSource, tracks: &[TrackDescriptor]) -> Result<()> {
    if source.locator.trim().is_empty() {
        return Err(Error::invalid_input("source locator is empty"));
    }
    if let Some(track) = tracks.iter().find(|t| t.source_id != source.id) {
        return Err(Error::invalid_input(format!(
            "track {} belongs to source {}, not {}",
            track.id, track.source_id, source.id
        )));
    }
    if !source.is_remote() && !Path::new(&source.locator).exists() {
        return Err(Error::not_found(format!("source file {}", source.locator)));
    }
    Ok(())
}
