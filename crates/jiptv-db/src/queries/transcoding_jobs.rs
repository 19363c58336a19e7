//! Transcoding job query operations.
//!
//! Free functions over a borrowed connection. Writes are last-writer-wins except
//! the guarded ones: [`update_running_job`] only lands while the stored row is
//! still running and is how the supervisor notices that someone else ended its
//! job; [`create_job_unless_active`] and [`start_job`] keep a (source, job type)
//! pair to one active record and one running encoder across processes.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use jiptv_common::{Error, JobId, JobStatus, JobType, Result, SourceId};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::models::{NewJob, TranscodingJob};

const JOB_COLUMNS: &str = "id, source_id, job_type, status, input_locator, output_locator, profile,
     target_tracks, encoder_command, progress_percent, current_frame, total_frames,
     source_duration_secs, processing_speed, started_at, completed_at, estimated_completion_at,
     output_size_bytes, error_message, encoder_log, created_at, updated_at";

const UPDATE_JOB: &str = "UPDATE transcoding_jobs SET
        status = ?2, output_locator = ?3, profile = ?4, target_tracks = ?5,
        encoder_command = ?6, progress_percent = ?7, current_frame = ?8, total_frames = ?9,
        processing_speed = ?10, started_at = ?11, completed_at = ?12,
        estimated_completion_at = ?13, output_size_bytes = ?14, error_message = ?15,
        encoder_log = ?16, updated_at = ?17
     WHERE id = ?1";

const PRIORITY_ORDER: &str = "CASE job_type
        WHEN 'analysis' THEN 1
        WHEN 'thumbnail' THEN 2
        WHEN 'transcode' THEN 3
        WHEN 'segment' THEN 4
        ELSE 5
     END";

/// Format a timestamp the way it is stored. Fixed width keeps string order chronological.
pub fn to_db_time(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(column: &str, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e))
}

fn conversion_error<E>(column: &str, e: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let err: Box<dyn std::error::Error + Send + Sync> =
        format!("column {}: {}", column, e.into()).into();
    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, err)
}

fn opt_time(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(column)?
        .map(|s| parse_time(column, &s))
        .transpose()
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<TranscodingJob> {
    let id: String = row.get("id")?;
    let job_type: String = row.get("job_type")?;
    let status: String = row.get("status")?;

    Ok(TranscodingJob {
        id: id.parse().map_err(|e| conversion_error("id", e))?,
        source_id: SourceId::from(row.get::<_, i64>("source_id")?),
        job_type: job_type
            .parse::<JobType>()
            .map_err(|e| conversion_error("job_type", e))?,
        status: status
            .parse::<JobStatus>()
            .map_err(|e| conversion_error("status", e))?,
        input_locator: row.get("input_locator")?,
        output_locator: row.get("output_locator")?,
        profile: row.get("profile")?,
        target_tracks: row.get("target_tracks")?,
        encoder_command: row.get("encoder_command")?,
        progress_percent: row.get("progress_percent")?,
        current_frame: row.get("current_frame")?,
        total_frames: row.get("total_frames")?,
        source_duration_secs: row.get("source_duration_secs")?,
        processing_speed: row.get("processing_speed")?,
        started_at: opt_time(row, "started_at")?,
        completed_at: opt_time(row, "completed_at")?,
        estimated_completion_at: opt_time(row, "estimated_completion_at")?,
        output_size_bytes: row.get("output_size_bytes")?,
        error_message: row.get("error_message")?,
        encoder_log: row.get("encoder_log")?,
        created_at: parse_time("created_at", &row.get::<_, String>("created_at")?)?,
        updated_at: parse_time("updated_at", &row.get::<_, String>("updated_at")?)?,
    })
}

fn query_jobs(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<TranscodingJob>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| Error::database(e.to_string()))?;

    let jobs = stmt
        .query_map(params, row_to_job)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(jobs)
}

/// Record a new job in PENDING.
pub fn create_job(conn: &Connection, new: &NewJob) -> Result<TranscodingJob> {
    let id = JobId::new();
    // Stored precision, so the returned record equals what a later read yields.
    let now = Utc::now().trunc_subsecs(6);

    conn.execute(
        "INSERT INTO transcoding_jobs (id, source_id, job_type, status, input_locator, profile,
                target_tracks, progress_percent, total_frames, source_duration_secs,
                created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?)",
        params![
            id.to_string(),
            new.source_id.get(),
            new.job_type.to_string(),
            JobStatus::Pending.to_string(),
            &new.input_locator,
            &new.profile,
            &new.target_tracks,
            new.total_frames,
            new.source_duration_secs,
            to_db_time(now),
            to_db_time(now),
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(TranscodingJob {
        id,
        source_id: new.source_id,
        job_type: new.job_type,
        status: JobStatus::Pending,
        input_locator: new.input_locator.clone(),
        output_locator: None,
        profile: new.profile.clone(),
        target_tracks: new.target_tracks.clone(),
        encoder_command: None,
        progress_percent: 0,
        current_frame: None,
        total_frames: new.total_frames,
        source_duration_secs: new.source_duration_secs,
        processing_speed: None,
        started_at: None,
        completed_at: None,
        estimated_completion_at: None,
        output_size_bytes: None,
        error_message: None,
        encoder_log: None,
        created_at: now,
        updated_at: now,
    })
}

/// Get a job by ID.
pub fn get_job(conn: &Connection, id: JobId) -> Result<TranscodingJob> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM transcoding_jobs WHERE id = ?"),
        [id.to_string()],
        row_to_job,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Error::not_found("transcoding_job"),
        _ => Error::database(e.to_string()),
    })
}

/// Get a job by ID, `None` when it does not exist.
pub fn find_job(conn: &Connection, id: JobId) -> Result<Option<TranscodingJob>> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM transcoding_jobs WHERE id = ?"),
        [id.to_string()],
        row_to_job,
    )
    .optional()
    .map_err(|e| Error::database(e.to_string()))
}

fn write_job(conn: &Connection, sql: &str, job: &TranscodingJob) -> Result<usize> {
    conn.execute(
        sql,
        params![
            job.id.to_string(),
            job.status.to_string(),
            &job.output_locator,
            &job.profile,
            &job.target_tracks,
            &job.encoder_command,
            job.progress_percent,
            job.current_frame,
            job.total_frames,
            &job.processing_speed,
            job.started_at.map(to_db_time),
            job.completed_at.map(to_db_time),
            job.estimated_completion_at.map(to_db_time),
            job.output_size_bytes,
            &job.error_message,
            &job.encoder_log,
            to_db_time(Utc::now()),
        ],
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Persist every mutable field of `job`.
pub fn update_job(conn: &Connection, job: &TranscodingJob) -> Result<()> {
    let rows = write_job(conn, UPDATE_JOB, job)?;
    if rows == 0 {
        return Err(Error::not_found("transcoding_job"));
    }
    Ok(())
}

/// Persist `job` only if the stored row still has status `expected`.
///
/// Returns `false`, writing nothing, when another writer moved the row on
/// (or deleted it) since it was read.
pub fn update_job_if_status(
    conn: &Connection,
    job: &TranscodingJob,
    expected: JobStatus,
) -> Result<bool> {
    let sql = format!("{UPDATE_JOB} AND status = '{expected}'");
    Ok(write_job(conn, &sql, job)? > 0)
}

/// Persist `job` only if the stored row is still running.
pub fn update_running_job(conn: &Connection, job: &TranscodingJob) -> Result<bool> {
    update_job_if_status(conn, job, JobStatus::Running)
}

/// Replace only the captured encoder log.
pub fn set_job_log(conn: &Connection, id: JobId, log: &str) -> Result<()> {
    conn.execute(
        "UPDATE transcoding_jobs SET encoder_log = ?, updated_at = ? WHERE id = ?",
        params![log, to_db_time(Utc::now()), id.to_string()],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Non-terminal jobs of one type for a source, newest first.
pub fn find_active_jobs(
    conn: &Connection,
    source_id: SourceId,
    job_type: JobType,
) -> Result<Vec<TranscodingJob>> {
    query_jobs(
        conn,
        &format!(
            "SELECT {JOB_COLUMNS} FROM transcoding_jobs
             WHERE source_id = ? AND job_type = ? AND status IN ('pending', 'running')
             ORDER BY created_at DESC, rowid DESC"
        ),
        params![source_id.get(), job_type.to_string()],
    )
}

/// Result of [`create_job_unless_active`].
#[derive(Debug, Clone, PartialEq)]
pub enum Insertion {
    Created(TranscodingJob),
    /// A PENDING or RUNNING job for the pair already existed.
    Existing(TranscodingJob),
}

/// Record `new` unless a PENDING or RUNNING job for its (source, job type)
/// already exists.
///
/// The check and the insert share one `BEGIN IMMEDIATE` transaction, so
/// submitters in different processes cannot both insert.
pub fn create_job_unless_active(conn: &mut Connection, new: &NewJob) -> Result<Insertion> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| Error::database(e.to_string()))?;

    let insertion = match find_active_jobs(&tx, new.source_id, new.job_type)?
        .into_iter()
        .next()
    {
        Some(existing) => Insertion::Existing(existing),
        None => Insertion::Created(create_job(&tx, new)?),
    };

    tx.commit().map_err(|e| Error::database(e.to_string()))?;
    Ok(insertion)
}

/// Persist a PENDING -> RUNNING transition.
///
/// Lands only while the row is still pending and no other job for the same
/// (source, job type) is running. One statement, so the check cannot race.
pub fn start_job(conn: &Connection, job: &TranscodingJob) -> Result<bool> {
    let sql = format!(
        "{UPDATE_JOB} AND status = 'pending' AND NOT EXISTS (
             SELECT 1 FROM transcoding_jobs AS other
             WHERE other.source_id = {} AND other.job_type = '{}' AND other.status = 'running'
         )",
        job.source_id.get(),
        job.job_type
    );
    Ok(write_job(conn, &sql, job)? > 0)
}

/// Whether a job for the pair is currently running.
pub fn has_running_job(conn: &Connection, source_id: SourceId, job_type: JobType) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM transcoding_jobs
                        WHERE source_id = ? AND job_type = ? AND status = 'running')",
        params![source_id.get(), job_type.to_string()],
        |row| row.get(0),
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// How many jobs other than `id` point at `output_locator`.
pub fn count_jobs_sharing_output(conn: &Connection, output_locator: &str, id: JobId) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM transcoding_jobs WHERE output_locator = ? AND id != ?",
        params![output_locator, id.to_string()],
        |row| row.get(0),
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Running jobs that started before `threshold`.
pub fn find_stuck_jobs(conn: &Connection, threshold: DateTime<Utc>) -> Result<Vec<TranscodingJob>> {
    query_jobs(
        conn,
        &format!(
            "SELECT {JOB_COLUMNS} FROM transcoding_jobs
             WHERE status = 'running' AND started_at < ?
             ORDER BY started_at ASC"
        ),
        [to_db_time(threshold)],
    )
}

/// Terminal jobs that finished before `threshold`.
pub fn find_jobs_for_cleanup(
    conn: &Connection,
    threshold: DateTime<Utc>,
) -> Result<Vec<TranscodingJob>> {
    query_jobs(
        conn,
        &format!(
            "SELECT {JOB_COLUMNS} FROM transcoding_jobs
             WHERE status IN ('completed', 'failed', 'cancelled') AND completed_at < ?
             ORDER BY completed_at ASC"
        ),
        [to_db_time(threshold)],
    )
}

/// Pending jobs in admission order: job-type priority, then age.
pub fn list_pending_jobs(conn: &Connection) -> Result<Vec<TranscodingJob>> {
    query_jobs(
        conn,
        &format!(
            "SELECT {JOB_COLUMNS} FROM transcoding_jobs
             WHERE status = 'pending'
             ORDER BY {PRIORITY_ORDER}, created_at ASC, rowid ASC"
        ),
        [],
    )
}

/// All jobs for a source, newest first.
pub fn list_jobs_for_source(conn: &Connection, source_id: SourceId) -> Result<Vec<TranscodingJob>> {
    query_jobs(
        conn,
        &format!(
            "SELECT {JOB_COLUMNS} FROM transcoding_jobs
             WHERE source_id = ?
             ORDER BY created_at DESC, rowid DESC"
        ),
        [source_id.get()],
    )
}

/// All jobs with the given status, oldest first.
pub fn list_jobs_by_status(conn: &Connection, status: JobStatus) -> Result<Vec<TranscodingJob>> {
    query_jobs(
        conn,
        &format!(
            "SELECT {JOB_COLUMNS} FROM transcoding_jobs
             WHERE status = ?
             ORDER BY created_at ASC, rowid ASC"
        ),
        [status.to_string()],
    )
}

pub fn count_by_status(conn: &Connection, status: JobStatus) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM transcoding_jobs WHERE status = ?",
        [status.to_string()],
        |row| row.get(0),
    )
    .map_err(|e| Error::database(e.to_string()))
}

fn grouped_counts(conn: &Connection, sql: &str) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| Error::database(e.to_string()))?;

    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(rows)
}

/// Job counts per status. Statuses without jobs are absent.
pub fn counts_by_status(conn: &Connection) -> Result<Vec<(JobStatus, i64)>> {
    grouped_counts(
        conn,
        "SELECT status, COUNT(*) FROM transcoding_jobs GROUP BY status ORDER BY status",
    )?
    .into_iter()
    .map(|(status, count)| {
        status
            .parse::<JobStatus>()
            .map(|s| (s, count))
            .map_err(Error::database)
    })
    .collect()
}

/// Job counts per job type. Types without jobs are absent.
pub fn counts_by_type(conn: &Connection) -> Result<Vec<(JobType, i64)>> {
    grouped_counts(
        conn,
        "SELECT job_type, COUNT(*) FROM transcoding_jobs GROUP BY job_type ORDER BY job_type",
    )?
    .into_iter()
    .map(|(job_type, count)| {
        job_type
            .parse::<JobType>()
            .map(|t| (t, count))
            .map_err(Error::database)
    })
    .collect()
}

/// Job counts per profile name, ignoring jobs without a profile.
pub fn counts_by_profile(conn: &Connection) -> Result<Vec<(String, i64)>> {
    grouped_counts(
        conn,
        "SELECT profile, COUNT(*) FROM transcoding_jobs
         WHERE profile IS NOT NULL
         GROUP BY profile ORDER BY profile",
    )
}

/// Mean run time of completed jobs, in minutes.
pub fn average_duration_minutes(conn: &Connection) -> Result<Option<f64>> {
    conn.query_row(
        "SELECT AVG((julianday(completed_at) - julianday(started_at)) * 1440.0)
         FROM transcoding_jobs
         WHERE status = 'completed' AND started_at IS NOT NULL AND completed_at IS NOT NULL",
        [],
        |row| row.get(0),
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Delete a job record.
pub fn delete_job(conn: &Connection, id: JobId) -> Result<()> {
    let rows = conn
        .execute("DELETE FROM transcoding_jobs WHERE id = ?", [id.to_string()])
        .map_err(|e| Error::database(e.to_string()))?;

    if rows == 0 {
        return Err(Error::not_found("transcoding_job"));
    }
    Ok(())
}
