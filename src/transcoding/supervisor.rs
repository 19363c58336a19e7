//! Process supervisor: one task per running job.
//!
//! A supervisor owns its job record from admission until the terminal write.
//! It spawns the encoder in its own process group, streams merged
//! stdout/stderr through the progress parser into a bounded log, flushes
//! progress at a fixed cadence and enforces the wall-clock timeout.
//!
//! Every write goes through [`transcoding_jobs::update_running_job`]. A write
//! that finds the row no longer RUNNING means someone else (an external
//! cancel, the reaper) ended the job; the supervisor kills the encoder and
//! leaves that status in place.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jiptv_av::progress::{eta, parse_speed, percent_from_elapsed, percent_from_frames};
use jiptv_av::{Invocation, ProgressSample};
use jiptv_common::{JobType, Result};
use jiptv_db::models::TranscodingJob;
use jiptv_db::pool::{get_conn, DbPool};
use jiptv_db::queries::transcoding_jobs;
use rusqlite::Connection;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::log_buffer::LogBuffer;
use super::registry::{kill_process_group, ActiveJobs};
use crate::config::TranscodingConfig;

const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Tunables for a supervised run.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub timeout: Duration,
    pub flush_interval: Duration,
    pub max_log_bytes: usize,
}

impl SupervisorSettings {
    pub fn from_config(config: &TranscodingConfig) -> Self {
        Self {
            timeout: config.encoder_timeout(),
            flush_interval: config.log_flush_interval(),
            max_log_bytes: config.max_log_bytes,
        }
    }
}

/// Starts and tracks encoder runs.
#[derive(Clone)]
pub struct Supervisor {
    pool: DbPool,
    active: ActiveJobs,
    settings: SupervisorSettings,
    finished: Arc<Notify>,
    shutdown: CancellationToken,
    runtime: Handle,
}

impl Supervisor {
    pub fn new(
        pool: DbPool,
        settings: SupervisorSettings,
        shutdown: CancellationToken,
        runtime: Handle,
    ) -> Self {
        Self {
            pool,
            active: ActiveJobs::new(),
            settings,
            finished: Arc::new(Notify::new()),
            shutdown,
            runtime,
        }
    }

    pub fn active_jobs(&self) -> &ActiveJobs {
        &self.active
    }

    /// Woken every time a supervised run ends.
    pub fn finished_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.finished)
    }

    /// Mark `job` RUNNING and start supervising it.
    ///
    /// Returns `Ok(None)` without spawning anything if the job left PENDING
    /// since it was read, or another job for its pair is already running.
    pub fn launch(
        &self,
        conn: &Connection,
        mut job: TranscodingJob,
        invocation: Invocation,
    ) -> Result<Option<TranscodingJob>> {
        job.start();
        job.output_locator = Some(invocation.output.to_string_lossy().into_owned());
        job.encoder_command = Some(invocation.command_line());

        if !transcoding_jobs::start_job(conn, &job)? {
            debug!(job_id = %job.id, "Job not startable, left PENDING or pair already running");
            return Ok(None);
        }

        let token = self.active.register(job.id, &self.shutdown);
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            source_id = %job.source_id,
            "Starting encoder: {}",
            invocation.command_line()
        );

        let run = JobRun {
            pool: self.pool.clone(),
            active: self.active.clone(),
            settings: self.settings.clone(),
            job: job.clone(),
            invocation,
            token,
        };
        let finished = Arc::clone(&self.finished);
        self.runtime.spawn(async move {
            run.run().await;
            finished.notify_one();
        });

        Ok(Some(job))
    }
}

/// How an encoder run ended.
#[derive(Debug)]
enum Outcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
    SpawnFailed(String),
    Io(String),
}

enum Waited {
    Cancelled,
    TimedOut,
    Exited(std::io::Result<ExitStatus>),
}

struct JobRun {
    pool: DbPool,
    active: ActiveJobs,
    settings: SupervisorSettings,
    job: TranscodingJob,
    invocation: Invocation,
    token: CancellationToken,
}

impl JobRun {
    async fn run(mut self) {
        let id = self.job.id;
        let mut log = LogBuffer::new(self.settings.max_log_bytes);

        let outcome = self.execute(&mut log).await;
        self.finish(outcome, &log);

        self.active.remove(id);
    }

    async fn execute(&mut self, log: &mut LogBuffer) -> Outcome {
        let deadline = Instant::now() + self.settings.timeout;

        if let Some(parent) = self.invocation.output.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Outcome::Io(format!(
                    "Failed to create output directory {}: {}",
                    parent.display(),
                    e
                ));
            }
        }

        let mut command = Command::new(&self.invocation.program);
        command
            .args(&self.invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Outcome::SpawnFailed(format!(
                    "Failed to start encoder {}: {}",
                    self.invocation.program.display(),
                    e
                ))
            }
        };
        if let Some(pid) = child.id() {
            self.active.set_pid(self.job.id, pid);
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, tx.clone());
        }
        drop(tx);

        let token = self.token.clone();
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        let mut ticker =
            tokio::time::interval(self.settings.flush_interval.max(MIN_FLUSH_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        let mut dirty = false;

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    terminate(&mut child).await;
                    return Outcome::Cancelled;
                }
                _ = &mut sleep => {
                    terminate(&mut child).await;
                    return Outcome::TimedOut;
                }
                _ = ticker.tick(), if dirty => {
                    dirty = false;
                    if !self.flush(log) {
                        debug!(job_id = %self.job.id, "Job no longer running, stopping encoder");
                        terminate(&mut child).await;
                        return Outcome::Cancelled;
                    }
                }
                line = rx.recv() => match line {
                    Some(line) => {
                        self.observe(&line, log);
                        dirty = true;
                    }
                    None => break,
                },
            }
        }

        let waited = tokio::select! {
            biased;

            _ = token.cancelled() => Waited::Cancelled,
            _ = &mut sleep => Waited::TimedOut,
            status = child.wait() => Waited::Exited(status),
        };

        match waited {
            Waited::Cancelled => {
                terminate(&mut child).await;
                Outcome::Cancelled
            }
            Waited::TimedOut => {
                terminate(&mut child).await;
                Outcome::TimedOut
            }
            Waited::Exited(Ok(status)) => Outcome::Exited(status),
            Waited::Exited(Err(e)) => Outcome::Io(format!("Failed to wait for encoder: {}", e)),
        }
    }

    fn observe(&mut self, line: &str, log: &mut LogBuffer) {
        log.push(line);
        let sample = ProgressSample::parse(line);
        if !sample.is_empty() {
            apply_progress(&mut self.job, &sample, Utc::now());
        }
    }

    /// Write progress and the log so far. Returns `false` once the stored job
    /// is no longer RUNNING.
    fn flush(&mut self, log: &LogBuffer) -> bool {
        self.job.encoder_log = Some(log.render());
        let written = get_conn(&self.pool)
            .and_then(|conn| transcoding_jobs::update_running_job(&conn, &self.job));
        match written {
            Ok(still_running) => still_running,
            Err(e) => {
                // Transient store errors must not kill a healthy encode.
                warn!(job_id = %self.job.id, error = %e, "Failed to flush job progress");
                true
            }
        }
    }

    fn finish(&mut self, outcome: Outcome, log: &LogBuffer) {
        let id = self.job.id;
        match outcome {
            Outcome::Exited(status) if status.success() => {
                let size = output_size(self.job.job_type, &self.invocation.output);
                self.job.complete(size);
                info!(job_id = %id, output_size = ?size, "Encoder finished");
            }
            Outcome::Exited(status) => {
                let message = match status.code() {
                    Some(code) => format!("Encoder exited with code {}", code),
                    None => "Encoder terminated by signal".to_string(),
                };
                warn!(job_id = %id, "{}", message);
                self.job.fail(message);
            }
            Outcome::TimedOut => {
                let message = format!(
                    "Transcoding timed out after {} seconds",
                    self.settings.timeout.as_secs()
                );
                warn!(job_id = %id, "{}", message);
                self.job.fail(message);
            }
            Outcome::SpawnFailed(message) | Outcome::Io(message) => {
                error!(job_id = %id, "{}", message);
                self.job.fail(message);
            }
            Outcome::Cancelled => {
                info!(job_id = %id, "Encoder stopped after cancellation");
                self.job.cancel();
            }
        }

        let rendered = log.render();
        self.job.encoder_log = Some(rendered.clone());

        let conn = match get_conn(&self.pool) {
            Ok(conn) => conn,
            Err(e) => {
                error!(job_id = %id, error = %e, "Failed to record job outcome");
                return;
            }
        };
        match transcoding_jobs::update_running_job(&conn, &self.job) {
            Ok(true) => {}
            Ok(false) => {
                // Status was set by whoever ended the job; only the log is ours.
                if let Err(e) = transcoding_jobs::set_job_log(&conn, id, &rendered) {
                    warn!(job_id = %id, error = %e, "Failed to store encoder log");
                }
            }
            Err(e) => error!(job_id = %id, error = %e, "Failed to record job outcome"),
        }
    }
}

fn spawn_line_reader<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

/// Kill the encoder's whole process group and reap it.
async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        kill_process_group(pid);
    }
    if let Err(e) = child.kill().await {
        debug!(error = %e, "Encoder already gone");
    }
}

/// Bytes on disk for a finished job's artifact.
pub fn output_size(job_type: JobType, output: &Path) -> Option<i64> {
    let total = match job_type {
        JobType::Segment => {
            let dir: PathBuf = output.parent()?.to_path_buf();
            WalkDir::new(dir)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .filter_map(|entry| entry.metadata().ok())
                .map(|meta| meta.len())
                .sum()
        }
        _ => std::fs::metadata(output).ok()?.len(),
    };
    i64::try_from(total).ok()
}

/// Fold one progress sample into a running job.
///
/// Fields the sample lacks leave the job untouched. Percent comes from frames
/// when the total frame count is known, otherwise from elapsed media time
/// against the source duration, and never moves backwards.
pub fn apply_progress(job: &mut TranscodingJob, sample: &ProgressSample, now: DateTime<Utc>) {
    if let Some(frame) = sample.frame {
        job.current_frame = Some(frame);
    }
    if let Some(speed) = sample.speed {
        job.processing_speed = Some(format!("{:.2}x", speed));
    }

    let percent = match job.total_frames {
        Some(total) => sample.frame.and_then(|f| percent_from_frames(f, total)),
        None => sample
            .elapsed
            .zip(job.source_duration_secs)
            .and_then(|(elapsed, total)| percent_from_elapsed(elapsed, total)),
    };
    if let Some(percent) = percent {
        job.advance_progress(percent);
    }

    if let (Some(elapsed), Some(total)) = (sample.elapsed, job.source_duration_secs) {
        let speed = sample
            .speed
            .or_else(|| job.processing_speed.as_deref().and_then(parse_speed));
        if let Some(estimate) = speed.and_then(|s| eta(elapsed, total, s, now)) {
            job.estimated_completion_at = Some(estimate);
        }
    }
}
