//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which creates a throwaway database, a temporary output
//! root and a fake encoder script standing in for ffmpeg/ffprobe.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use jiptv::config::Config;
use jiptv::transcoding::JobQueue;
use jiptv_common::{JobId, MediaSource};
use jiptv_db::models::TranscodingJob;
use jiptv_db::pool::{init_pool, DbPool, PooledConnection};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Resolves `$out` to the path following `-y` (encoder) or `-o` (analyzer).
const PREAMBLE: &str = r#"#!/bin/sh
out=""
prev=""
for arg in "$@"; do
  case "$prev" in
    -y|-o) out="$arg" ;;
  esac
  prev="$arg"
done
"#;

/// Reports one progress line, writes four bytes and exits cleanly.
pub const SUCCEED: &str = r#"
echo "frame=  120 fps=30 q=28.0 size=512kB time=00:00:05.00 bitrate=838.9kbits/s speed=2.0x" >&2
printf 'data' > "$out"
exit 0
"#;

/// Prints progress forever.
pub const RUN_FOREVER: &str = r#"
i=0
while true; do
  echo "frame=$i"
  i=$((i+1))
  sleep 0.05
done
"#;

pub struct TestHarness {
    pub pool: DbPool,
    pub config: Config,
    pub dir: TempDir,
    pub shutdown: CancellationToken,
}

impl TestHarness {
    /// Harness whose encoder succeeds immediately.
    pub fn new() -> Self {
        Self::with_script(SUCCEED)
    }

    /// Harness whose encoder runs `body` after [`PREAMBLE`].
    pub fn with_script(body: &str) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        // Supervisors write from their own tasks, so use a WAL file rather than shared-cache memory.
        let db_path = dir.path().join("jiptv.db");
        let pool = init_pool(&db_path.to_string_lossy()).expect("failed to create pool");

        let mut config = Config::default();
        config.transcoding.output_dir = dir.path().join("out");
        config.transcoding.log_flush_millis = 20;
        config.database.path = db_path;

        let mut harness = Self {
            pool,
            config,
            dir,
            shutdown: CancellationToken::new(),
        };
        let script = harness.write_script("encoder", body);
        harness.config.tools.ffmpeg_path = script.clone();
        harness.config.tools.ffprobe_path = script;
        harness
    }

    /// Write an executable fake tool into the temp dir.
    pub fn write_script(&self, name: &str, body: &str) -> PathBuf {
        let bin = self.dir.path().join("bin");
        std::fs::create_dir_all(&bin).expect("failed to create bin dir");
        let path = bin.join(name);
        std::fs::write(&path, format!("{PREAMBLE}{body}")).expect("failed to write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("failed to chmod script");
        path
    }

    /// Where a script can drop its pid.
    pub fn pid_file(&self) -> PathBuf {
        self.dir.path().join("encoder.pid")
    }

    pub fn conn(&self) -> PooledConnection {
        self.pool.get().expect("failed to get connection")
    }

    /// A queue on the current runtime. Must be called inside a tokio test.
    pub fn queue(&self) -> JobQueue {
        JobQueue::new(self.pool.clone(), &self.config, self.shutdown.clone())
            .expect("failed to build queue")
    }

    /// A local source file of ten seconds.
    pub fn source(&self, id: i64) -> MediaSource {
        let path = self.dir.path().join(format!("source_{id}.mkv"));
        if !path.exists() {
            std::fs::write(&path, b"not really a movie").expect("failed to write source");
        }
        MediaSource::new(id, path.to_string_lossy().to_string()).with_duration(10.0)
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Poll until `check` accepts the job or `timeout` elapses.
pub async fn wait_for<F>(queue: &JobQueue, id: JobId, timeout: Duration, check: F) -> TranscodingJob
where
    F: Fn(&TranscodingJob) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = queue.get_job(id).expect("job disappeared");
        if check(&job) {
            return job;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for job {id}; last state: {job:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub async fn wait_for_terminal(queue: &JobQueue, id: JobId) -> TranscodingJob {
    wait_for(queue, id, Duration::from_secs(10), |job| job.is_terminal()).await
}

/// Wait until no supervisor is registered, i.e. every run has written its outcome.
pub async fn wait_for_idle(queue: &JobQueue) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !queue.active_jobs().is_empty() {
        if tokio::time::Instant::now() >= deadline {
            panic!("supervisors still running");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Read a pid a script wrote, waiting for the file to appear.
pub async fn read_pid(path: &Path) -> i32 {
    for _ in 0..250 {
        if let Ok(text) = std::fs::read_to_string(path) {
            if let Ok(pid) = text.trim().parse() {
                return pid;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("no pid written to {}", path.display());
}

/// Whether `pid` is gone, polling briefly to let the kernel reap it.
pub async fn process_gone(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    for _ in 0..100 {
        if kill(Pid::from_raw(pid), None) == Err(nix::errno::Errno::ESRCH) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
