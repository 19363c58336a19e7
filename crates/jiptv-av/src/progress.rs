//! Encoder progress parsing.
//!
//! ffmpeg reports progress as `key=value` text, both in its stderr status line
//! (`frame=  120 fps=30 ... time=00:00:05.00 ... speed=2.0x`) and in the
//! `-progress pipe:1` stream. Three markers are extracted independently; any
//! of them may be missing from a given line.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static RE_FRAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"frame=\s*(\d+)").unwrap());
static RE_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=(\d{2}):(\d{2}):(\d{2})\.(\d{2})").unwrap());
static RE_SPEED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"speed=\s*(\d+(?:\.\d+)?)x").unwrap());

/// Highest percentage the parser will ever report. 100 belongs to completion.
pub const MAX_RUNNING_PERCENT: i32 = 99;

/// Progress fields found in one log line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSample {
    pub frame: Option<i64>,
    pub elapsed: Option<Duration>,
    pub speed: Option<f64>,
}

impl ProgressSample {
    /// Extract whatever progress markers the line carries.
    pub fn parse(line: &str) -> Self {
        let frame = RE_FRAME
            .captures(line)
            .and_then(|c| c[1].parse::<i64>().ok());

        let elapsed = RE_TIME.captures(line).and_then(|c| {
            let hours: u64 = c[1].parse().ok()?;
            let minutes: u64 = c[2].parse().ok()?;
            let seconds: u64 = c[3].parse().ok()?;
            let hundredths: u64 = c[4].parse().ok()?;
            Some(Duration::from_millis(
                ((hours * 3600 + minutes * 60 + seconds) * 1000) + hundredths * 10,
            ))
        });

        let speed = RE_SPEED
            .captures(line)
            .and_then(|c| c[1].parse::<f64>().ok())
            .filter(|s| s.is_finite());

        Self {
            frame,
            elapsed,
            speed,
        }
    }

    /// Whether the line carried no progress at all.
    pub fn is_empty(&self) -> bool {
        self.frame.is_none() && self.elapsed.is_none() && self.speed.is_none()
    }
}

/// Percent complete from frame counts.
pub fn percent_from_frames(current: i64, total: i64) -> Option<i32> {
    if total <= 0 {
        return None;
    }
    let pct = (current.max(0).saturating_mul(100)) / total;
    Some(pct.min(MAX_RUNNING_PERCENT as i64) as i32)
}

/// Percent complete from elapsed media time against the source duration.
pub fn percent_from_elapsed(elapsed: Duration, total_secs: f64) -> Option<i32> {
    if !total_secs.is_finite() || total_secs <= 0.0 {
        return None;
    }
    let pct = (elapsed.as_secs_f64() * 100.0 / total_secs).floor();
    Some(pct.clamp(0.0, MAX_RUNNING_PERCENT as f64) as i32)
}

/// Estimated wall-clock completion: remaining media time divided by speed.
pub fn eta(
    elapsed: Duration,
    total_secs: f64,
    speed: f64,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if !total_secs.is_finite() || total_secs <= 0.0 || !speed.is_finite() || speed <= 0.0 {
        return None;
    }
    let remaining_secs = ((total_secs - elapsed.as_secs_f64()) / speed).max(0.0);
    let remaining = Duration::try_from_secs_f64(remaining_secs).ok()?;
    let remaining = chrono::Duration::from_std(remaining).ok()?;
    now.checked_add_signed(remaining)
}

/// Parse the numeric part of a stored speed such as `"2.0x"`.
pub fn parse_speed(stored: &str) -> Option<f64> {
    stored
        .trim()
        .trim_end_matches('x')
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite())
}
