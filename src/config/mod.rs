mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use jiptv_av::{CommandBuilder, ProfileRegistry, ToolPaths};
use std::collections::HashSet;
use std::path::Path;

/// Load configuration from a TOML file, then apply environment overrides.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./jiptv.toml",
        "~/.config/jiptv/config.toml",
        "/etc/jiptv/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    let mut config = Config::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config)?;
    Ok(config)
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid value for {}: {:?} ({})", key, value, e))
}

/// Overlay `JIPTV_*` variables on top of the file values.
///
/// `lookup` is the variable source, normally `std::env::var`.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("JIPTV_DATABASE") {
        config.database.path = shellexpand::tilde(&v).as_ref().into();
    }
    if let Some(v) = lookup("JIPTV_FFMPEG_PATH") {
        config.tools.ffmpeg_path = v.into();
    }
    if let Some(v) = lookup("JIPTV_FFPROBE_PATH") {
        config.tools.ffprobe_path = v.into();
    }
    if let Some(v) = lookup("JIPTV_OUTPUT_DIR") {
        config.transcoding.output_dir = shellexpand::tilde(&v).as_ref().into();
    }
    if let Some(v) = lookup("JIPTV_TRANSCODING_TIMEOUT") {
        config.transcoding.timeout_secs = parse_var("JIPTV_TRANSCODING_TIMEOUT", &v)?;
    }
    if let Some(v) = lookup("JIPTV_MAX_CONCURRENT_JOBS") {
        config.transcoding.max_concurrent_jobs = parse_var("JIPTV_MAX_CONCURRENT_JOBS", &v)?;
    }
    if let Some(v) = lookup("JIPTV_JOB_TIMEOUT_HOURS") {
        config.transcoding.job_timeout_hours = parse_var("JIPTV_JOB_TIMEOUT_HOURS", &v)?;
    }
    if let Some(v) = lookup("JIPTV_CLEANUP_DAYS") {
        config.transcoding.cleanup_days = parse_var("JIPTV_CLEANUP_DAYS", &v)?;
    }
    if let Some(v) = lookup("JIPTV_QUEUE_POLL_SECS") {
        config.schedule.queue_poll_secs = parse_var("JIPTV_QUEUE_POLL_SECS", &v)?;
    }
    Ok(())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    let t = &config.transcoding;

    if t.max_concurrent_jobs == 0 {
        bail!("transcoding.max_concurrent_jobs must be at least 1");
    }
    if t.timeout_secs == 0 {
        bail!("transcoding.timeout_secs must be greater than 0");
    }
    // The reaper is a safety net behind the supervisor's own timeout.
    if t.job_timeout_hours.saturating_mul(3600) <= t.timeout_secs {
        bail!(
            "transcoding.job_timeout_hours ({}h) must exceed the encoder timeout ({}s)",
            t.job_timeout_hours,
            t.timeout_secs
        );
    }
    if t.hls_segment_duration == 0 {
        bail!("transcoding.hls_segment_duration must be greater than 0");
    }
    if t.max_log_bytes == 0 {
        bail!("transcoding.max_log_bytes must be greater than 0");
    }

    let s = &config.schedule;
    if s.queue_poll_secs == 0 || s.stuck_sweep_secs == 0 || s.cleanup_interval_hours == 0 {
        bail!("schedule intervals must be greater than 0");
    }

    let mut names = HashSet::new();
    for profile in &config.profiles {
        if profile.name().is_empty() {
            bail!("Profile names cannot be empty");
        }
        if !names.insert(profile.name()) {
            bail!("Profile '{}' is defined more than once", profile.name());
        }
    }

    let registry = profile_registry(config);
    for (job_type, name) in [
        ("transcode", &t.default_transcode_profile),
        ("segment", &t.default_segment_profile),
        ("thumbnail", &t.default_thumbnail_profile),
    ] {
        match registry.get(name) {
            Some(profile) if profile.kind() == job_type => {}
            Some(profile) => bail!(
                "Default {} profile '{}' is a {} profile",
                job_type,
                name,
                profile.kind()
            ),
            None => bail!("Default {} profile '{}' is not defined", job_type, name),
        }
    }

    if !t.output_dir.exists() {
        tracing::warn!("Output directory does not exist yet: {:?}", t.output_dir);
    }

    Ok(())
}

/// Built-in profiles plus the ones declared in the config.
pub fn profile_registry(config: &Config) -> ProfileRegistry {
    let mut registry = ProfileRegistry::with_builtins();
    for profile in &config.profiles {
        if registry.insert(profile.clone()).is_some() {
            tracing::debug!(profile = profile.name(), "Config profile overrides built-in");
        }
    }
    registry
}

/// Command builder wired to the configured tools, output root and profiles.
pub fn command_builder(config: &Config) -> CommandBuilder {
    CommandBuilder::new(
        ToolPaths {
            encoder: config.tools.ffmpeg_path.clone(),
            analyzer: config.tools.ffprobe_path.clone(),
        },
        config.transcoding.output_dir.clone(),
        profile_registry(config),
    )
    .with_segment_duration(config.transcoding.hls_segment_duration)
}
