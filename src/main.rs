mod cli;

use jiptv::config::{self, Config};
use jiptv::transcoding::{spawn_background_tasks, JobQueue, QueueStatistics, Reaper};
use jiptv_common::{MediaSource, SourceId, TrackDescriptor};
use jiptv_db::models::TranscodingJob;
use jiptv_db::pool::{init_pool, DbPool};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long shutdown waits for supervisors to record their cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn open_pool(config: &Config) -> Result<DbPool> {
    let path = config.database.path.to_string_lossy();
    tracing::debug!("Opening database at {}", path);
    init_pool(&path).with_context(|| format!("Failed to open database {}", path))
}

async fn start_daemon(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    if let Err(e) = jiptv_av::require_tool(&config.tools.ffmpeg_path) {
        tracing::warn!("{}; encoder jobs will fail until it is installed", e);
    }

    std::fs::create_dir_all(&config.transcoding.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {:?}",
            config.transcoding.output_dir
        )
    })?;

    let pool = open_pool(&config)?;
    let shutdown = CancellationToken::new();
    let queue = Arc::new(JobQueue::new(pool.clone(), &config, shutdown.clone())?);
    let reaper = Arc::new(Reaper::from_config(
        pool,
        queue.active_jobs().clone(),
        &config.transcoding,
    ));

    // No supervisor is alive yet, so every RUNNING record is left over.
    if let Err(e) = reaper.reclaim_orphaned_jobs() {
        tracing::warn!("Failed to reclaim orphaned jobs: {}", e);
    }

    tracing::info!(
        cap = config.transcoding.max_concurrent_jobs,
        output_dir = %config.transcoding.output_dir.display(),
        "Starting jiptv"
    );

    let handles = spawn_background_tasks(
        Arc::clone(&queue),
        reaper,
        &config.schedule,
        shutdown.clone(),
    );

    shutdown_signal().await?;

    tracing::info!("Shutting down...");
    shutdown.cancel();
    for handle in handles {
        let _ = handle.await;
    }

    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
    while !queue.active_jobs().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl+C")?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    tracing::info!("Shutdown signal received");
    Ok(())
}

/// Run `f` against a queue bound to a fresh runtime. One-shot commands never
/// admit jobs themselves; the daemon does.
fn with_queue<T>(
    config_path: Option<&Path>,
    f: impl FnOnce(&JobQueue, &Config) -> Result<T>,
) -> Result<T> {
    let config = config::load_config_or_default(config_path)?;
    let pool = open_pool(&config)?;

    let rt = tokio::runtime::Runtime::new()?;
    let _guard = rt.enter();
    let queue = JobQueue::new(pool, &config, CancellationToken::new())?;
    f(&queue, &config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "jiptv=trace,jiptv_av=trace,jiptv_db=debug,jiptv_common=debug".to_string()
        } else {
            "jiptv=info,jiptv_av=info,jiptv_db=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Start => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_daemon(config_path))
        }
        Commands::Enqueue {
            source_id,
            input,
            job_type,
            profile,
            tracks,
            duration,
            total_frames,
        } => {
            let tracks = read_tracks(tracks.as_deref())?;
            let mut source = MediaSource::new(source_id, input);
            if let Some(secs) = duration {
                source = source.with_duration(secs);
            }
            if let Some(frames) = total_frames {
                source = source.with_total_frames(frames);
            }

            with_queue(config_path, |queue, _| {
                let submission = queue.submit(&source, job_type, &tracks, profile.as_deref())?;
                if submission.is_new() {
                    println!("Queued job {}", submission.job().id);
                } else {
                    println!(
                        "Job {} is already {} for this source",
                        submission.job().id,
                        submission.job().status
                    );
                }
                Ok(())
            })
        }
        Commands::Status { job_id, json } => with_queue(config_path, |queue, _| {
            let job = queue.get_job(job_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&job)?);
            } else {
                print_job(&job);
            }
            Ok(())
        }),
        Commands::List { source_id, json } => with_queue(config_path, |queue, _| {
            let jobs = queue.list_jobs_for_source(SourceId::from(source_id))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else if jobs.is_empty() {
                println!("No jobs for source {}", source_id);
            } else {
                for job in &jobs {
                    println!(
                        "{}  {:<9} {:<9} {:>3}%  {}",
                        job.id,
                        job.job_type.to_string(),
                        job.status.to_string(),
                        job.progress_percent,
                        job.profile.as_deref().unwrap_or("-")
                    );
                }
            }
            Ok(())
        }),
        Commands::Cancel { job_id } => with_queue(config_path, |queue, _| {
            let job = queue.cancel(job_id)?;
            println!("Job {} is {}", job.id, job.status);
            Ok(())
        }),
        Commands::Stats { json } => with_queue(config_path, |queue, _| {
            let stats = queue.statistics()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
            Ok(())
        }),
        Commands::Sweep => with_queue(config_path, |queue, config| {
            let reaper = Reaper::from_config(
                queue.pool().clone(),
                queue.active_jobs().clone(),
                &config.transcoding,
            );
            let now = Utc::now();
            let stuck = reaper.sweep_stuck_jobs(now)?;
            let cleaned = reaper.cleanup_finished_jobs(now)?;
            println!("Cancelled {} stuck jobs, removed {} finished jobs", stuck, cleaned);
            Ok(())
        }),
        Commands::CheckTools => check_tools(config_path),
        Commands::Validate {
            config: validate_path,
        } => {
            let path = validate_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("jiptv {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn read_tracks(path: Option<&Path>) -> Result<Vec<TrackDescriptor>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tracks file: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse tracks file: {:?}", path))
}

fn print_job(job: &TranscodingJob) {
    println!("Job:      {}", job.id);
    println!("Source:   {} ({})", job.source_id, job.input_locator);
    println!("Type:     {}", job.job_type);
    println!("Status:   {}", job.status);
    println!("Progress: {}%", job.progress_percent);
    if let Some(ref profile) = job.profile {
        println!("Profile:  {}", profile);
    }
    if let Some(ref speed) = job.processing_speed {
        println!("Speed:    {}", speed);
    }
    if let Some(eta) = job.estimated_completion_at {
        println!("ETA:      {}", eta.to_rfc3339());
    }
    if let Some(ref output) = job.output_locator {
        println!("Output:   {} ({})", output, job.formatted_output_size());
    }
    if let Some(minutes) = job.duration_minutes() {
        println!("Duration: {} min", minutes);
    }
    if let Some(ref error) = job.error_message {
        println!("Error:    {}", error);
    }
}

fn print_stats(stats: &QueueStatistics) {
    println!(
        "Running: {}/{}  Pending: {}",
        stats.running_count, stats.concurrency_cap, stats.pending_count
    );
    match stats.average_duration_minutes {
        Some(avg) => println!("Average duration: {:.1} min", avg),
        None => println!("Average duration: n/a"),
    }

    println!("\nBy status:");
    for (status, count) in &stats.counts_by_status {
        println!("  {:<10} {}", status.to_string(), count);
    }
    println!("\nBy type:");
    for (job_type, count) in &stats.counts_by_type {
        println!("  {:<10} {}", job_type.to_string(), count);
    }
    if !stats.counts_by_profile.is_empty() {
        println!("\nBy profile:");
        for (profile, count) in &stats.counts_by_profile {
            println!("  {:<20} {}", profile, count);
        }
    }
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    println!("Checking external tools...\n");

    let tools = jiptv_av::check_tools(&config.tools.ffmpeg_path, &config.tools.ffprobe_path);
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Jobs that need them will fail.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            config::load_config(p)?
        }
        None => {
            println!("No config file specified, checking defaults");
            config::load_config_or_default(None)?
        }
    };

    let registry = config::profile_registry(&config);
    let t = &config.transcoding;
    println!("✓ Configuration is valid");
    println!("  Database: {}", config.database.path.display());
    println!("  Output dir: {}", t.output_dir.display());
    println!("  Encoder: {}", config.tools.ffmpeg_path.display());
    println!("  Max concurrent jobs: {}", t.max_concurrent_jobs);
    println!("  Encoder timeout: {}s", t.timeout_secs);
    println!("  Stuck threshold: {}h", t.job_timeout_hours);
    println!("  Retention: {} days", t.cleanup_days);
    println!("  Profiles: {}", registry.len());
    for name in registry.names() {
        println!("    {}", name);
    }

    Ok(())
}
