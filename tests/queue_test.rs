//! Admission queue integration tests.

#![cfg(unix)]

mod common;

use assert_matches::assert_matches;
use jiptv::transcoding::JobQueue;
use jiptv_common::{Error, JobId, JobStatus, JobType, MediaSource, TrackDescriptor, TrackType};
use jiptv_db::models::NewJob;
use jiptv_db::pool::init_pool;
use jiptv_db::queries::transcoding_jobs;

use common::{wait_for_idle, wait_for_terminal, TestHarness, RUN_FOREVER};

fn av_tracks(source_id: i64) -> Vec<TrackDescriptor> {
    vec![
        TrackDescriptor::new(source_id * 10, source_id, 0, TrackType::Video),
        TrackDescriptor::new(source_id * 10 + 1, source_id, 1, TrackType::Audio),
    ]
}

fn capped(cap: usize) -> TestHarness {
    let mut harness = TestHarness::with_script(RUN_FOREVER);
    harness.config.transcoding.max_concurrent_jobs = cap;
    harness
}

// ---------------------------------------------------------------------------
// Idempotence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enqueue_returns_existing_pending_job() {
    let harness = capped(1);
    let queue = harness.queue();

    // Occupy the only slot so the next request stays PENDING.
    queue
        .enqueue(&harness.source(1), JobType::Transcode, &av_tracks(1), None)
        .unwrap();

    let source = harness.source(2);
    let first = queue
        .enqueue(&source, JobType::Transcode, &av_tracks(2), None)
        .unwrap();
    let second = queue
        .enqueue(&source, JobType::Transcode, &av_tracks(2), Some("WebOS_Optimized"))
        .unwrap();

    assert_eq!(first.status, JobStatus::Pending);
    assert_eq!(first.id, second.id);
    assert_eq!(second.profile.as_deref(), Some("WebOS_Compatible"));
    assert_eq!(queue.list_jobs_for_source(source.id).unwrap().len(), 1);
}

#[tokio::test]
async fn enqueue_returns_existing_running_job() {
    let harness = capped(2);
    let queue = harness.queue();
    let source = harness.source(1);

    let first = queue
        .enqueue(&source, JobType::Transcode, &av_tracks(1), None)
        .unwrap();
    assert_eq!(first.status, JobStatus::Running);

    let again = queue
        .enqueue(&source, JobType::Transcode, &av_tracks(1), None)
        .unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(queue.statistics().unwrap().running_count, 1);
}

#[tokio::test]
async fn other_job_types_are_not_deduplicated() {
    let harness = capped(4);
    let queue = harness.queue();
    let source = harness.source(1);

    let transcode = queue
        .enqueue(&source, JobType::Transcode, &av_tracks(1), None)
        .unwrap();
    let thumbnail = queue
        .enqueue(&source, JobType::Thumbnail, &av_tracks(1), None)
        .unwrap();
    assert_ne!(transcode.id, thumbnail.id);
}

#[tokio::test]
async fn finished_job_does_not_block_new_request() {
    let harness = TestHarness::new();
    let queue = harness.queue();
    let source = harness.source(1);

    let first = queue
        .enqueue(&source, JobType::Transcode, &av_tracks(1), None)
        .unwrap();
    wait_for_terminal(&queue, first.id).await;

    let second = queue
        .enqueue(&source, JobType::Transcode, &av_tracks(1), None)
        .unwrap();
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn queues_sharing_a_database_do_not_duplicate() {
    let harness = TestHarness::new();
    // A second pool on the same file stands in for another process.
    let other_pool = init_pool(&harness.config.database.path.to_string_lossy()).unwrap();
    let other = JobQueue::new(other_pool, &harness.config, harness.shutdown.clone()).unwrap();
    let queues = [harness.queue(), other];

    for id in 1..=20 {
        let source = harness.source(id);
        let ids: Vec<JobId> = std::thread::scope(|scope| {
            let handles: Vec<_> = queues
                .iter()
                .map(|queue| {
                    let source = &source;
                    scope.spawn(move || {
                        queue
                            .submit(source, JobType::Analysis, &[], None)
                            .unwrap()
                            .job()
                            .id
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(ids[0], ids[1], "source {id} got two jobs");

        let jobs = queues[0].list_jobs_for_source(source.id).unwrap();
        assert_eq!(jobs.len(), 1);
    }
}

#[tokio::test]
async fn pair_never_runs_twice() {
    let harness = capped(4);
    let queue = harness.queue();
    let source = harness.source(1);

    // Two PENDING rows for one pair, as left behind by an older writer.
    let conn = harness.conn();
    let new = NewJob::new(source.id, JobType::Analysis, source.locator.clone());
    let first = transcoding_jobs::create_job(&conn, &new).unwrap();
    let second = transcoding_jobs::create_job(&conn, &new).unwrap();
    let other = queue.submit(&harness.source(2), JobType::Analysis, &[], None).unwrap();

    assert_eq!(queue.advance_all().unwrap(), 2);
    let running: Vec<_> = queue
        .list_jobs_for_source(source.id)
        .unwrap()
        .into_iter()
        .filter(|job| job.status == JobStatus::Running)
        .collect();
    assert_eq!(running.len(), 1);
    assert_eq!(queue.get_job(other.job().id).unwrap().status, JobStatus::Running);

    // The leftover runs once the pair is free.
    let (started, waiting) = if running[0].id == first.id {
        (first.id, second.id)
    } else {
        (second.id, first.id)
    };
    assert_eq!(queue.get_job(waiting).unwrap().status, JobStatus::Pending);
    queue.cancel(started).unwrap();
    assert_eq!(queue.advance_all().unwrap(), 1);
    assert_eq!(queue.get_job(waiting).unwrap().status, JobStatus::Running);
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn running_count_never_exceeds_cap() {
    let harness = capped(2);
    let queue = harness.queue();

    let mut ids = Vec::new();
    for source_id in 1..=5 {
        let job = queue
            .enqueue(
                &harness.source(source_id),
                JobType::Transcode,
                &av_tracks(source_id),
                None,
            )
            .unwrap();
        ids.push(job.id);
    }

    let stats = queue.statistics().unwrap();
    assert_eq!(stats.running_count, 2);
    assert_eq!(stats.pending_count, 3);
    assert!(stats.at_capacity());
    assert_eq!(stats.available_slots(), 0);

    assert_eq!(queue.advance_all().unwrap(), 0);
    assert!(queue.try_advance().unwrap().is_none());

    // Freeing one slot admits exactly one more.
    queue.cancel(ids[0]).unwrap();
    assert_eq!(queue.advance_all().unwrap(), 1);
    assert_eq!(queue.statistics().unwrap().running_count, 2);
}

#[tokio::test]
async fn admission_follows_type_priority_then_age() {
    let harness = capped(1);
    let queue = harness.queue();

    let blocker = queue
        .enqueue(&harness.source(1), JobType::Transcode, &av_tracks(1), None)
        .unwrap();
    assert_eq!(blocker.status, JobStatus::Running);

    let segment = queue
        .enqueue(&harness.source(2), JobType::Segment, &av_tracks(2), None)
        .unwrap();
    let transcode = queue
        .enqueue(&harness.source(3), JobType::Transcode, &av_tracks(3), None)
        .unwrap();
    let thumbnail = queue
        .enqueue(&harness.source(4), JobType::Thumbnail, &av_tracks(4), None)
        .unwrap();
    let analysis = queue
        .enqueue(&harness.source(5), JobType::Analysis, &[], None)
        .unwrap();

    let mut order = Vec::new();
    let mut running = blocker.id;
    for _ in 0..4 {
        queue.cancel(running).unwrap();
        let admitted = queue.try_advance().unwrap().expect("a job should be admitted");
        order.push(admitted.id);
        running = admitted.id;
    }

    assert_eq!(order, vec![analysis.id, thumbnail.id, transcode.id, segment.id]);
}

#[tokio::test]
async fn submit_does_not_admit() {
    let harness = capped(2);
    let queue = harness.queue();

    let submission = queue
        .submit(&harness.source(1), JobType::Transcode, &av_tracks(1), None)
        .unwrap();
    assert!(submission.is_new());
    assert_eq!(submission.job().status, JobStatus::Pending);
    assert!(submission.job().started_at.is_none());

    let admitted = queue.try_advance().unwrap().unwrap();
    assert_eq!(admitted.id, submission.job().id);
    assert_eq!(admitted.status, JobStatus::Running);
}

// ---------------------------------------------------------------------------
// Admission and build errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn foreign_track_is_rejected_before_recording() {
    let harness = TestHarness::new();
    let queue = harness.queue();
    let source = harness.source(1);

    let tracks = vec![TrackDescriptor::new(99, 2, 0, TrackType::Video)];
    let err = queue
        .enqueue(&source, JobType::Transcode, &tracks, None)
        .unwrap_err();

    assert_matches!(err, Error::InvalidInput(_));
    assert!(queue.list_jobs_for_source(source.id).unwrap().is_empty());
}

#[tokio::test]
async fn missing_source_file_is_not_found() {
    let harness = TestHarness::new();
    let queue = harness.queue();

    let source = MediaSource::new(1, harness.dir.path().join("gone.mkv").to_string_lossy());
    let err = queue
        .enqueue(&source, JobType::Analysis, &[], None)
        .unwrap_err();

    assert_matches!(err, Error::NotFound(_));
}

#[tokio::test]
async fn build_error_fails_job_without_spawning() {
    let harness = TestHarness::new();
    let queue = harness.queue();

    // A transcode with no video or audio track cannot be built.
    let job = queue
        .enqueue(&harness.source(1), JobType::Transcode, &[], None)
        .unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.as_deref().unwrap().contains("track"));
    assert!(job.encoder_command.is_none());
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
    assert!(queue.active_jobs().is_empty());
}

#[tokio::test]
async fn build_error_does_not_block_next_candidate() {
    let harness = capped(1);
    let queue = harness.queue();

    let analysis = queue
        .submit(&harness.source(1), JobType::Analysis, &[], None)
        .unwrap()
        .into_job();
    let unknown = queue
        .submit(&harness.source(2), JobType::Thumbnail, &av_tracks(2), Some("Nope"))
        .unwrap()
        .into_job();
    let thumbnail = queue
        .submit(&harness.source(3), JobType::Thumbnail, &av_tracks(3), None)
        .unwrap()
        .into_job();

    let admitted = queue.try_advance().unwrap().unwrap();
    assert_eq!(admitted.id, analysis.id);

    // The unknown profile is older but cannot be built; the next one runs instead.
    queue.cancel(analysis.id).unwrap();
    let admitted = queue.try_advance().unwrap().unwrap();
    assert_eq!(admitted.id, thumbnail.id);

    let rejected = queue.get_job(unknown.id).unwrap();
    assert_eq!(rejected.status, JobStatus::Failed);
    assert!(rejected.error_message.unwrap().contains("unknown profile"));
}

// ---------------------------------------------------------------------------
// Cancel and statistics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_pending_job() {
    let harness = capped(1);
    let queue = harness.queue();

    queue
        .enqueue(&harness.source(1), JobType::Transcode, &av_tracks(1), None)
        .unwrap();
    let pending = queue
        .enqueue(&harness.source(2), JobType::Transcode, &av_tracks(2), None)
        .unwrap();
    assert_eq!(pending.status, JobStatus::Pending);

    let cancelled = queue.cancel(pending.id).unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.started_at.is_some());
    assert!(cancelled.completed_at.is_some());

    // Cancelling again returns the terminal job untouched.
    let again = queue.cancel(pending.id).unwrap();
    assert_eq!(again.completed_at, queue.get_job(pending.id).unwrap().completed_at);
}

#[tokio::test]
async fn cancel_unknown_job_is_not_found() {
    let harness = TestHarness::new();
    let queue = harness.queue();
    assert_matches!(queue.cancel(JobId::new()), Err(Error::NotFound(_)));
}

#[tokio::test]
async fn cancel_jobs_for_source_stops_everything() {
    let harness = capped(4);
    let queue = harness.queue();
    let source = harness.source(1);

    for job_type in [JobType::Transcode, JobType::Thumbnail, JobType::Segment] {
        queue.enqueue(&source, job_type, &av_tracks(1), None).unwrap();
    }
    queue
        .enqueue(&harness.source(2), JobType::Transcode, &av_tracks(2), None)
        .unwrap();

    assert_eq!(queue.cancel_jobs_for_source(source.id).unwrap(), 3);
    assert_eq!(queue.cancel_jobs_for_source(source.id).unwrap(), 0);

    let stats = queue.statistics().unwrap();
    assert_eq!(stats.running_count, 1);
    assert_eq!(stats.counts_by_status[&JobStatus::Cancelled], 3);
}

#[tokio::test]
async fn statistics_are_zero_filled() {
    let harness = TestHarness::new();
    let queue = harness.queue();

    let stats = queue.statistics().unwrap();
    assert_eq!(stats.pending_count, 0);
    assert_eq!(stats.running_count, 0);
    assert_eq!(stats.concurrency_cap, 2);
    assert_eq!(stats.average_duration_minutes, None);
    assert_eq!(stats.counts_by_status.len(), 5);
    assert_eq!(stats.counts_by_type.len(), 4);
    assert!(stats.counts_by_profile.is_empty());

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["counts_by_status"]["pending"], 0);
    assert_eq!(json["counts_by_type"]["analysis"], 0);
}

#[tokio::test]
async fn statistics_after_completion() {
    let harness = TestHarness::new();
    let queue = harness.queue();

    let job = queue
        .enqueue(&harness.source(1), JobType::Transcode, &av_tracks(1), None)
        .unwrap();
    wait_for_terminal(&queue, job.id).await;
    wait_for_idle(&queue).await;

    let stats = queue.statistics().unwrap();
    assert_eq!(stats.counts_by_status[&JobStatus::Completed], 1);
    assert_eq!(stats.counts_by_type[&JobType::Transcode], 1);
    assert_eq!(stats.counts_by_profile.get("WebOS_Compatible"), Some(&1));
    assert!(stats.average_duration_minutes.unwrap() < 1.0);
}
