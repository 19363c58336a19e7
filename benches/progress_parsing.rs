//! Benchmarks for encoder progress parsing
//!
//! Every line the encoder prints goes through the parser, so it sits on the
//! hot path of each supervised run.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use jiptv_av::progress::{eta, percent_from_elapsed};
use jiptv_av::{BuildRequest, CommandBuilder, ProfileRegistry, ProgressSample, ToolPaths};
use jiptv_common::{JobType, SourceId, TrackDescriptor, TrackType};
use std::time::Duration;

const STATUS_LINE: &str =
    "frame= 1440 fps= 96 q=28.0 size=   12288kB time=00:01:00.06 bitrate=1676.1kbits/s speed=3.99x";

/// One block of `-progress pipe:1` output.
const PROGRESS_BLOCK: &[&str] = &[
    "frame=1440",
    "fps=96.00",
    "stream_0_0_q=28.0",
    "bitrate=1676.1kbits/s",
    "total_size=12582912",
    "out_time_us=60060000",
    "out_time_ms=60060000",
    "out_time=00:01:00.060000",
    "dup_frames=0",
    "drop_frames=0",
    "speed=3.99x",
    "progress=continue",
];

const NOISE: &str = "  Stream #0:1(eng): Audio: aac (LC), 48000 Hz, stereo, fltp, 128 kb/s (default)";

fn bench_line_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_parsing");

    for (name, line) in [("status_line", STATUS_LINE), ("noise", NOISE)] {
        group.throughput(Throughput::Bytes(line.len() as u64));
        group.bench_with_input(BenchmarkId::new("parse", name), &line, |b, line| {
            b.iter(|| ProgressSample::parse(black_box(line)));
        });
    }

    group.throughput(Throughput::Elements(PROGRESS_BLOCK.len() as u64));
    group.bench_function("parse/progress_block", |b| {
        b.iter(|| {
            for line in PROGRESS_BLOCK {
                black_box(ProgressSample::parse(black_box(line)));
            }
        });
    });

    group.finish();
}

fn bench_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("derivation");
    let elapsed = Duration::from_millis(60_060);
    let now = Utc::now();

    group.bench_function("percent_from_elapsed", |b| {
        b.iter(|| percent_from_elapsed(black_box(elapsed), black_box(5400.0)));
    });

    group.bench_function("eta", |b| {
        b.iter(|| eta(black_box(elapsed), black_box(5400.0), black_box(3.99), now));
    });

    group.finish();
}

fn bench_command_build(c: &mut Criterion) {
    let builder = CommandBuilder::new(
        ToolPaths::default(),
        "/srv/jiptv",
        ProfileRegistry::with_builtins(),
    );
    let tracks = vec![
        TrackDescriptor::new(1, 5, 0, TrackType::Video),
        TrackDescriptor::new(2, 5, 1, TrackType::Audio),
        TrackDescriptor::new(3, 5, 2, TrackType::Subtitle),
    ];

    let mut group = c.benchmark_group("command_build");
    for job_type in JobType::BY_PRIORITY {
        let request = BuildRequest {
            job_type,
            source_id: SourceId::from(5),
            input: "/media/in.mkv",
            tracks: &tracks,
            profile: match job_type {
                JobType::Analysis => None,
                JobType::Transcode => Some("WebOS_Compatible"),
                JobType::Segment => Some("WebOS_HLS"),
                JobType::Thumbnail => Some("Thumbnail_Default"),
            },
        };
        group.bench_with_input(
            BenchmarkId::new("build", job_type.to_string()),
            &request,
            |b, request| {
                b.iter(|| builder.build(black_box(request)).unwrap());
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_line_parsing, bench_derivation, bench_command_build);
criterion_main!(benches);
