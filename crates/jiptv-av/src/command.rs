//! Encoder invocation builder.
//!
//! [`CommandBuilder::build`] is a pure function of its inputs: it never touches
//! the filesystem or spawns anything, and repeated calls with the same request
//! produce the same argument list.

use std::path::{Path, PathBuf};

use jiptv_common::{JobType, SourceId, TrackDescriptor, TrackType};

use crate::profile::{Profile, ProfileRegistry, SegmentProfile, ThumbnailProfile, TranscodeProfile};
use crate::{Error, Result};

/// Segment length used when a segment profile does not set one.
pub const DEFAULT_SEGMENT_SECS: u32 = 6;

/// Executables the builder emits invocations for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    /// Encoder used for transcode, segment and thumbnail jobs.
    pub encoder: PathBuf,
    /// Analyzer used for analysis jobs.
    pub analyzer: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            encoder: PathBuf::from("ffmpeg"),
            analyzer: PathBuf::from("ffprobe"),
        }
    }
}

/// A fully resolved external-process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Where the artifact will be. For segment jobs this is the manifest.
    pub output: PathBuf,
}

impl Invocation {
    /// Shell-style rendering, for logs and the job record.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy().to_string())
            .chain(self.args.iter().cloned())
            .map(|arg| {
                if arg.is_empty() || arg.contains(char::is_whitespace) {
                    format!("'{}'", arg.replace('\'', r"'\''"))
                } else {
                    arg
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Everything needed to build one invocation.
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
    pub job_type: JobType,
    pub source_id: SourceId,
    /// Source locator, passed through verbatim.
    pub input: &'a str,
    pub tracks: &'a [TrackDescriptor],
    pub profile: Option<&'a str>,
}

/// Serialize a track selection for storage on a job.
pub fn encode_tracks(tracks: &[TrackDescriptor]) -> Result<String> {
    Ok(serde_json::to_string(tracks)?)
}

/// Decode a stored track selection. A missing selection means no tracks.
pub fn decode_tracks(blob: Option<&str>) -> Result<Vec<TrackDescriptor>> {
    match blob {
        Some(s) if !s.trim().is_empty() => Ok(serde_json::from_str(s)?),
        _ => Ok(Vec::new()),
    }
}

fn first_track(tracks: &[TrackDescriptor], track_type: TrackType) -> Option<&TrackDescriptor> {
    tracks.iter().find(|t| t.track_type == track_type)
}

/// Builds encoder invocations from job descriptions.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    tools: ToolPaths,
    output_root: PathBuf,
    profiles: ProfileRegistry,
    segment_secs: u32,
}

impl CommandBuilder {
    pub fn new(tools: ToolPaths, output_root: impl Into<PathBuf>, profiles: ProfileRegistry) -> Self {
        Self {
            tools,
            output_root: output_root.into(),
            profiles,
            segment_secs: DEFAULT_SEGMENT_SECS,
        }
    }

    /// Segment duration for segment profiles that leave it unset.
    pub fn with_segment_duration(mut self, secs: u32) -> Self {
        self.segment_secs = secs.max(1);
        self
    }

    /// Build the invocation for a job.
    ///
    /// # Errors
    ///
    /// Fails when the job needs a profile that is missing, unknown or of the
    /// wrong kind, or when a transcode has no video or audio track selected.
    pub fn build(&self, req: &BuildRequest<'_>) -> Result<Invocation> {
        if req.input.is_empty() {
            return Err(Error::InvalidInput("source locator is empty".to_string()));
        }

        match req.job_type {
            JobType::Analysis => Ok(self.analysis(req)),
            JobType::Transcode => match self.resolve(req)? {
                Profile::Transcode(p) => self.transcode(req, p),
                other => Err(mismatch(other, req.job_type)),
            },
            JobType::Segment => match self.resolve(req)? {
                Profile::Segment(p) => Ok(self.segment(req, p)),
                other => Err(mismatch(other, req.job_type)),
            },
            JobType::Thumbnail => match self.resolve(req)? {
                Profile::Thumbnail(p) => Ok(self.thumbnail(req, p)),
                other => Err(mismatch(other, req.job_type)),
            },
        }
    }

    fn resolve(&self, req: &BuildRequest<'_>) -> Result<&Profile> {
        let name = req.profile.ok_or(Error::MissingProfile {
            job_type: req.job_type,
        })?;
        self.profiles
            .get(name)
            .ok_or_else(|| Error::unknown_profile(name))
    }

    fn transcode(&self, req: &BuildRequest<'_>, profile: &TranscodeProfile) -> Result<Invocation> {
        let video = first_track(req.tracks, TrackType::Video);
        let audio = first_track(req.tracks, TrackType::Audio);
        let subtitle = first_track(req.tracks, TrackType::Subtitle);

        if video.is_none() && audio.is_none() {
            return Err(Error::NoTracks {
                job_type: req.job_type,
            });
        }

        let output = self.output_root.join("transcoded").join(format!(
            "stream_{}_{}.{}",
            req.source_id,
            profile.name.to_lowercase(),
            profile.output_format
        ));

        let mut args = input_args(req.input);

        if let Some(track) = video {
            args.extend(["-map".to_string(), format!("0:{}", track.index)]);
            if track.compatible && !profile.force_reencode {
                args.extend(strs(&["-c:v", "copy"]));
            } else {
                args.extend([
                    "-c:v".to_string(),
                    profile.video_codec.clone(),
                    "-preset".to_string(),
                    profile.video_preset.clone(),
                    "-crf".to_string(),
                    profile.video_crf.to_string(),
                ]);
                let too_wide = track.width.is_some_and(|w| w > profile.max_width);
                if profile.max_width > 0 && too_wide {
                    args.extend(["-vf".to_string(), format!("scale={}:-2", profile.max_width)]);
                }
            }
        }

        if let Some(track) = audio {
            args.extend(["-map".to_string(), format!("0:{}", track.index)]);
            if track.compatible && !profile.force_reencode {
                args.extend(strs(&["-c:a", "copy"]));
            } else {
                let channels = track
                    .channels
                    .unwrap_or(profile.max_audio_channels)
                    .min(profile.max_audio_channels);
                args.extend([
                    "-c:a".to_string(),
                    profile.audio_codec.clone(),
                    "-b:a".to_string(),
                    format!("{}k", profile.audio_bitrate_kbps),
                    "-ac".to_string(),
                    channels.to_string(),
                ]);
            }
        }

        if let Some(track) = subtitle {
            args.extend(["-map".to_string(), format!("0:{}", track.index)]);
            let codec = if track.compatible {
                "copy".to_string()
            } else {
                profile.subtitle_codec.clone()
            };
            args.extend(["-c:s".to_string(), codec]);
        }

        args.extend(["-f".to_string(), profile.output_format.clone()]);
        args.extend(output_args(&output));

        Ok(Invocation {
            program: self.tools.encoder.clone(),
            args,
            output,
        })
    }

    fn segment(&self, req: &BuildRequest<'_>, profile: &SegmentProfile) -> Invocation {
        let secs = profile.segment_duration_secs.unwrap_or(self.segment_secs).max(1);
        let dir = self.output_root.join("hls").join(format!(
            "stream_{}_{}_hls",
            req.source_id,
            profile.name.to_lowercase()
        ));
        let output = dir.join("playlist.m3u8");

        let mut args = input_args(req.input);

        for track_type in [TrackType::Video, TrackType::Audio] {
            if let Some(track) = first_track(req.tracks, track_type) {
                args.extend(["-map".to_string(), format!("0:{}", track.index)]);
            }
        }

        // Segmenting needs a uniform keyframe cadence, so copy is never an option.
        args.extend([
            "-c:v".to_string(),
            profile.video_codec.clone(),
            "-preset".to_string(),
            profile.video_preset.clone(),
            "-crf".to_string(),
            profile.video_crf.to_string(),
            "-force_key_frames".to_string(),
            format!("expr:gte(t,n_forced*{})", secs),
            "-c:a".to_string(),
            profile.audio_codec.clone(),
            "-b:a".to_string(),
            format!("{}k", profile.audio_bitrate_kbps),
            "-ac".to_string(),
            profile.audio_channels.to_string(),
            "-f".to_string(),
            "hls".to_string(),
            "-hls_time".to_string(),
            secs.to_string(),
            "-hls_playlist_type".to_string(),
            "vod".to_string(),
            "-hls_segment_filename".to_string(),
            dir.join("segment_%03d.ts").to_string_lossy().to_string(),
        ]);
        args.extend(output_args(&output));

        Invocation {
            program: self.tools.encoder.clone(),
            args,
            output,
        }
    }

    fn thumbnail(&self, req: &BuildRequest<'_>, profile: &ThumbnailProfile) -> Invocation {
        let output = self.output_root.join("thumbnails").join(format!(
            "stream_{}_{}.jpg",
            req.source_id,
            profile.name.to_lowercase()
        ));

        let mut args = strs(&["-hide_banner", "-nostdin"]);
        // Seeking before the input is a keyframe seek, fast on large files.
        args.extend([
            "-ss".to_string(),
            profile.seek_secs.to_string(),
            "-i".to_string(),
            req.input.to_string(),
        ]);
        if let Some(track) = first_track(req.tracks, TrackType::Video) {
            args.extend(["-map".to_string(), format!("0:{}", track.index)]);
        }
        args.extend([
            "-frames:v".to_string(),
            "1".to_string(),
            "-vf".to_string(),
            format!("scale={}:-2", profile.width),
            "-q:v".to_string(),
            profile.quality.to_string(),
        ]);
        args.extend(output_args(&output));

        Invocation {
            program: self.tools.encoder.clone(),
            args,
            output,
        }
    }

    fn analysis(&self, req: &BuildRequest<'_>) -> Invocation {
        let output = self
            .output_root
            .join("analysis")
            .join(format!("stream_{}.json", req.source_id));

        let mut args = strs(&[
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            "-show_chapters",
            "-o",
        ]);
        args.push(output.to_string_lossy().to_string());
        args.push(req.input.to_string());

        Invocation {
            program: self.tools.analyzer.clone(),
            args,
            output,
        }
    }
}

fn mismatch(profile: &Profile, job_type: JobType) -> Error {
    Error::ProfileMismatch {
        name: profile.name().to_string(),
        kind: profile.kind(),
        job_type,
    }
}

fn strs(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn input_args(input: &str) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-nostdin".to_string(),
        "-i".to_string(),
        input.to_string(),
    ]
}

/// Progress on stdout, overwrite, then the output path.
fn output_args(output: &Path) -> Vec<String> {
    vec![
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-y".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{THUMBNAIL_DEFAULT, WEBOS_COMPATIBLE, WEBOS_HLS, WEBOS_OPTIMIZED};

    fn builder() -> CommandBuilder {
        CommandBuilder::new(
            ToolPaths::default(),
            "/srv/out",
            ProfileRegistry::with_builtins(),
        )
    }

    fn video(width: u32, compatible: bool) -> TrackDescriptor {
        let mut t = TrackDescriptor::new(10, 5, 0, TrackType::Video);
        t.width = Some(width);
        t.compatible = compatible;
        t
    }

    fn audio(channels: u32, compatible: bool) -> TrackDescriptor {
        let mut t = TrackDescriptor::new(11, 5, 1, TrackType::Audio);
        t.channels = Some(channels);
        t.compatible = compatible;
        t
    }

    fn subtitle(compatible: bool) -> TrackDescriptor {
        let mut t = TrackDescriptor::new(12, 5, 2, TrackType::Subtitle);
        t.compatible = compatible;
        t
    }

    fn request<'a>(
        job_type: JobType,
        tracks: &'a [TrackDescriptor],
        profile: Option<&'a str>,
    ) -> BuildRequest<'a> {
        BuildRequest {
            job_type,
            source_id: SourceId::from(5),
            input: "http://origin/live/5.ts",
            tracks,
            profile,
        }
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_transcode_copies_compatible_tracks() {
        let tracks = [video(1920, true), audio(2, true), subtitle(true)];
        let inv = builder()
            .build(&request(JobType::Transcode, &tracks, Some(WEBOS_COMPATIBLE)))
            .unwrap();

        assert_eq!(inv.program, PathBuf::from("ffmpeg"));
        assert_eq!(
            inv.args,
            strs(&[
                "-hide_banner",
                "-nostdin",
                "-i",
                "http://origin/live/5.ts",
                "-map",
                "0:0",
                "-c:v",
                "copy",
                "-map",
                "0:1",
                "-c:a",
                "copy",
                "-map",
                "0:2",
                "-c:s",
                "copy",
                "-f",
                "mp4",
                "-progress",
                "pipe:1",
                "-y",
                "/srv/out/transcoded/stream_5_webos_compatible.mp4",
            ])
        );
        assert_eq!(
            inv.output,
            PathBuf::from("/srv/out/transcoded/stream_5_webos_compatible.mp4")
        );
    }

    #[test]
    fn test_transcode_reencodes_incompatible_tracks() {
        let tracks = [video(3840, false), audio(6, false), subtitle(false)];
        let inv = builder()
            .build(&request(JobType::Transcode, &tracks, Some(WEBOS_COMPATIBLE)))
            .unwrap();

        assert!(has_pair(&inv.args, "-c:v", "libx264"));
        assert!(has_pair(&inv.args, "-preset", "fast"));
        assert!(has_pair(&inv.args, "-crf", "23"));
        assert!(has_pair(&inv.args, "-vf", "scale=1920:-2"));
        assert!(has_pair(&inv.args, "-c:a", "aac"));
        assert!(has_pair(&inv.args, "-b:a", "128k"));
        assert!(has_pair(&inv.args, "-ac", "2"));
        assert!(has_pair(&inv.args, "-c:s", "mov_text"));
    }

    #[test]
    fn test_transcode_scaling_only_when_wider_than_cap() {
        let tracks = [video(1280, false)];
        let inv = builder()
            .build(&request(JobType::Transcode, &tracks, Some(WEBOS_COMPATIBLE)))
            .unwrap();
        assert!(!inv.args.iter().any(|a| a == "-vf"));
    }

    #[test]
    fn test_forced_reencode_ignores_compatibility() {
        let tracks = [video(1920, true), audio(1, true)];
        let inv = builder()
            .build(&request(JobType::Transcode, &tracks, Some(WEBOS_OPTIMIZED)))
            .unwrap();

        assert!(has_pair(&inv.args, "-c:v", "libx264"));
        assert!(has_pair(&inv.args, "-preset", "medium"));
        assert!(has_pair(&inv.args, "-vf", "scale=1280:-2"));
        assert!(has_pair(&inv.args, "-b:a", "96k"));
        // Mono stays mono.
        assert!(has_pair(&inv.args, "-ac", "1"));
        assert!(!inv.args.iter().any(|a| a == "copy"));
    }

    #[test]
    fn test_transcode_audio_only() {
        let tracks = [audio(2, false)];
        let inv = builder()
            .build(&request(JobType::Transcode, &tracks, Some(WEBOS_COMPATIBLE)))
            .unwrap();
        assert!(!inv.args.iter().any(|a| a == "-c:v"));
        assert!(has_pair(&inv.args, "-map", "0:1"));
    }

    #[test]
    fn test_transcode_without_tracks_fails() {
        let tracks = [subtitle(true)];
        let err = builder()
            .build(&request(JobType::Transcode, &tracks, Some(WEBOS_COMPATIBLE)))
            .unwrap_err();
        assert!(matches!(err, Error::NoTracks { .. }));
    }

    #[test]
    fn test_segment_always_reencodes() {
        let tracks = [video(1920, true), audio(2, true)];
        let inv = builder()
            .build(&request(JobType::Segment, &tracks, Some(WEBOS_HLS)))
            .unwrap();

        let dir = "/srv/out/hls/stream_5_webos_hls";
        assert_eq!(inv.output, PathBuf::from(format!("{dir}/playlist.m3u8")));
        assert!(has_pair(&inv.args, "-c:v", "libx264"));
        assert!(has_pair(&inv.args, "-c:a", "aac"));
        assert!(has_pair(&inv.args, "-force_key_frames", "expr:gte(t,n_forced*6)"));
        assert!(has_pair(&inv.args, "-f", "hls"));
        assert!(has_pair(&inv.args, "-hls_time", "6"));
        assert!(has_pair(&inv.args, "-hls_playlist_type", "vod"));
        assert!(has_pair(
            &inv.args,
            "-hls_segment_filename",
            &format!("{dir}/segment_%03d.ts")
        ));
        assert!(!inv.args.iter().any(|a| a == "copy"));
        assert_eq!(inv.args.last().unwrap(), &format!("{dir}/playlist.m3u8"));
    }

    #[test]
    fn test_segment_duration_falls_back_to_builder_default() {
        let mut profiles = ProfileRegistry::new();
        profiles.insert(Profile::Segment(SegmentProfile {
            name: "Plain".to_string(),
            segment_duration_secs: None,
            video_codec: "libx264".to_string(),
            video_preset: "fast".to_string(),
            video_crf: 23,
            audio_codec: "aac".to_string(),
            audio_bitrate_kbps: 128,
            audio_channels: 2,
        }));
        let builder = CommandBuilder::new(ToolPaths::default(), "/srv/out", profiles)
            .with_segment_duration(4);

        let inv = builder
            .build(&request(JobType::Segment, &[], Some("Plain")))
            .unwrap();
        assert!(has_pair(&inv.args, "-hls_time", "4"));
        assert!(!inv.args.iter().any(|a| a == "-map"));
    }

    #[test]
    fn test_thumbnail() {
        let tracks = [video(1920, true)];
        let inv = builder()
            .build(&request(JobType::Thumbnail, &tracks, Some(THUMBNAIL_DEFAULT)))
            .unwrap();
        assert!(has_pair(&inv.args, "-ss", "10"));
        assert!(has_pair(&inv.args, "-frames:v", "1"));
        assert!(has_pair(&inv.args, "-vf", "scale=320:-2"));
        assert_eq!(
            inv.output,
            PathBuf::from("/srv/out/thumbnails/stream_5_thumbnail_default.jpg")
        );
    }

    #[test]
    fn test_analysis_uses_analyzer_and_needs_no_profile() {
        let inv = builder()
            .build(&request(JobType::Analysis, &[], None))
            .unwrap();
        assert_eq!(inv.program, PathBuf::from("ffprobe"));
        assert!(has_pair(&inv.args, "-print_format", "json"));
        assert!(has_pair(&inv.args, "-o", "/srv/out/analysis/stream_5.json"));
        assert_eq!(inv.args.last().unwrap(), "http://origin/live/5.ts");
    }

    #[test]
    fn test_profile_errors() {
        let tracks = [video(1920, true)];
        let b = builder();

        let err = b
            .build(&request(JobType::Transcode, &tracks, None))
            .unwrap_err();
        assert!(matches!(err, Error::MissingProfile { .. }));

        let err = b
            .build(&request(JobType::Transcode, &tracks, Some("Nope")))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownProfile { .. }));

        let err = b
            .build(&request(JobType::Transcode, &tracks, Some(WEBOS_HLS)))
            .unwrap_err();
        assert!(matches!(err, Error::ProfileMismatch { kind: "segment", .. }));
    }

    #[test]
    fn test_build_is_deterministic() {
        let tracks = [video(3840, false), audio(6, false)];
        let b = builder();
        let req = request(JobType::Transcode, &tracks, Some(WEBOS_COMPATIBLE));
        assert_eq!(b.build(&req).unwrap(), b.build(&req).unwrap());
    }

    #[test]
    fn test_command_line_quotes_spaces() {
        let inv = Invocation {
            program: PathBuf::from("ffmpeg"),
            args: strs(&["-i", "/media/My Movie.mkv", "-y", "out.mp4"]),
            output: PathBuf::from("out.mp4"),
        };
        assert_eq!(
            inv.command_line(),
            "ffmpeg -i '/media/My Movie.mkv' -y out.mp4"
        );
    }

    #[test]
    fn test_track_selection_blob() {
        let tracks = vec![video(1920, true), audio(2, false)];
        let blob = encode_tracks(&tracks).unwrap();
        assert_eq!(decode_tracks(Some(&blob)).unwrap(), tracks);
        assert!(decode_tracks(None).unwrap().is_empty());
        assert!(decode_tracks(Some("")).unwrap().is_empty());
        assert!(decode_tracks(Some("{not json")).is_err());
    }
}
