use std::{
    ffi::OsStr,
    fmt::Debug,
    io::Write,
    path::{Path, PathBuf},
};

use miette::{Context, IntoDiagnostic};
use tracing::{debug, info, warn};

use crate::{
    result::{bail, Result},
    types::{ClipInfo, CompositionMethod, VideoCodec},
};

use super::command::{
    assert_success_command, capture_stdout, FFMPEG, FFPROBE, FFXXX_DEFAULT_ARGS,
};

/// Frame rate used when a clip does not report a usable one
pub const DEFAULT_FPS: f64 = 25.0;

/// Read the stream properties of a video file
pub trait VideoProber: Sync + Debug {
    fn probe(&self, path: &Path) -> Result<ClipInfo>;
}

/// Geometry and timing every clip is brought to on the re-encoding path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputSpec {
    pub width: u32,
    pub height: u32,
    pub fps: f64,

    /// Playback speed multiplier, 1.0 keeps the original timing
    pub speed: f64,
}

/// Join clips, in order, into one output file.
///
/// The output may hold partial data after an error, removing it is the caller's job.
pub trait Concatenator: Sync + Debug {
    fn method(&self) -> CompositionMethod;

    fn concatenate(&self, clips: &[PathBuf], output: &Path, spec: &OutputSpec) -> Result<()>;
}

/// Interface for the [ffmpeg](https://ffmpeg.org) and ffprobe programs
#[derive(Debug, Clone, Copy)]
pub struct Ffmpeg {
    codec: VideoCodec,
}

impl Ffmpeg {
    /// Verify that the `ffmpeg` and `ffprobe` binaries are reachable
    /// and detect which output codec can be used.
    pub fn probe() -> Result<Self> {
        assert_success_command(FFMPEG, |cmd| cmd.arg("-version"))?;
        assert_success_command(FFPROBE, |cmd| cmd.arg("-version"))?;

        let encoders = capture_stdout(FFMPEG, |cmd| cmd.arg("-hide_banner").arg("-encoders"))?;
        let codec = if has_encoder(&encoders, VideoCodec::H264.encoder()) {
            VideoCodec::H264
        } else {
            warn!("No H.264 encoder available, falling back to MPEG-4 part 2");
            VideoCodec::Mpeg4
        };
        info!("ffmpeg found, re-encoding with {}", codec.encoder());

        Ok(Self { codec })
    }

    pub fn stream_copy(&self) -> StreamCopy {
        StreamCopy
    }

    pub fn reencoder(&self) -> Reencode {
        Reencode { codec: self.codec }
    }
}

impl VideoProber for Ffmpeg {
    fn probe(&self, path: &Path) -> Result<ClipInfo> {
        let output = capture_stdout(FFPROBE, |cmd| {
            cmd.args(["-v", "error"])
                .args(["-select_streams", "v:0"])
                .arg("-count_packets")
                .args([
                    "-show_entries",
                    "stream=codec_name,width,height,r_frame_rate,avg_frame_rate,nb_read_packets",
                ])
                .args(["-of", "json"])
                .arg(path.as_os_str())
        })
        .map_err(|err| err.wrap_err_with(|| format!("Could not probe {}", path.display())))?;

        parse_probe_output(&output)
    }
}

/// Parse the JSON output of ffprobe for the first video stream
fn parse_probe_output(output: &str) -> Result<ClipInfo> {
    let json = serde_json::from_str::<serde_json::Value>(output)
        .into_diagnostic()
        .wrap_err("Could not parse ffprobe JSON output")?;

    let Some(stream) = json
        .get("streams")
        .and_then(|s| s.as_array())
        .and_then(|s| s.first())
    else {
        return bail("No video stream found");
    };

    let get_u64 = |k: &str| -> Option<u64> {
        let v = stream.get(k)?;
        v.as_u64().or_else(|| v.as_str()?.parse().ok())
    };

    let codec = stream
        .get("codec_name")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();
    let (Some(width), Some(height)) = (get_u64("width"), get_u64("height")) else {
        return bail("Video stream has no dimensions");
    };

    let fps = ["avg_frame_rate", "r_frame_rate"]
        .iter()
        .filter_map(|k| stream.get(*k)?.as_str())
        .filter_map(parse_rate)
        .next()
        .unwrap_or(DEFAULT_FPS);

    Ok(ClipInfo {
        codec,
        width: width as u32,
        height: height as u32,
        fps,
        frame_count: get_u64("nb_read_packets").unwrap_or(0),
    })
}

/// Parse an ffprobe rate such as `30000/1001`.
/// Return None for `0/0` and other unusable values.
fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = rate.split_once('/').unwrap_or((rate, "1"));
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    let fps = num / den;
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

fn has_encoder(encoders: &str, name: &str) -> bool {
    encoders
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(name))
}

/// Container-level concatenation with the concat demuxer, no re-encoding.
///
/// Only valid when every clip shares codec and geometry.
#[derive(Debug, Clone, Copy)]
pub struct StreamCopy;

impl Concatenator for StreamCopy {
    fn method(&self) -> CompositionMethod {
        CompositionMethod::StreamCopy
    }

    fn concatenate(&self, clips: &[PathBuf], output: &Path, _spec: &OutputSpec) -> Result<()> {
        let list = concat_list_file(clips)?;
        debug!("Concat list written to {}", list.path().display());

        assert_success_command(FFMPEG, |cmd| {
            cmd.args(FFXXX_DEFAULT_ARGS)
                .arg("-y")
                .args(["-f", "concat", "-safe", "0"])
                .args([OsStr::new("-i"), list.path().as_os_str()])
                .args(["-c", "copy"])
                .args(["-movflags", "+faststart"])
                .arg(output)
        })
    }
}

/// Write the concat demuxer input list to a temporary file.
///
/// The file is deleted when the handle is dropped.
fn concat_list_file(clips: &[PathBuf]) -> Result<tempfile::NamedTempFile> {
    let mut list = tempfile::Builder::new()
        .prefix("concat_")
        .suffix(".txt")
        .tempfile()?;

    for clip in clips {
        let path = clip.canonicalize().unwrap_or_else(|_| clip.clone());
        writeln!(list, "file '{}'", escape_concat_path(&path.to_string_lossy()))?;
    }
    list.flush()?;

    Ok(list)
}

/// Escape single quotes for the concat demuxer list syntax
fn escape_concat_path(path: &str) -> String {
    path.replace('\'', "'\\''")
}

/// Decode every clip, scale it to the output geometry and encode everything
/// into a single stream
#[derive(Debug, Clone, Copy)]
pub struct Reencode {
    pub codec: VideoCodec,
}

impl Reencode {
    fn filter_graph(n_clips: usize, spec: &OutputSpec) -> String {
        let (width, height) = even_geometry(spec.width, spec.height);
        let mut filter = String::new();

        for i in 0..n_clips {
            filter.push_str(&format!(
                "[{i}:v:0]scale={width}:{height},setsar=1,fps={fps},format=yuv420p[v{i}];",
                fps = spec.fps
            ));
        }
        for i in 0..n_clips {
            filter.push_str(&format!("[v{i}]"));
        }
        filter.push_str(&format!("concat=n={n_clips}:v=1:a=0"));

        if (spec.speed - 1.0).abs() > f64::EPSILON {
            filter.push_str(&format!("[cat];[cat]setpts=PTS/{}", spec.speed));
        }
        filter.push_str("[out]");

        filter
    }
}

impl Concatenator for Reencode {
    fn method(&self) -> CompositionMethod {
        CompositionMethod::Reencode(self.codec)
    }

    fn concatenate(&self, clips: &[PathBuf], output: &Path, spec: &OutputSpec) -> Result<()> {
        if clips.is_empty() {
            return bail("Nothing to concatenate");
        }
        let filter = Self::filter_graph(clips.len(), spec);

        assert_success_command(FFMPEG, |cmd| {
            cmd.args(FFXXX_DEFAULT_ARGS).arg("-y");
            for clip in clips {
                cmd.args([OsStr::new("-i"), clip.as_os_str()]);
            }
            cmd.args(["-filter_complex", filter.as_str()])
                .args(["-map", "[out]"])
                .arg("-an")
                .args(["-c:v", self.codec.encoder()])
                .args(["-pix_fmt", "yuv420p"])
                .args(["-movflags", "+faststart"])
                .arg(output)
        })
    }
}

/// yuv420p needs even dimensions
fn even_geometry(width: u32, height: u32) -> (u32, u32) {
    ((width & !1).max(2), (height & !1).max(2))
}
