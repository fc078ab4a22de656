use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    availability::{AvailabilityIndex, CLIP_EXTENSION},
    fetcher::Fetcher,
    io::{is_nonempty_file, reserve_timestamped, PartialOutput},
    outside::{Concatenator, OutputSpec, VideoProber},
    result::{Error, Result, AVAILABLE_SAMPLE_LEN},
    types::{ClipInfo, CompositionMethod, OutputMetadata, Token},
};

/// File name prefix of composed videos
pub const OUTPUT_PREFIX: &str = "reverse";

/// The playback speed actually applied: non-positive or non-finite speeds play at 1x
pub fn effective_speed(speed: f64) -> f64 {
    if speed.is_finite() && speed > 0.0 {
        speed
    } else {
        1.0
    }
}

/// Where the clip of a token was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipSource {
    /// Catalog instance from the preferred source
    PreferredSource,

    /// Catalog instance from any source
    Catalog,

    /// `<clip_dir>/<token>.mp4`
    LocalDir,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocatedClip {
    pub token: Token,
    pub path: PathBuf,
    pub source: ClipSource,
}

/// The clips of a composition, in token order, and the tokens without one
#[derive(Debug, Default)]
pub struct CompositionJob {
    pub clips: Vec<LocatedClip>,
    pub missing: Vec<String>,
}

/// Finds one clip per token: preferred catalog source, any other catalog
/// source, then the local clip directory
#[derive(Debug, Clone)]
pub struct ClipLocator {
    fetcher: Arc<Fetcher>,
    clip_dir: PathBuf,
    preferred_source: Option<String>,
}

impl ClipLocator {
    pub fn new(fetcher: Arc<Fetcher>, clip_dir: PathBuf) -> Self {
        Self {
            fetcher,
            clip_dir,
            preferred_source: None,
        }
    }

    pub fn with_preferred_source(mut self, source: Option<String>) -> Self {
        self.preferred_source = source;
        self
    }

    pub fn locate(&self, tokens: &[Token]) -> CompositionJob {
        let mut job = CompositionJob::default();

        for token in tokens {
            match self.locate_one(token) {
                Some(clip) => {
                    debug!("Clip for '{token}' ({:?}): {}", clip.source, clip.path.display());
                    job.clips.push(clip);
                }
                None => {
                    warn!("No video found for '{token}' (neither catalog nor local)");
                    job.missing.push(token.to_string());
                }
            }
        }

        job
    }

    pub fn locate_one(&self, token: &Token) -> Option<LocatedClip> {
        let found = |path: PathBuf, source: ClipSource| LocatedClip {
            token: token.clone(),
            path,
            source,
        };

        let catalog = match self.preferred_source.as_deref() {
            Some(preferred) => {
                if let Some(path) = self.fetcher.get_clip_path(token, Some(preferred), 1).pop() {
                    return Some(found(path, ClipSource::PreferredSource));
                }
                // The preferred instances were already tried
                self.fetcher.get_clip_path_excluding(token, preferred)
            }
            None => self.fetcher.get_clip_path(token, None, 1).pop(),
        };
        if let Some(path) = catalog {
            return Some(found(path, ClipSource::Catalog));
        }

        let local = self.clip_dir.join(format!("{token}.{CLIP_EXTENSION}"));
        is_nonempty_file(&local).then(|| found(local, ClipSource::LocalDir))
    }
}

/// Turns ordered tokens into one video
#[derive(Debug)]
pub struct Composer {
    locator: ClipLocator,
    index: Arc<AvailabilityIndex>,
    output_dir: PathBuf,
    prober: Box<dyn VideoProber + Send>,
    stream_copy: Option<Box<dyn Concatenator + Send>>,
    reencode: Box<dyn Concatenator + Send>,
}

impl Composer {
    pub fn new(
        locator: ClipLocator,
        index: Arc<AvailabilityIndex>,
        output_dir: PathBuf,
        prober: Box<dyn VideoProber + Send>,
        reencode: Box<dyn Concatenator + Send>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&output_dir)?;
        Ok(Self {
            locator,
            index,
            output_dir,
            prober,
            stream_copy: None,
            reencode,
        })
    }

    /// Enable the lossless fast path, tried before re-encoding
    pub fn with_stream_copy(mut self, stream_copy: Box<dyn Concatenator + Send>) -> Self {
        self.stream_copy = Some(stream_copy);
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn locate(&self, tokens: &[Token]) -> CompositionJob {
        self.locator.locate(tokens)
    }

    pub fn compose(&self, tokens: &[Token]) -> Result<OutputMetadata> {
        self.compose_with_speed(tokens, 1.0)
    }

    /// Concatenate the clips of the tokens into a new uniquely named file.
    ///
    /// Tokens without a clip are skipped and listed in `missing`. Fails if no
    /// token has a clip or if nothing could be encoded, in which case no file is left behind.
    pub fn compose_with_speed(&self, tokens: &[Token], speed: f64) -> Result<OutputMetadata> {
        info!("Composing video from {} tokens", tokens.len());
        let job = self.locate(tokens);

        if job.clips.is_empty() {
            return Err(Error::NoAssets {
                requested: tokens.iter().map(|t| t.to_string()).collect(),
                available_sample: self.index.sample(AVAILABLE_SAMPLE_LEN),
            });
        }

        let (readable, skipped) = self.probe_clips(&job.clips);
        let Some((_, first)) = readable.first() else {
            return Err(Error::composition(
                "Output video had 0 frames: none of the clips could be read",
            ));
        };

        let spec = OutputSpec {
            width: first.width,
            height: first.height,
            fps: first.fps,
            speed: effective_speed(speed),
        };
        debug!("Output geometry {}x{} at {} fps", spec.width, spec.height, spec.fps);

        let output = reserve_timestamped(&self.output_dir, OUTPUT_PREFIX, CLIP_EXTENSION)
            .map_err(|err| {
                Error::composition(format!(
                    "Could not create output in {}: {err}",
                    self.output_dir.display()
                ))
            })?;
        let output = PartialOutput::new(output);

        let paths: Vec<PathBuf> = readable.iter().map(|(path, _)| path.clone()).collect();
        let method = self.concatenate(&paths, &readable, output.path(), &spec)?;

        let info = self.prober.probe(output.path()).map_err(|err| {
            Error::composition(format!("Could not read the composed video: {err}"))
        })?;
        if info.frame_count == 0 || !is_nonempty_file(output.path()) {
            return Err(Error::composition(
                "Output video had 0 frames. Check source clips and codecs",
            ));
        }

        let file_path = output.keep();
        info!(
            "Video composition complete: {} frames from {} clips ({method}) in {}",
            info.frame_count,
            paths.len(),
            file_path.display()
        );

        Ok(OutputMetadata {
            file_path,
            fps: info.fps,
            width: info.width,
            height: info.height,
            frame_count: info.frame_count,
            missing: job.missing,
            method,
            skipped_clips: skipped,
        })
    }

    /// Split the clips between readable ones, with their properties, and unreadable ones
    fn probe_clips(&self, clips: &[LocatedClip]) -> (Vec<(PathBuf, ClipInfo)>, Vec<PathBuf>) {
        let mut readable = Vec::with_capacity(clips.len());
        let mut skipped = vec![];

        for clip in clips {
            match self.prober.probe(&clip.path) {
                Ok(info) => readable.push((clip.path.clone(), info)),
                Err(err) => {
                    warn!("Skip unreadable clip of '{}' {}: {err}", clip.token, clip.path.display());
                    skipped.push(clip.path.clone());
                }
            }
        }

        (readable, skipped)
    }

    /// Stream copy when every clip shares codec and geometry, re-encoding otherwise
    /// or when the stream copy fails
    fn concatenate(
        &self,
        paths: &[PathBuf],
        clips: &[(PathBuf, ClipInfo)],
        output: &Path,
        spec: &OutputSpec,
    ) -> Result<CompositionMethod> {
        let uniform = clips
            .windows(2)
            .all(|pair| pair[0].1.is_copy_compatible(&pair[1].1));
        let same_speed = (spec.speed - 1.0).abs() <= f64::EPSILON;

        if let Some(stream_copy) = self.stream_copy.as_ref().filter(|_| uniform && same_speed) {
            match stream_copy.concatenate(paths, output, spec) {
                Ok(()) => return Ok(stream_copy.method()),
                Err(err) => warn!("Stream copy failed, re-encoding instead: {err}"),
            }
        } else {
            debug!("Stream copy not applicable, re-encoding");
        }

        self.reencode
            .concatenate(paths, output, spec)
            .map_err(|err| Error::composition(format!("{}: {err}", self.reencode.method())))?;
        Ok(self.reencode.method())
    }
}
