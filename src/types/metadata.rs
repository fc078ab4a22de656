use std::{fmt::Display, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Stream properties of a clip, as reported by the prober
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipInfo {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: u64,
}

impl ClipInfo {
    /// Whether both clips can be joined at the container level without re-encoding
    pub fn is_copy_compatible(&self, other: &ClipInfo) -> bool {
        self.codec == other.codec && self.width == other.width && self.height == other.height
    }
}

/// Output video codec of the re-encoding path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    H264,
    Mpeg4,
}

impl VideoCodec {
    /// Name of the ffmpeg encoder
    pub fn encoder(self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::Mpeg4 => "mpeg4",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "codec")]
pub enum CompositionMethod {
    /// Container-level concatenation, streams copied as-is
    StreamCopy,

    /// Every clip decoded, resized to the output geometry and encoded again
    Reencode(VideoCodec),
}

impl Display for CompositionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompositionMethod::StreamCopy => write!(f, "stream copy"),
            CompositionMethod::Reencode(codec) => write!(f, "re-encode ({})", codec.encoder()),
        }
    }
}

/// Result of one composition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputMetadata {
    pub file_path: PathBuf,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub frame_count: u64,
    pub missing: Vec<String>,
    pub method: CompositionMethod,

    /// Clips that were found but could not be read
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_clips: Vec<PathBuf>,
}
