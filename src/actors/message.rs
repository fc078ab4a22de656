use serde::{Deserialize, Serialize};

use crate::{
    result::{Error, Result},
    segment_cache::SegmentOutput,
};

/// One transcribed utterance, times in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
    pub text: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Transcript {
    Segments(Vec<Segment>),
    Wrapped { segments: Vec<Segment> },
}

impl Segment {
    /// Read a transcript, either a bare array of segments or `{"segments": [...]}`
    pub fn list_from_json(content: &str) -> Result<Vec<Segment>> {
        let transcript: Transcript = serde_json::from_str(content)
            .map_err(|err| Error::from(miette::miette!("Invalid transcript: {err}")))?;

        Ok(match transcript {
            Transcript::Segments(segments) | Transcript::Wrapped { segments } => segments,
        })
    }
}

/// A segment and its position in the transcript
#[derive(Debug)]
pub struct SegmentJob {
    pub index: usize,
    pub segment: Segment,
}

/// Outcome of one segment: its video, or why it has none
#[derive(Debug, Serialize)]
pub struct SegmentResult {
    #[serde(skip)]
    pub index: usize,

    #[serde(flatten)]
    pub segment: Segment,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<SegmentOutput>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
