mod command;
mod ffmpeg;
mod gloss_service;
mod http;

pub use ffmpeg::{Concatenator, Ffmpeg, OutputSpec, VideoProber};
pub use gloss_service::{GlossService, HttpGlossService};
pub use http::{build_client, get_text, ClipDownloader, HttpDownloader};
