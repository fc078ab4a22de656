use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;

use crate::config::Settings;

macro_rules! arg_env {
    ($v:literal) => {
        concat!("GLOSSREEL_", $v)
    };
}

/// Turn English text into sign language videos by concatenating per-gloss clips.
///
/// Results are printed as JSON on stdout, logs go to stderr.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// The path to the TOML configuration file. A missing file means default settings
    #[arg(long, global = true, default_value = "glossreel.toml", env = arg_env!("CONFIG"))]
    pub config: PathBuf,

    /// The most verbose level of the logs
    #[arg(long, global = true, default_value_t = Level::INFO, env = arg_env!("LOG_LEVEL"))]
    pub log_level: Level,

    /// The gloss catalog, a file path or an http(s) URL
    #[arg(long, global = true, env = arg_env!("CATALOG"))]
    pub catalog: Option<String>,

    /// The directory of local `<token>.mp4` clips
    #[arg(long, global = true, env = arg_env!("CLIP_DIR"))]
    pub clip_dir: Option<PathBuf>,

    /// The directory where composed videos are written
    #[arg(long, global = true, env = arg_env!("OUTPUT_DIR"))]
    pub output_dir: Option<PathBuf>,

    /// The directory of downloaded catalog clips
    #[arg(long, global = true, env = arg_env!("CLIP_CACHE_DIR"))]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Convert a sentence into ordered gloss tokens
    Resolve {
        text: String,

        /// Only use the local tokenizer, even if a gloss service is configured
        #[arg(long)]
        no_service: bool,
    },

    /// Show the tokens of a sentence, repeats collapsed, and some available tokens
    Tokenize {
        text: String,

        #[arg(long)]
        no_service: bool,
    },

    /// Compose a video from the given tokens, without resolution
    Compose {
        #[arg(required = true)]
        tokens: Vec<String>,

        /// Playback speed multiplier
        #[arg(long, default_value_t = 1.0)]
        speed: f64,
    },

    /// Find the clip of each token, downloading it if needed, without composing
    Clips {
        #[arg(required = true)]
        tokens: Vec<String>,
    },

    /// Resolve a sentence and compose its video, reusing a previous composition of the same text
    Segment {
        text: String,

        #[arg(long)]
        no_service: bool,

        #[arg(long, default_value_t = 1.0)]
        speed: f64,
    },

    /// Compose every segment of a JSON transcript (`[{start, end, text}]`)
    Transcript {
        file: PathBuf,

        #[arg(long)]
        no_service: bool,

        #[arg(long, default_value_t = 1.0)]
        speed: f64,

        /// Number of segments composed concurrently
        #[arg(long, env = arg_env!("WORKERS"))]
        workers: Option<usize>,
    },

    /// List every available token
    Tokens,

    /// Delete every downloaded clip
    ClearCache,
}

impl Args {
    /// Override the settings with what was given on the command line
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(catalog) = &self.catalog {
            settings.catalog = Some(catalog.clone());
        }
        if let Some(dir) = &self.clip_dir {
            settings.clip_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            settings.output_dir = dir.clone();
        }
        if let Some(dir) = &self.cache_dir {
            settings.clip_cache_dir = dir.clone();
        }
        if let Command::Transcript {
            workers: Some(workers),
            ..
        } = self.command
        {
            settings.workers = Some(workers);
        }
    }
}
