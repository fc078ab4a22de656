use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use miette::{Context, IntoDiagnostic, Result};
use serde::Deserialize;

use crate::resolver::DEFAULT_FUZZY_CUTOFF;

/// Prefix of the environment variables overriding the configuration file
pub const ENV_PREFIX: &str = "GLOSSREEL";

/// Runtime settings of the pipeline.
///
/// Loaded from the defaults below, then an optional TOML file,
/// then `GLOSSREEL_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Gloss catalog location, either a file path or an http(s) URL
    pub catalog: Option<String>,

    /// Directory of `<token>.mp4` clips
    pub clip_dir: PathBuf,

    /// Where downloaded catalog clips are stored, one file per video id
    pub clip_cache_dir: PathBuf,

    /// Where composed videos are written
    pub output_dir: PathBuf,

    /// Catalog source tried first for every token
    pub preferred_source: Option<String>,

    /// Endpoint of the sentence-to-gloss service
    pub gloss_service_url: Option<String>,

    pub http_timeout_secs: u64,
    pub service_timeout_secs: u64,
    pub download_attempts: usize,

    /// Minimum similarity for the approximate token match
    pub fuzzy_cutoff: f64,

    /// SQLite file remembering the tokens of composed segments
    pub database: Option<PathBuf>,

    /// Number of concurrent segment workers in transcript mode
    pub workers: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            catalog: None,
            clip_dir: PathBuf::from("videos"),
            clip_cache_dir: std::env::temp_dir().join("asl_video_cache"),
            output_dir: PathBuf::from("outputs"),
            preferred_source: Some("aslbrick".to_string()),
            gloss_service_url: None,
            http_timeout_secs: 30,
            service_timeout_secs: 10,
            download_attempts: 2,
            fuzzy_cutoff: DEFAULT_FUZZY_CUTOFF,
            database: None,
            workers: None,
        }
    }
}

impl Settings {
    /// Read the settings from an optional TOML file and the environment.
    ///
    /// A missing file is not an error: the defaults are used instead.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }

        builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .into_diagnostic()
            .wrap_err("Could not read configuration")?
            .try_deserialize()
            .into_diagnostic()
            .wrap_err("Invalid configuration")
    }

    /// Number of segment workers, defaulting to the available parallelism
    pub fn workers(&self) -> usize {
        self.workers
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1)
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glossreel.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "clip_dir = \"/srv/clips\"").unwrap();
        writeln!(file, "fuzzy_cutoff = 0.9").unwrap();
        writeln!(file, "preferred_source = \"aslu\"").unwrap();
        drop(file);

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.clip_dir, PathBuf::from("/srv/clips"));
        assert_eq!(settings.fuzzy_cutoff, 0.9);
        assert_eq!(settings.preferred_source.as_deref(), Some("aslu"));
        assert_eq!(settings.http_timeout_secs, 30);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(settings.output_dir, PathBuf::from("outputs"));
        assert_eq!(settings.download_attempts, 2);
        assert!(settings.workers() >= 1);
    }
}
