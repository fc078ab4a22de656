//! The context every entry point works on: catalog, availability index,
//! resolver, fetcher, composer and segment database, built once from the
//! [`Settings`].

use std::{path::PathBuf, sync::Arc, time::Duration};

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    actors::{self, Segment, SegmentResult},
    availability::AvailabilityIndex,
    catalog::Catalog,
    composer::{ClipLocator, ClipSource, Composer},
    config::Settings,
    database::{SegmentDb, Sqlite},
    fetcher::Fetcher,
    outside::{
        build_client, Concatenator, Ffmpeg, HttpDownloader, HttpGlossService, VideoProber,
    },
    resolver::{Resolution, Resolver},
    result::{bail, Error, Result, AVAILABLE_SAMPLE_LEN},
    segment_cache::{SegmentCache, SegmentOutput},
    types::{OutputMetadata, Token},
};

/// Name of the segment database when none is configured
const DEFAULT_DATABASE: &str = "segments.sqlite";

/// The clip of a token, if it has one
#[derive(Debug, Serialize)]
pub struct ClipLookup {
    pub token: String,
    pub path: Option<PathBuf>,
    pub source: Option<ClipSource>,
}

/// Tokens of a text for display, with a hint of what else is available
#[derive(Debug, Serialize)]
pub struct TokenizeView {
    pub tokens: Vec<Token>,
    pub missing: Vec<String>,
    pub available: Vec<String>,
}

#[derive(Debug)]
pub struct Engine {
    settings: Settings,
    index: Arc<AvailabilityIndex>,
    resolver: Resolver,
    fetcher: Arc<Fetcher>,
    locator: ClipLocator,
    composer: Option<Composer>,
    db: Option<Sqlite>,
}

impl Engine {
    /// Build the text side of the pipeline.
    ///
    /// An unreachable catalog is not fatal: the index is then only made of
    /// the local clips.
    pub fn new(settings: Settings) -> Result<Self> {
        let client = build_client(Duration::from_secs(settings.http_timeout_secs))?;

        let catalog = settings.catalog.as_deref().and_then(|location| {
            match Catalog::load(location, &client) {
                Ok(catalog) => Some(Arc::new(catalog)),
                Err(err) => {
                    warn!("Catalog unavailable, using local clips only: {err}");
                    None
                }
            }
        });

        let index = Arc::new(AvailabilityIndex::build(
            catalog.as_deref(),
            &settings.clip_dir,
        ));
        if index.is_empty() {
            warn!("No token available: no catalog and no clip in {}", settings.clip_dir.display());
        }

        let mut resolver = Resolver::new(index.clone()).with_fuzzy_cutoff(settings.fuzzy_cutoff);
        if let Some(url) = settings.gloss_service_url.as_deref() {
            debug!("Using gloss service at {url}");
            let service_client =
                build_client(Duration::from_secs(settings.service_timeout_secs))?;
            resolver = resolver.with_service(Box::new(HttpGlossService::new(service_client, url)));
        }

        let fetcher = Arc::new(Fetcher::new(
            catalog,
            settings.clip_cache_dir.clone(),
            Box::new(HttpDownloader::new(client, settings.download_attempts)),
        )?);
        let locator = ClipLocator::new(fetcher.clone(), settings.clip_dir.clone())
            .with_preferred_source(settings.preferred_source.clone());

        Ok(Self {
            settings,
            index,
            resolver,
            fetcher,
            locator,
            composer: None,
            db: None,
        })
    }

    /// Add the video side of the pipeline, backed by ffmpeg
    pub fn with_video(self) -> Result<Self> {
        let ffmpeg = Ffmpeg::probe()?;

        self.with_composer(
            Box::new(ffmpeg),
            Box::new(ffmpeg.stream_copy()),
            Box::new(ffmpeg.reencoder()),
        )
    }

    /// Add the video side of the pipeline with the given video tools
    pub fn with_composer(
        mut self,
        prober: Box<dyn VideoProber + Send>,
        stream_copy: Box<dyn Concatenator + Send>,
        reencode: Box<dyn Concatenator + Send>,
    ) -> Result<Self> {
        let composer = Composer::new(
            self.locator.clone(),
            self.index.clone(),
            self.settings.output_dir.clone(),
            prober,
            reencode,
        )?
        .with_stream_copy(stream_copy);

        self.db = self.open_database();
        self.composer = Some(composer);
        Ok(self)
    }

    /// The segment database. Failing to open it only disables the token
    /// restoration of cache hits.
    fn open_database(&self) -> Option<Sqlite> {
        let path = self
            .settings
            .database
            .clone()
            .unwrap_or_else(|| self.settings.output_dir.join(DEFAULT_DATABASE));

        match Sqlite::read_or_create(&path) {
            Ok(db) => {
                match db.count() {
                    Ok(count) => debug!("Segment database {} has {count} records", path.display()),
                    Err(err) => warn!("Could not count segment records: {err}"),
                }
                Some(db)
            }
            Err(err) => {
                warn!("Segment database {} unavailable: {err}", path.display());
                None
            }
        }
    }

    pub fn resolve(&self, text: &str, use_service: bool) -> Resolution {
        self.resolver.resolve(text, use_service)
    }

    pub fn tokenize(&self, text: &str, use_service: bool) -> TokenizeView {
        let resolution = self.resolver.resolve(text, use_service);
        TokenizeView {
            tokens: resolution.display_tokens(),
            missing: resolution.missing,
            available: self.index.sample(AVAILABLE_SAMPLE_LEN),
        }
    }

    /// Every available token, sorted
    pub fn tokens(&self) -> Vec<String> {
        self.index.iter().map(|t| t.to_string()).collect()
    }

    /// Compose a caller-provided token list, without resolution
    pub fn compose_tokens<S: AsRef<str>>(&self, words: &[S], speed: f64) -> Result<OutputMetadata> {
        let tokens = self.parse_tokens(words)?;
        self.composer()?.compose_with_speed(&tokens, speed)
    }

    /// Locate the clip of each token, downloading it if needed, without composing
    pub fn clip_paths<S: AsRef<str>>(&self, words: &[S]) -> Result<Vec<ClipLookup>> {
        let tokens = self.parse_tokens(words)?;
        Ok(tokens
            .iter()
            .map(|token| match self.locator.locate_one(token) {
                Some(clip) => ClipLookup {
                    token: clip.token.to_string(),
                    path: Some(clip.path),
                    source: Some(clip.source),
                },
                None => ClipLookup {
                    token: token.to_string(),
                    path: None,
                    source: None,
                },
            })
            .collect())
    }

    pub fn compose_cached(&self, text: &str, use_service: bool, speed: f64) -> Result<SegmentOutput> {
        self.segment_cache(speed)?.compose_cached(text, use_service)
    }

    pub fn compose_transcript(
        &self,
        segments: Vec<Segment>,
        use_service: bool,
        speed: f64,
    ) -> Result<Vec<SegmentResult>> {
        let cache = self.segment_cache(speed)?;
        actors::compose_transcript(&cache, segments, self.settings.workers(), use_service)
    }

    /// Delete every downloaded clip, returning how many files were removed
    pub fn clear_cache(&self) -> Result<usize> {
        self.fetcher.clear_cache()
    }

    pub fn clip_cache_dir(&self) -> PathBuf {
        self.fetcher.cache_dir().to_path_buf()
    }

    fn parse_tokens<S: AsRef<str>>(&self, words: &[S]) -> Result<Vec<Token>> {
        let tokens: Vec<Token> = words.iter().filter_map(|w| Token::new(w.as_ref())).collect();
        if tokens.is_empty() {
            return Err(Error::NoTokens {
                text: words
                    .iter()
                    .map(|w| w.as_ref())
                    .collect::<Vec<_>>()
                    .join(" "),
                available_sample: self.index.sample(AVAILABLE_SAMPLE_LEN),
            });
        }
        Ok(tokens)
    }

    fn composer(&self) -> Result<&Composer> {
        match self.composer.as_ref() {
            Some(composer) => Ok(composer),
            None => bail("Video composition is not enabled on this engine"),
        }
    }

    fn segment_cache(&self, speed: f64) -> Result<SegmentCache<'_, Sqlite>> {
        Ok(SegmentCache::new(&self.resolver, self.composer()?, self.db.as_ref()).with_speed(speed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::tests::SAMPLE,
        composer::tests::{fake_clip, FakeConcat, FakeProber},
    };

    struct Setup {
        dir: tempfile::TempDir,
        settings: Settings,
    }

    fn setup() -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let catalog = dir.path().join("catalog.json");
        std::fs::write(&catalog, SAMPLE).unwrap();

        let clip_dir = dir.path().join("videos");
        std::fs::create_dir_all(&clip_dir).unwrap();
        std::fs::write(clip_dir.join("hello.mp4"), fake_clip(320, 240, 30, "h264")).unwrap();
        std::fs::write(clip_dir.join("world.mp4"), fake_clip(320, 240, 40, "h264")).unwrap();

        let settings = Settings {
            catalog: Some(catalog.to_string_lossy().into_owned()),
            clip_dir,
            clip_cache_dir: dir.path().join("cache"),
            output_dir: dir.path().join("outputs"),
            ..Settings::default()
        };
        Setup { dir, settings }
    }

    fn with_fakes(engine: Engine) -> Engine {
        engine
            .with_composer(
                Box::new(FakeProber),
                Box::new(FakeConcat {
                    copy: true,
                    ..FakeConcat::default()
                }),
                Box::new(FakeConcat::default()),
            )
            .unwrap()
    }

    #[test]
    fn index_joins_catalog_and_local_clips() {
        let setup = setup();
        let engine = Engine::new(setup.settings).unwrap();
        assert_eq!(engine.tokens(), ["apple", "book", "dog", "hello", "world"]);
    }

    #[test]
    fn unreachable_catalog_degrades_to_local_clips() {
        let mut setup = setup();
        setup.settings.catalog = Some(setup.dir.path().join("nope.json").display().to_string());
        let engine = Engine::new(setup.settings).unwrap();
        assert_eq!(engine.tokens(), ["hello", "world"]);
    }

    #[test]
    fn tokenize_collapses_repeats() {
        let setup = setup();
        let engine = Engine::new(setup.settings).unwrap();

        let view = engine.tokenize("Hello hello world", false);
        let tokens: Vec<&str> = view.tokens.iter().map(|t| t.as_str()).collect();
        assert_eq!(tokens, ["hello", "world"]);
        assert!(view.available.contains(&"book".to_string()));

        let res = engine.resolve("Hello hello world", false);
        assert_eq!(res.tokens.len(), 3);
    }

    #[test]
    fn video_commands_need_a_composer() {
        let setup = setup();
        let engine = Engine::new(setup.settings).unwrap();
        assert!(engine.compose_tokens(&["hello"], 1.0).is_err());
        assert!(engine.compose_cached("hello", false, 1.0).is_err());
    }

    #[test]
    fn composes_tokens_and_segments() {
        let setup = setup();
        let engine = with_fakes(Engine::new(setup.settings).unwrap());

        let meta = engine.compose_tokens(&["Hello", "zzz", "world"], 1.0).unwrap();
        assert_eq!(meta.frame_count, 70);
        assert_eq!(meta.missing, ["zzz"]);

        let err = engine.compose_tokens(&["  ", ""], 1.0).unwrap_err();
        assert!(err.is_client_error());

        let first = engine.compose_cached("hello world", false, 1.0).unwrap();
        let again = engine.compose_cached("Hello  World", false, 1.0).unwrap();
        assert!(again.cached);
        assert_eq!(first.file_path, again.file_path);
        // Restored from the segment database
        assert_eq!(again.tokens, first.tokens);
    }

    #[test]
    fn transcript_goes_through_the_segment_cache() {
        let setup = setup();
        let engine = with_fakes(Engine::new(setup.settings).unwrap());

        let segments = Segment::list_from_json(
            r#"[{"start": 0, "end": 1, "text": "hello"},
                {"start": 1, "end": 2, "text": "zzz qqq"}]"#,
        )
        .unwrap();
        let results = engine.compose_transcript(segments, false, 1.0).unwrap();
        assert!(results[0].video.is_some());
        assert!(results[1].error.is_some());
    }

    #[test]
    fn looks_up_clips_without_composing() {
        let setup = setup();
        let engine = Engine::new(setup.settings).unwrap();

        let clips = engine.clip_paths(&["Hello", "zzz", "world"]).unwrap();
        let found: Vec<(&str, Option<ClipSource>)> =
            clips.iter().map(|c| (c.token.as_str(), c.source)).collect();
        assert_eq!(
            found,
            [
                ("hello", Some(ClipSource::LocalDir)),
                ("zzz", None),
                ("world", Some(ClipSource::LocalDir)),
            ]
        );
        assert!(clips[0].path.as_ref().unwrap().ends_with("videos/hello.mp4"));
        assert!(clips[1].path.is_none());

        assert!(engine.clip_paths(&[" "]).unwrap_err().is_client_error());
    }

    #[test]
    fn clears_clip_cache() {
        let setup = setup();
        let engine = Engine::new(setup.settings).unwrap();
        std::fs::write(engine.clip_cache_dir().join("a1.mp4"), b"clip").unwrap();
        assert_eq!(engine.clear_cache().unwrap(), 1);
    }
}
