use std::path::PathBuf;

use serde::Serialize;
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use crate::{
    availability::CLIP_EXTENSION,
    composer::{effective_speed, Composer},
    database::{SegmentDb, SegmentRecord},
    io::{is_nonempty_file, remove_if_exists},
    resolver::Resolver,
    result::{Error, Result, AVAILABLE_SAMPLE_LEN},
    types::{OutputMetadata, Token},
};

/// File name prefix of cached segments
pub const SEGMENT_PREFIX: &str = "seg";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentOutput {
    pub file_path: PathBuf,
    pub cached: bool,
    pub tokens: Vec<Token>,
    pub missing: Vec<String>,

    /// Only known when the segment was composed by this call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<OutputMetadata>,
}

/// Trim, collapse whitespace runs and lowercase
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Marks speed keys. Never the first byte of UTF-8 text, so no text hashes like a speed key
const SPEED_MARKER: u8 = 0xff;

/// Hex SHA-1 of the normalized text, the name of its 1x segment
pub fn cache_key(text: &str) -> String {
    speed_key(text, 1.0)
}

/// Hex SHA-1 of the normalized text and of the speed when it is not 1x
pub fn speed_key(text: &str, speed: f64) -> String {
    let mut hasher = Sha1::new();
    let speed = effective_speed(speed);
    if (speed - 1.0).abs() > f64::EPSILON {
        hasher.update([SPEED_MARKER]);
        hasher.update(speed.to_bits().to_le_bytes());
    }
    hasher.update(normalize(text).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Content-addressed resolve + compose: every distinct normalized text is
/// composed once, later requests reuse `<output_dir>/seg_<key>.mp4`
#[derive(Debug)]
pub struct SegmentCache<'a, D> {
    resolver: &'a Resolver,
    composer: &'a Composer,
    db: Option<&'a D>,
    speed: f64,
}

impl<'a, D: SegmentDb> SegmentCache<'a, D> {
    pub fn new(resolver: &'a Resolver, composer: &'a Composer, db: Option<&'a D>) -> Self {
        Self {
            resolver,
            composer,
            db,
            speed: 1.0,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Key of a segment. A speed change produces another video, hence another key.
    pub fn key(&self, text: &str) -> String {
        speed_key(text, self.speed)
    }

    pub fn segment_path(&self, key: &str) -> PathBuf {
        self.composer
            .output_dir()
            .join(format!("{SEGMENT_PREFIX}_{key}.{CLIP_EXTENSION}"))
    }

    pub fn compose_cached(&self, text: &str, use_service: bool) -> Result<SegmentOutput> {
        let key = self.key(text);
        let path = self.segment_path(&key);

        if is_nonempty_file(&path) {
            info!("Segment cache hit for {:?}", normalize(text));
            let record = self.lookup(&key);
            return Ok(SegmentOutput {
                file_path: path,
                cached: true,
                tokens: record.tokens.iter().filter_map(|t| Token::new(t)).collect(),
                missing: record.missing,
                metadata: None,
            });
        }

        if path.exists() {
            warn!("Discarding empty segment {}", path.display());
            remove_if_exists(&path)?;
            if let Some(db) = self.db {
                if let Err(err) = db.forget(&key) {
                    warn!("Could not forget segment {key}: {err}");
                }
            }
        }

        let resolution = self.resolver.resolve(text, use_service);
        if resolution.is_empty() {
            return Err(Error::NoTokens {
                text: text.to_string(),
                available_sample: self.resolver.index().sample(AVAILABLE_SAMPLE_LEN),
            });
        }
        debug!("Segment {key} resolved to {:?}", resolution.tokens);

        let metadata = self
            .composer
            .compose_with_speed(&resolution.tokens, self.speed)?;

        let file_path = match std::fs::rename(&metadata.file_path, &path) {
            Ok(()) => path,
            Err(err) => {
                warn!(
                    "Could not move {} to {}, serving it as is: {err}",
                    metadata.file_path.display(),
                    path.display()
                );
                metadata.file_path.clone()
            }
        };

        let mut missing = resolution.missing;
        missing.extend(metadata.missing.iter().cloned());

        if let Some(db) = self.db {
            let record = SegmentRecord {
                tokens: resolution.tokens.iter().map(|t| t.to_string()).collect(),
                missing: missing.clone(),
            };
            if let Err(err) = db.record(&key, &record) {
                warn!("Could not record segment {key}: {err}");
            }
        }

        Ok(SegmentOutput {
            file_path,
            cached: false,
            tokens: resolution.tokens,
            missing,
            metadata: Some(metadata),
        })
    }

    /// Record of a cached segment, empty when unknown
    fn lookup(&self, key: &str) -> SegmentRecord {
        let Some(db) = self.db else {
            return SegmentRecord::default();
        };

        match db.lookup(key) {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("Segment {key} has no record");
                SegmentRecord::default()
            }
            Err(err) => {
                warn!("Could not read record of segment {key}: {err}");
                SegmentRecord::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{atomic::Ordering, Arc};

    use super::*;
    use crate::{
        availability::AvailabilityIndex,
        composer::tests::{fake_clip, Fixture},
        database::Sqlite,
    };

    fn setup() -> (Fixture, Composer, Resolver) {
        let fx = Fixture::new();
        fx.add_local_clip("hello", &fake_clip(320, 240, 30, "h264"));
        fx.add_local_clip("world", &fake_clip(320, 240, 40, "h264"));
        let composer = fx.composer(false, false);
        let resolver = Resolver::new(Arc::new(AvailabilityIndex::from_tokens(["hello", "world"])));
        (fx, composer, resolver)
    }

    fn strs(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.as_str()).collect()
    }

    #[test]
    fn keys_are_deterministic_hex() {
        let key = cache_key("  Hello   World ");
        assert_eq!(key, cache_key("hello world"));
        assert_ne!(key, cache_key("hello worlds"));
        assert_eq!(key.len(), 40);
        // Same name as any other cache directory keyed by SHA-1 of the text
        assert_eq!(cache_key("Hello"), "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn normalized_texts_are_composed_once() {
        let (fx, composer, resolver) = setup();
        let db = Sqlite::in_memory().unwrap();
        let cache = SegmentCache::new(&resolver, &composer, Some(&db));

        let first = cache.compose_cached("  Hello   World ", false).unwrap();
        assert!(!first.cached);
        assert_eq!(first.metadata.as_ref().unwrap().frame_count, 70);

        let second = cache.compose_cached("hello world", false).unwrap();
        assert!(second.cached);
        assert_eq!(first.file_path, second.file_path);
        assert_eq!(strs(&second.tokens), ["hello", "world"]);

        let name = second.file_path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name, format!("seg_{}.mp4", cache_key("hello world")));

        assert_eq!(fx.copy_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.output_files(), [second.file_path]);
    }

    #[test]
    fn hits_without_record_have_no_tokens() {
        let (_fx, composer, resolver) = setup();
        let cache: SegmentCache<Sqlite> = SegmentCache::new(&resolver, &composer, None);

        cache.compose_cached("hello", false).unwrap();
        let hit = cache.compose_cached("hello", false).unwrap();
        assert!(hit.cached);
        assert!(hit.tokens.is_empty());
    }

    #[test]
    fn zero_size_segment_is_regenerated() {
        let (fx, composer, resolver) = setup();
        let cache: SegmentCache<Sqlite> = SegmentCache::new(&resolver, &composer, None);

        let path = cache.segment_path(&cache.key("hello"));
        std::fs::write(&path, b"").unwrap();

        let out = cache.compose_cached("hello", false).unwrap();
        assert!(!out.cached);
        assert_eq!(out.file_path, path);
        assert!(is_nonempty_file(&path));
        assert_eq!(fx.copy_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn discarded_segment_loses_its_record() {
        let (_fx, composer, resolver) = setup();
        let db = Sqlite::in_memory().unwrap();
        let cache = SegmentCache::new(&resolver, &composer, Some(&db));

        let key = cache.key("zzz");
        let stale = SegmentRecord {
            tokens: vec!["zzz".to_string()],
            missing: vec![],
        };
        db.record(&key, &stale).unwrap();
        std::fs::write(cache.segment_path(&key), b"").unwrap();

        assert!(cache.compose_cached("zzz", false).is_err());
        assert!(!cache.segment_path(&key).exists());
        assert_eq!(db.lookup(&key).unwrap(), None);
        assert_eq!(db.count().unwrap(), 0);
    }

    #[test]
    fn text_without_tokens_is_a_client_error() {
        let (fx, composer, resolver) = setup();
        let cache: SegmentCache<Sqlite> = SegmentCache::new(&resolver, &composer, None);

        let err = cache.compose_cached("?! ...", false).unwrap_err();
        assert!(err.is_client_error());
        assert!(fx.output_files().is_empty());
    }

    #[test]
    fn speed_keys_cannot_be_reached_through_text() {
        let (fx, composer, resolver) = setup();
        let normal: SegmentCache<Sqlite> = SegmentCache::new(&resolver, &composer, None);
        let fast: SegmentCache<Sqlite> =
            SegmentCache::new(&resolver, &composer, None).with_speed(1.5);

        assert_ne!(fast.key("hello"), normal.key("hello @1.5"));
        assert_ne!(fast.key("hello"), normal.key("hello"));

        let sped_up = fast.compose_cached("hello", false).unwrap();
        let plain = normal.compose_cached("hello @1.5", false).unwrap();
        assert!(!plain.cached);
        assert_ne!(sped_up.file_path, plain.file_path);
        assert_eq!(fx.reencode_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.copy_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unusable_speeds_share_the_normal_key() {
        let (_fx, composer, resolver) = setup();
        let normal: SegmentCache<Sqlite> = SegmentCache::new(&resolver, &composer, None);

        for speed in [-2.0, 0.0, f64::NAN, f64::INFINITY] {
            let cache: SegmentCache<Sqlite> =
                SegmentCache::new(&resolver, &composer, None).with_speed(speed);
            assert_eq!(cache.key("hello"), normal.key("hello"), "speed {speed}");
        }
    }

    #[test]
    fn speed_is_part_of_the_key() {
        let (fx, composer, resolver) = setup();
        let normal: SegmentCache<Sqlite> = SegmentCache::new(&resolver, &composer, None);
        let fast: SegmentCache<Sqlite> =
            SegmentCache::new(&resolver, &composer, None).with_speed(1.5);

        let a = normal.compose_cached("hello", false).unwrap();
        let b = fast.compose_cached("hello", false).unwrap();
        assert_ne!(a.file_path, b.file_path);
        assert!(!b.cached);
        assert_eq!(fx.reencode_calls.load(Ordering::SeqCst), 1);
    }
}
