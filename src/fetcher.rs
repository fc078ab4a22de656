use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::{
    availability::CLIP_EXTENSION,
    catalog::{Catalog, VideoInstance},
    io::{is_nonempty_file, remove_if_exists},
    outside::ClipDownloader,
    result::Result,
};

/// Hex digits of the raw id appended to sanitized cache names
const ID_DIGEST_LEN: usize = 8;

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Fetches catalog clips and keeps them in a disk cache, one file per video id
#[derive(Debug)]
pub struct Fetcher {
    catalog: Option<Arc<Catalog>>,
    cache_dir: PathBuf,
    downloader: Box<dyn ClipDownloader + Send>,
}

impl Fetcher {
    /// Create the fetcher, making sure the cache directory exists
    pub fn new(
        catalog: Option<Arc<Catalog>>,
        cache_dir: PathBuf,
        downloader: Box<dyn ClipDownloader + Send>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            catalog,
            cache_dir,
            downloader,
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Local paths of up to `max_count` clips of the token, downloading them if needed.
    ///
    /// Only instances from `source` are considered when it is given. Instances
    /// are walked in catalog order and failed downloads are skipped: an empty
    /// result means the token has no usable clip here.
    pub fn get_clip_path(&self, token: &str, source: Option<&str>, max_count: usize) -> Vec<PathBuf> {
        self.fetch_where(token, max_count, |instance| {
            source.map_or(true, |s| instance.source == s)
        })
    }

    /// The first clip of the token that can be fetched from any source but `source`
    pub fn get_clip_path_excluding(&self, token: &str, source: &str) -> Option<PathBuf> {
        self.fetch_where(token, 1, |instance| instance.source != source).pop()
    }

    fn fetch_where<F>(&self, token: &str, max_count: usize, accept: F) -> Vec<PathBuf>
    where
        F: Fn(&VideoInstance) -> bool,
    {
        let Some(catalog) = self.catalog.as_ref() else {
            return vec![];
        };

        catalog
            .instances(token, None)
            .into_iter()
            .filter(|instance| accept(instance))
            .filter_map(|instance| self.fetch_instance(token, instance))
            .take(max_count)
            .collect()
    }

    /// Cached file path of a video id
    pub fn cache_path(&self, video_id: &str) -> PathBuf {
        // Video ids are used as file names, keep them from escaping the cache directory
        let safe: String = video_id
            .chars()
            .map(|c| if is_safe_char(c) { c } else { '_' })
            .collect();

        // Distinct ids must not share a file once sanitized
        let name = if safe == video_id {
            safe
        } else {
            let digest = format!("{:x}", Sha256::digest(video_id.as_bytes()));
            format!("{safe}-{}", &digest[..ID_DIGEST_LEN])
        };
        self.cache_dir.join(format!("{name}.{CLIP_EXTENSION}"))
    }

    fn fetch_instance(&self, token: &str, instance: &VideoInstance) -> Option<PathBuf> {
        let cache_file = self.cache_path(&instance.video_id);

        if is_nonempty_file(&cache_file) {
            debug!("Using cached clip {}", cache_file.display());
            return Some(cache_file);
        }

        // Download next to the final file then rename, so that a concurrent
        // reader never sees a partial clip at the cache path
        let part = cache_file.with_extension(format!("{:08x}.part", fastrand::u32(..)));

        info!("Downloading '{token}' (id {}) from {}", instance.video_id, instance.url);
        let res = self
            .downloader
            .download(&instance.url, &part)
            .and_then(|size| {
                std::fs::rename(&part, &cache_file)?;
                Ok(size)
            });

        match res {
            Ok(size) => {
                info!("Downloaded '{token}' to cache ({:.2} MB)", size as f64 / (1024.0 * 1024.0));
                Some(cache_file)
            }
            Err(err) => {
                warn!("Failed to download '{token}' (id {}): {err}", instance.video_id);
                if let Err(err) = remove_if_exists(&part) {
                    warn!("Could not remove partial download {}: {err}", part.display());
                }
                None
            }
        }
    }

    /// Delete every file of the clip cache, returning how many were removed
    pub fn clear_cache(&self) -> Result<usize> {
        let mut count = 0;
        for entry in self.cache_dir.read_dir()?.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => count += 1,
                Err(err) => warn!("Failed to delete {}: {err}", path.display()),
            }
        }

        info!("Cleared cache: {count} files deleted");
        Ok(count)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::{
        catalog::tests::SAMPLE,
        result::{bail, Result},
    };

    /// Serves fixed bodies by URL, fails for any other URL
    #[derive(Debug, Default)]
    pub struct FakeDownloader {
        pub bodies: HashMap<String, Vec<u8>>,
        pub calls: Arc<AtomicUsize>,
    }

    impl FakeDownloader {
        pub fn serving<I: IntoIterator<Item = (&'static str, &'static str)>>(bodies: I) -> Self {
            Self {
                bodies: bodies
                    .into_iter()
                    .map(|(url, body)| (url.to_string(), body.as_bytes().to_vec()))
                    .collect(),
                calls: Arc::default(),
            }
        }
    }

    impl ClipDownloader for FakeDownloader {
        fn download(&self, url: &str, dest: &Path) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.bodies.get(url) {
                Some(body) => {
                    std::fs::write(dest, body)?;
                    Ok(body.len() as u64)
                }
                None => {
                    // Leave a partial file behind like an interrupted transfer
                    std::fs::write(dest, b"partial")?;
                    bail(format!("connection reset for {url}"))
                }
            }
        }
    }

    fn fetcher(dir: &Path, downloader: FakeDownloader) -> Fetcher {
        let catalog = Arc::new(Catalog::from_json(SAMPLE).unwrap());
        Fetcher::new(Some(catalog), dir.join("cache"), Box::new(downloader)).unwrap()
    }

    #[test]
    fn downloads_once_then_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = FakeDownloader::serving([("http://clips/b2.mp4", "book clip")]);
        let calls = downloader.calls.clone();
        let fetcher = fetcher(dir.path(), downloader);

        let first = fetcher.get_clip_path("book", Some("aslbrick"), 1);
        assert_eq!(first, [fetcher.cache_path("b2")]);
        assert_eq!(std::fs::read_to_string(&first[0]).unwrap(), "book clip");

        let second = fetcher.get_clip_path("book", Some("aslbrick"), 1);
        assert_eq!(first, second);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_download_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(dir.path(), FakeDownloader::default());

        assert!(fetcher.get_clip_path("apple", None, 1).is_empty());
        let leftovers: Vec<_> = fetcher.cache_dir().read_dir().unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn zero_size_cache_entry_is_downloaded_again() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(
            dir.path(),
            FakeDownloader::serving([("http://clips/a1.mp4", "apple clip")]),
        );
        std::fs::write(fetcher.cache_path("a1"), b"").unwrap();

        let paths = fetcher.get_clip_path("apple", None, 1);
        assert_eq!(std::fs::read_to_string(&paths[0]).unwrap(), "apple clip");
    }

    #[test]
    fn respects_source_and_max_count() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(
            dir.path(),
            FakeDownloader::serving([
                ("http://clips/b1.mp4", "b1"),
                ("http://clips/b2.mp4", "b2"),
            ]),
        );

        assert!(fetcher.get_clip_path("apple", Some("aslbrick"), 1).is_empty());
        assert_eq!(fetcher.get_clip_path("book", None, 1).len(), 1);
        assert_eq!(fetcher.get_clip_path("book", None, 5).len(), 2);
        assert!(fetcher.get_clip_path("unknown", None, 5).is_empty());
    }

    #[test]
    fn partial_failures_keep_successful_instances() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(
            dir.path(),
            FakeDownloader::serving([("http://clips/b2.mp4", "b2")]),
        );

        let paths = fetcher.get_clip_path("book", None, 2);
        assert_eq!(paths, [fetcher.cache_path("b2")]);
    }

    #[test]
    fn clears_cache() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(dir.path(), FakeDownloader::default());
        std::fs::write(fetcher.cache_path("x"), b"1").unwrap();
        std::fs::write(fetcher.cache_path("y"), b"2").unwrap();

        assert_eq!(fetcher.clear_cache().unwrap(), 2);
        assert_eq!(fetcher.clear_cache().unwrap(), 0);
    }

    #[test]
    fn walks_past_failed_instances() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = FakeDownloader::serving([("http://clips/b2.mp4", "b2")]);
        let calls = downloader.calls.clone();
        let fetcher = fetcher(dir.path(), downloader);

        // b1 comes first and fails
        assert_eq!(fetcher.get_clip_path("book", None, 1), [fetcher.cache_path("b2")]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn excluding_a_source_uses_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(
            dir.path(),
            FakeDownloader::serving([
                ("http://clips/b1.mp4", "b1"),
                ("http://clips/b2.mp4", "b2"),
            ]),
        );

        assert_eq!(
            fetcher.get_clip_path_excluding("book", "aslbrick"),
            Some(fetcher.cache_path("b1"))
        );
        assert_eq!(fetcher.get_clip_path_excluding("apple", "aslu"), None);
    }

    #[test]
    fn sanitized_ids_keep_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(dir.path(), FakeDownloader::default());

        assert_eq!(fetcher.cache_path("a_b"), fetcher.cache_dir().join("a_b.mp4"));
        assert_ne!(fetcher.cache_path("a.b"), fetcher.cache_path("a_b"));
        assert_ne!(fetcher.cache_path("a.b"), fetcher.cache_path("a/b"));
        assert_eq!(fetcher.cache_path("a.b"), fetcher.cache_path("a.b"));
    }

    #[test]
    fn video_ids_cannot_escape_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(dir.path(), FakeDownloader::default());
        let path = fetcher.cache_path("../../etc/passwd");
        assert_eq!(path.parent(), Some(fetcher.cache_dir()));
    }
}
