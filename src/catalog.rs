use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
};

use miette::{Context, IntoDiagnostic};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{outside::get_text, result::Result, types::Token};

/// One remotely hosted recording of a gloss
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoInstance {
    pub video_id: String,
    pub source: String,
    pub url: String,
}

#[derive(Deserialize)]
struct RawEntry {
    #[serde(default)]
    gloss: String,
    #[serde(default)]
    instances: Vec<RawInstance>,
}

#[derive(Deserialize)]
struct RawInstance {
    video_id: Option<String>,
    #[serde(default)]
    source: String,
    url: Option<String>,
}

/// Mapping from gloss to its video instances.
///
/// Read-only once loaded.
#[derive(Debug, Default)]
pub struct Catalog {
    entries: BTreeMap<Token, Vec<VideoInstance>>,
}

impl Catalog {
    /// Load the catalog from a file path or an http(s) URL
    pub fn load(location: &str, client: &Client) -> Result<Self> {
        let content = if location.starts_with("http://") || location.starts_with("https://") {
            get_text(client, location)?
        } else {
            std::fs::read_to_string(Path::new(location))
                .into_diagnostic()
                .wrap_err_with(|| format!("Could not read catalog file {location}"))?
        };

        let catalog = Self::from_json(&content)?;
        info!("Loaded {} glosses from catalog {location}", catalog.len());
        Ok(catalog)
    }

    /// Parse a WLASL-style document: `[{gloss, instances: [{video_id, source, url}]}]`
    pub fn from_json(content: &str) -> Result<Self> {
        let raw: Vec<RawEntry> = serde_json::from_str(content)
            .into_diagnostic()
            .wrap_err("Invalid catalog JSON")?;

        let mut entries: BTreeMap<Token, Vec<VideoInstance>> = BTreeMap::new();
        let mut dropped = 0usize;

        for entry in raw {
            let Some(gloss) = Token::new(&entry.gloss) else {
                continue;
            };

            let instances = entries.entry(gloss).or_default();
            let mut seen: HashSet<String> =
                instances.iter().map(|i| i.video_id.clone()).collect();

            for inst in entry.instances {
                match (inst.video_id, inst.url) {
                    (Some(video_id), Some(url)) if !video_id.is_empty() && !url.is_empty() => {
                        // video_id is unique within an entry
                        if seen.insert(video_id.clone()) {
                            instances.push(VideoInstance {
                                video_id,
                                source: inst.source,
                                url,
                            });
                        }
                    }
                    _ => dropped += 1,
                }
            }
        }

        if dropped > 0 {
            warn!("Ignored {dropped} catalog instances without url or video_id");
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.entries.keys()
    }

    /// Instances of a gloss, optionally only those from the given source.
    ///
    /// An unknown gloss yields no instance.
    pub fn instances(&self, token: &str, source: Option<&str>) -> Vec<&VideoInstance> {
        let Some(instances) = self.entries.get(token) else {
            debug!("Gloss '{token}' not found in catalog");
            return vec![];
        };

        let selected: Vec<&VideoInstance> = instances
            .iter()
            .filter(|i| source.map_or(true, |s| i.source == s))
            .collect();

        debug!(
            "Found {}/{} '{token}' instances (source: {})",
            selected.len(),
            instances.len(),
            source.unwrap_or("any")
        );
        selected
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub const SAMPLE: &str = r#"[
        {"gloss": "Book", "instances": [
            {"video_id": "b1", "source": "aslu", "url": "http://clips/b1.mp4"},
            {"video_id": "b2", "source": "aslbrick", "url": "http://clips/b2.mp4"},
            {"video_id": "b2", "source": "aslbrick", "url": "http://clips/b2-dup.mp4"}
        ]},
        {"gloss": "apple", "instances": [
            {"video_id": "a1", "source": "aslu", "url": "http://clips/a1.mp4"},
            {"video_id": "a2", "source": "aslu"}
        ]},
        {"gloss": "", "instances": []},
        {"gloss": "dog"}
    ]"#;

    #[test]
    fn parses_and_normalizes_glosses() {
        let catalog = Catalog::from_json(SAMPLE).unwrap();
        let tokens: Vec<&str> = catalog.tokens().map(|t| t.as_str()).collect();
        assert_eq!(tokens, ["apple", "book", "dog"]);
    }

    #[test]
    fn filters_by_source() {
        let catalog = Catalog::from_json(SAMPLE).unwrap();

        let brick = catalog.instances("book", Some("aslbrick"));
        assert_eq!(brick.len(), 1);
        assert_eq!(brick[0].video_id, "b2");
        assert_eq!(brick[0].url, "http://clips/b2.mp4");

        assert_eq!(catalog.instances("book", None).len(), 2);
        assert!(catalog.instances("apple", Some("aslbrick")).is_empty());
        assert!(catalog.instances("unknown", None).is_empty());
    }

    #[test]
    fn drops_incomplete_instances() {
        let catalog = Catalog::from_json(SAMPLE).unwrap();
        assert_eq!(catalog.instances("apple", None).len(), 1);
        assert!(catalog.instances("dog", None).is_empty());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let client = Client::new();
        let catalog = Catalog::load(path.to_str().unwrap(), &client).unwrap();
        assert_eq!(catalog.len(), 3);

        assert!(Catalog::load(dir.path().join("nope.json").to_str().unwrap(), &client).is_err());
    }
}
