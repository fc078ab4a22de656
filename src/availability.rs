use std::{collections::BTreeSet, path::Path};

use tracing::{debug, info, warn};

use crate::{catalog::Catalog, types::Token};

/// Extension of the clips stored in the local clip directory
pub const CLIP_EXTENSION: &str = "mp4";

/// Snapshot of every token for which a clip can be obtained.
///
/// Built once from the catalog and the local clip directory, never mutated
/// afterwards so that a request always sees a consistent view.
#[derive(Debug, Default, Clone)]
pub struct AvailabilityIndex {
    tokens: BTreeSet<Token>,
}

impl AvailabilityIndex {
    /// Union of the catalog glosses and of the local clip basenames.
    ///
    /// A missing catalog or unreadable directory only shrinks the index.
    pub fn build(catalog: Option<&Catalog>, clip_dir: &Path) -> Self {
        let mut tokens = BTreeSet::new();

        if let Some(catalog) = catalog {
            tokens.extend(catalog.tokens().cloned());
            debug!("{} tokens from the catalog", catalog.len());
        }

        let local = local_clip_tokens(clip_dir);
        debug!("{} tokens from {}", local.len(), clip_dir.display());
        tokens.extend(local);

        info!("{} tokens available", tokens.len());
        Self { tokens }
    }

    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .filter_map(|t| Token::new(t.as_ref()))
                .collect(),
        }
    }

    pub fn get(&self, token: &str) -> Option<&Token> {
        self.tokens.get(token)
    }

    /// Every available token, sorted
    pub fn iter(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// First tokens in sorted order, used to hint the caller in error messages
    pub fn sample(&self, n: usize) -> Vec<String> {
        self.tokens.iter().take(n).map(|t| t.to_string()).collect()
    }
}

/// Lowercased basenames of the `*.mp4` files of a directory
fn local_clip_tokens(clip_dir: &Path) -> Vec<Token> {
    let entries = match clip_dir.read_dir() {
        Ok(entries) => entries,
        Err(err) => {
            warn!("Could not read clip directory {}: {err}", clip_dir.display());
            return vec![];
        }
    };

    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(CLIP_EXTENSION))
        })
        .filter_map(|path| Token::new(path.file_stem()?.to_str()?))
        .collect()
}
