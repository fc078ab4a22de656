//! Sentence to gloss tokens.
//!
//! Resolution goes through explicit tiers, each one a plain branch returning
//! a tagged [`Resolution`]: the external gloss service when enabled, then the
//! local tokenizer filtered to available tokens, then the unfiltered local
//! candidates.

mod repair;
mod tokenizer;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

pub use repair::DEFAULT_FUZZY_CUTOFF;

use repair::map_to_available;
use tokenizer::candidates;

use crate::{availability::AvailabilityIndex, outside::GlossService, types::Token};

/// Which tier produced the tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveTier {
    /// The external sentence-to-gloss service
    Service,

    /// Local tokenizer, tokens repaired against the availability index
    Local,

    /// Nothing matched the index: raw local candidates, for the caller to
    /// report which ones are missing
    Unfiltered,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub tokens: Vec<Token>,
    pub missing: Vec<String>,
    pub tier: ResolveTier,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Tokens with consecutive repeats collapsed, for display.
    ///
    /// [`Resolution::tokens`] keeps every repeat.
    pub fn display_tokens(&self) -> Vec<Token> {
        let mut tokens = self.tokens.clone();
        tokens.dedup();
        tokens
    }
}

#[derive(Debug)]
pub struct Resolver {
    index: Arc<AvailabilityIndex>,
    service: Option<Box<dyn GlossService + Send>>,
    fuzzy_cutoff: f64,
}

impl Resolver {
    pub fn new(index: Arc<AvailabilityIndex>) -> Self {
        Self {
            index,
            service: None,
            fuzzy_cutoff: DEFAULT_FUZZY_CUTOFF,
        }
    }

    pub fn with_service(mut self, service: Box<dyn GlossService + Send>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn with_fuzzy_cutoff(mut self, cutoff: f64) -> Self {
        self.fuzzy_cutoff = cutoff;
        self
    }

    pub fn index(&self) -> &AvailabilityIndex {
        &self.index
    }

    /// Convert a sentence into ordered gloss tokens.
    ///
    /// Never fails: service errors fall back to the local tokenizer.
    /// An input without any word gives an empty resolution.
    pub fn resolve(&self, sentence: &str, use_service: bool) -> Resolution {
        if use_service {
            if let Some(resolution) = self.resolve_with_service(sentence) {
                return resolution;
            }
        }

        self.resolve_locally(sentence)
    }

    /// First tier, None when the service is absent, failed or found nothing usable
    fn resolve_with_service(&self, sentence: &str) -> Option<Resolution> {
        let service = self.service.as_ref()?;

        let available: Vec<&Token> = self.index.iter().collect();
        let words = match service.sentence_to_gloss(sentence, &available) {
            Ok(words) => words,
            Err(err) => {
                warn!("Gloss service unavailable, using local tokenizer: {err}");
                return None;
            }
        };
        debug!("Gloss service returned {words:?}");

        let repaired = map_to_available(&words, &self.index, self.fuzzy_cutoff);
        if repaired.mapped.is_empty() {
            warn!("Gloss service returned no available token, using local tokenizer");
            return None;
        }

        info!("Resolved {:?} with the gloss service", sentence);
        Some(Resolution {
            tokens: repaired.tokens(),
            missing: repaired.missing,
            tier: ResolveTier::Service,
        })
    }

    fn resolve_locally(&self, sentence: &str) -> Resolution {
        let candidates = candidates(sentence);
        let repaired = map_to_available(&candidates, &self.index, self.fuzzy_cutoff);

        if !repaired.mapped.is_empty() {
            debug!("Local resolution of {sentence:?}: {:?}", repaired.mapped);
            return Resolution {
                tokens: repaired.tokens(),
                missing: repaired.missing,
                tier: ResolveTier::Local,
            };
        }

        // Nothing available: keep the raw candidates so that the caller can
        // tell which words lack a clip
        let tokens: Vec<Token> = candidates.iter().filter_map(|c| Token::new(c)).collect();
        if !tokens.is_empty() {
            warn!("No available token in {sentence:?}, returning raw candidates");
        }
        Resolution {
            missing: tokens.iter().map(|t| t.to_string()).collect(),
            tokens,
            tier: ResolveTier::Unfiltered,
        }
    }
}
