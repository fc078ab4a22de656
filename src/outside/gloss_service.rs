use std::fmt::Debug;

use miette::{Context, IntoDiagnostic};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::{result::Result, types::Token};

/// Interface for an external sentence-to-gloss translator
pub trait GlossService: Sync + Debug {
    /// Translate a sentence into gloss words, ideally restricted to `available`.
    ///
    /// The returned words are raw: callers normalize and validate them.
    fn sentence_to_gloss(&self, sentence: &str, available: &[&Token]) -> Result<Vec<String>>;
}

#[derive(Serialize)]
struct GlossRequest<'a> {
    sentence: &'a str,
    available_tokens: &'a [&'a Token],
}

#[derive(Deserialize)]
struct GlossResponse {
    tokens: Vec<String>,
}

/// A gloss service reached with a JSON POST:
/// `{sentence, available_tokens}` -> `{tokens}`
#[derive(Debug, Clone)]
pub struct HttpGlossService {
    client: Client,
    url: String,
}

impl HttpGlossService {
    /// `client` should carry the service timeout: an expired call is handled
    /// like an unreachable service
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl GlossService for HttpGlossService {
    fn sentence_to_gloss(&self, sentence: &str, available: &[&Token]) -> Result<Vec<String>> {
        let resp: GlossResponse = self
            .client
            .post(&self.url)
            .json(&GlossRequest {
                sentence,
                available_tokens: available,
            })
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.json())
            .into_diagnostic()
            .wrap_err_with(|| format!("Gloss service at {} failed", self.url))?;

        Ok(resp.tokens)
    }
}
