use std::{fmt::Debug, fs::File, path::Path, time::Duration};

use miette::{Context, IntoDiagnostic};
use reqwest::blocking::Client;
use tracing::{debug, warn};

use crate::result::{bail, Result};

/// Interface for fetching remote clips
pub trait ClipDownloader: Sync + Debug {
    /// Stream the resource at `url` into the file `dest`, returning the number of bytes written.
    ///
    /// On error, `dest` may contain partial data that the caller must discard.
    fn download(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Build the blocking HTTP client shared by every remote call
pub fn build_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .into_diagnostic()
        .wrap_err("Could not build HTTP client")?)
}

/// GET a document as text
pub fn get_text(client: &Client, url: &str) -> Result<String> {
    Ok(client
        .get(url)
        .send()
        .and_then(|resp| resp.error_for_status())
        .and_then(|resp| resp.text())
        .into_diagnostic()
        .wrap_err_with(|| format!("Could not fetch {url}"))?)
}

/// Downloads clips over HTTP, retrying transient failures with a jittered backoff
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
    attempts: usize,
}

impl HttpDownloader {
    pub fn new(client: Client, attempts: usize) -> Self {
        Self {
            client,
            attempts: attempts.max(1),
        }
    }

    fn try_download(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut resp = self
            .client
            .get(url)
            .send()
            .and_then(|resp| resp.error_for_status())
            .into_diagnostic()?;

        // Truncates what a previous attempt may have left
        let mut file = File::create(dest)?;
        let written = resp.copy_to(&mut file).into_diagnostic()?;
        if written == 0 {
            return bail(format!("Empty response body from {url}"));
        }
        Ok(written)
    }
}

impl ClipDownloader for HttpDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut delay_ms = 150u64;

        for attempt in 1..=self.attempts {
            match self.try_download(url, dest) {
                Ok(n) => return Ok(n),
                Err(err) if attempt < self.attempts => {
                    warn!("Download attempt {attempt}/{} of {url} failed: {err}", self.attempts);
                    let jitter = fastrand::u64(0..50);
                    std::thread::sleep(Duration::from_millis(delay_ms + jitter));
                    delay_ms = (delay_ms * 2).min(1200);
                }
                Err(err) => {
                    debug!("Giving up on {url}");
                    return Err(err.wrap_err_with(|| format!("Could not download {url}")));
                }
            }
        }

        bail("Retry attempts exhausted")
    }
}
