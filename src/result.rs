use std::fmt::Display;

use miette::{miette, Report};

/// Number of available tokens quoted in error messages to help correct the input
pub const AVAILABLE_SAMPLE_LEN: usize = 10;

#[derive(Debug)]
pub enum Error {
    /// No gloss token could be derived from the input text
    NoTokens {
        text: String,
        available_sample: Vec<String>,
    },

    /// None of the requested tokens resolved to a clip
    NoAssets {
        requested: Vec<String>,
        available_sample: Vec<String>,
    },

    /// Encoding, probing or writing the output failed.
    /// Any partial output has already been removed when this is returned.
    Composition(String),

    Miette(Report),
}

impl From<Report> for Error {
    fn from(err: Report) -> Self {
        Error::Miette(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Miette(Report::msg(err.to_string()))
    }
}

impl From<Error> for Report {
    fn from(err: Error) -> Self {
        match err {
            Error::NoTokens {
                text,
                available_sample,
            } => miette!(
                help = format!(
                    "try words with a clip, e.g. {}",
                    available_sample.join(", ")
                ),
                "No valid gloss tokens could be derived from {text:?}"
            ),
            Error::NoAssets {
                requested,
                available_sample,
            } => miette!(
                help = format!("available tokens include {}", available_sample.join(", ")),
                "No matching video clips found for tokens [{}]",
                requested.join(", ")
            ),
            Error::Composition(msg) => miette!("Composition failed: {msg}"),
            Error::Miette(err) => err,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NoTokens { text, .. } => {
                write!(f, "no valid gloss tokens could be derived from {text:?}")
            }
            Error::NoAssets { requested, .. } => write!(
                f,
                "no matching video clips found for tokens [{}]",
                requested.join(", ")
            ),
            Error::Composition(msg) => write!(f, "composition failed: {msg}"),
            Error::Miette(report) => write!(f, "{report}"),
        }
    }
}

impl Error {
    pub fn composition(msg: impl Into<String>) -> Self {
        Error::Composition(msg.into())
    }

    /// Whether the error comes from the caller's input rather than from the pipeline
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::NoTokens { .. })
    }

    pub fn wrap_err_with<D, F>(self, f: F) -> Error
    where
        D: Display + Send + Sync + 'static,
        F: FnOnce() -> D,
    {
        match self {
            Error::Miette(report) => Error::Miette(report.wrap_err(f())),
            err => err,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub fn err_msg(msg: impl Display + std::fmt::Debug + Send + Sync + 'static) -> Error {
    Error::Miette(Report::msg(msg))
}

pub fn bail<T>(msg: impl Display + std::fmt::Debug + Send + Sync + 'static) -> Result<T> {
    Err(err_msg(msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_tokens_report_carries_hint() {
        let err = Error::NoTokens {
            text: "!!!".to_string(),
            available_sample: vec!["book".to_string(), "apple".to_string()],
        };
        assert!(err.is_client_error());

        let report: Report = err.into();
        assert!(report.to_string().contains("!!!"));
        let help = report.help().map(|h| h.to_string()).unwrap_or_default();
        assert!(help.contains("book, apple"));
    }

    #[test]
    fn wrap_err_only_touches_reports() {
        let err = err_msg("inner").wrap_err_with(|| "outer");
        assert_eq!(err.to_string(), "outer");

        let err = Error::composition("zero frames").wrap_err_with(|| "outer");
        assert!(matches!(err, Error::Composition(_)));
        assert!(!err.is_client_error());
    }
}
