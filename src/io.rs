use std::{
    fs::OpenOptions,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use time::{format_description::FormatItem, macros::format_description, OffsetDateTime};
use tracing::{debug, warn};

use crate::result::{bail, Result};

/// `YYYYMMDD_HHMMSS_micro`
const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year][month][day]_[hour][minute][second]_[subsecond digits:6]");

/// Whether a cached artifact can be reused: it exists and is not empty
pub fn is_nonempty_file(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

/// Remove a file, ignoring that it may not exist
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
        _ => Ok(()),
    }
}

/// Reserve a new, unique, empty file named
/// `<prefix>_<YYYYMMDD>_<HHMMSS>_<micro>.<ext>` in `dir`.
///
/// The creation is atomic, so two concurrent calls never get the same path.
/// If the name is taken, a counter is appended: `<name>_<n>.<ext>`.
pub fn reserve_timestamped(dir: &Path, prefix: &str, extension: &str) -> Result<PathBuf> {
    let stamp = OffsetDateTime::now_utc()
        .format(TIMESTAMP_FORMAT)
        .map_err(|err| crate::result::err_msg(format!("Could not format timestamp: {err}")))?;

    let mut output = dir.join(format!("{prefix}_{stamp}.{extension}"));
    if try_create_new(&output)? {
        return Ok(output);
    }

    for n in 2u16.. {
        output.set_file_name(format!("{prefix}_{stamp}_{n}.{extension}"));
        if try_create_new(&output)? {
            return Ok(output);
        }
    }

    bail("Code is broken or you have really REALLY too many outputs in the same microsecond")
}

/// Create the file only if it does not exist yet.
/// Return false if it already existed.
fn try_create_new(path: &Path) -> Result<bool> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Output file that is deleted when dropped, unless kept.
///
/// Guarantees that a failing composition never leaves a partial or empty
/// artifact that later requests could pick up.
#[derive(Debug)]
pub struct PartialOutput {
    path: PathBuf,
    keep: bool,
}

impl PartialOutput {
    pub fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mark the output as complete and return its path
    pub fn keep(mut self) -> PathBuf {
        self.keep = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for PartialOutput {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        debug!("Removing incomplete output {}", self.path.display());
        if let Err(err) = remove_if_exists(&self.path) {
            warn!("Could not remove {}: {err}", self.path.display());
        }
    }
}
