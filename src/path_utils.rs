//! Path utilities for deterministic issue layout on disk.
//!
//! Every issue lives under an injected root directory:
//!
//! ```text
//! <root>/comics/[<source>/]<name>/<name>-<issue>.<format>
//! <root>/comics/[<source>/]<name>/images-<issue>/      (scratch pages)
//! ```
//!
//! All segments coming from scraped metadata pass through [`sanitize`] so a
//! title can never escape the root or produce an unusable file name.

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use tokio::fs;

use crate::error::{Error, Result};
use crate::types::ComicFormat;

/// Top-level directory under the root that holds every assembled comic.
pub const COMICS_DIR: &str = "comics";

/// Prefix of the per-issue scratch directory.
pub const IMAGES_DIR_PREFIX: &str = "images-";

lazy_static! {
    /// Characters dropped from path segments: reserved punctuation and control characters.
    static ref UNSAFE_SEGMENT_CHARS: Regex = Regex::new(r#"[\[\]:;!?<>"|*\x00-\x1f\x7f]"#).unwrap();
}

/// Every location used by one issue, computed without touching the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuePaths {
    pub issue_dir: PathBuf,
    pub images_dir: PathBuf,
    pub output_file: PathBuf,
}

/// Makes `s` safe to use as a single path segment.
///
/// Separators become `_`, reserved punctuation is removed, surrounding
/// whitespace and trailing dots are trimmed. A result that would be empty, `.`
/// or `..` becomes `_`. Applying it twice gives the same result as applying it once.
pub fn sanitize(s: &str) -> String {
    let separated = s.replace(['/', '\\'], "_");
    let stripped = UNSAFE_SEGMENT_CHARS.replace_all(&separated, "");
    let trimmed = stripped
        .trim()
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace());

    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

fn series_dir(root: &Path, source: &str, name: &str) -> PathBuf {
    let mut dir = root.join(COMICS_DIR);
    if !source.trim().is_empty() {
        dir.push(sanitize(source));
    }
    dir.push(sanitize(name));
    dir
}

fn images_dir(root: &Path, source: &str, name: &str, issue_number: &str) -> PathBuf {
    series_dir(root, source, name).join(format!("{}{}", IMAGES_DIR_PREFIX, sanitize(issue_number)))
}

/// Computes the issue directory, scratch directory and artifact path. Pure.
pub fn issue_paths(
    root: &Path,
    source: &str,
    name: &str,
    issue_number: &str,
    format: ComicFormat,
) -> IssuePaths {
    let issue_dir = series_dir(root, source, name);
    let output_file = file_name(&issue_dir, name, issue_number, format);
    IssuePaths {
        images_dir: images_dir(root, source, name, issue_number),
        issue_dir,
        output_file,
    }
}

async fn ensure_dir(dir: PathBuf) -> Result<PathBuf> {
    fs::create_dir_all(&dir)
        .await
        .map_err(|e| Error::filesystem(&dir, e))?;
    Ok(dir)
}

/// Returns `root/comics/[source/]name/`, creating it if needed.
///
/// # Errors
///
/// Returns [`Error::Filesystem`] when the directory cannot be created.
pub async fn resolve_issue_dir(root: &Path, source: &str, name: &str) -> Result<PathBuf> {
    ensure_dir(series_dir(root, source, name)).await
}

/// Returns `root/comics/[source/]name/images-<issue_number>/`, creating it if needed.
///
/// # Errors
///
/// Returns [`Error::Filesystem`] when the directory cannot be created.
pub async fn resolve_images_dir(
    root: &Path,
    source: &str,
    name: &str,
    issue_number: &str,
) -> Result<PathBuf> {
    ensure_dir(images_dir(root, source, name, issue_number)).await
}

/// Returns `<dir>/<name>-<issue_number>.<format>`.
pub fn file_name(dir: &Path, name: &str, issue_number: &str, format: ComicFormat) -> PathBuf {
    dir.join(format!(
        "{}-{}.{}",
        sanitize(name),
        sanitize(issue_number),
        format.extension()
    ))
}

/// Sibling path used while a file is being written, renamed into place on success.
pub fn partial_path(target: &Path) -> PathBuf {
    let file_name = get_file_name_lossy(target);
    target.with_file_name(format!(".{}.part", file_name))
}

/// Whether `path` is an in-progress file produced by [`partial_path`].
pub fn is_partial_file(path: &Path) -> bool {
    let file_name = get_file_name_lossy(path);
    file_name.starts_with('.') && file_name.ends_with(".part")
}

/// Removes a partial file, logging anything but a missing file.
pub async fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove partial file {:?}: {}", path, e);
        }
    }
}

/// An in-progress file that is removed on drop unless [`persist`](Self::persist)
/// moved it into place.
///
/// Uses blocking filesystem calls, so it belongs inside `spawn_blocking`.
/// Cleanup then happens even when the task that started the write is aborted.
#[derive(Debug)]
pub struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    /// Guards the partial sibling of `target`. Nothing is created yet.
    pub fn new(target: &Path) -> Self {
        PartialFile {
            path: partial_path(target),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Renames the partial file to `target` and disarms the guard.
    pub fn persist(mut self, target: &Path) -> std::io::Result<()> {
        std::fs::rename(&self.path, target)?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not remove partial file {:?}: {}", self.path, e);
            }
        }
    }
}

/// Gets the file name from a path with fallback to lossy conversion.
pub fn get_file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Converts a path to a string with fallback to lossy conversion.
pub fn path_to_string_lossy(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
