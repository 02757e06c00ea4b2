//! Core data types, enums, and reports for the comic assembly library.
//!
//! This module defines the fundamental data structures used throughout the crate:
//! - The issue aggregate (`Comic`)
//! - Enumerations for output containers and page encodings (`ComicFormat`, `ImageEncoding`)
//! - Reporting types (`AssemblyReport`, `PageFailure`)

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One comic/manga issue to be assembled.
///
/// A `Comic` is built by the caller from scraped metadata, passed once to
/// [`ComicAssembler::make_comic`](crate::ComicAssembler::make_comic) and discarded.
/// `links` order defines page order; duplicates are kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Comic {
    pub name: String,
    pub issue_number: String,
    /// Provider label or hostname. Empty means no namespace segment on disk.
    #[cfg_attr(feature = "serde", serde(default))]
    pub source: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub author: Option<String>,
    /// Raw format token, parsed into [`ComicFormat`] at assembly time.
    pub format: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub links: Vec<String>,
}

impl Comic {
    /// Creates a comic with the mandatory fields and no links.
    pub fn new(
        name: impl Into<String>,
        issue_number: impl Into<String>,
        format: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            issue_number: issue_number.into(),
            format: format.into(),
            ..Default::default()
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_links<I, S>(mut self, links: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.links = links.into_iter().map(Into::into).collect();
        self
    }
}

/// Output container for an assembled issue.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ComicFormat {
    Pdf,
    Epub,
    Cbz,
    Cbr,
}

impl ComicFormat {
    pub const ALL: [ComicFormat; 4] = [
        ComicFormat::Pdf,
        ComicFormat::Epub,
        ComicFormat::Cbz,
        ComicFormat::Cbr,
    ];

    /// File extension (and canonical token) for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ComicFormat::Pdf => "pdf",
            ComicFormat::Epub => "epub",
            ComicFormat::Cbz => "cbz",
            ComicFormat::Cbr => "cbr",
        }
    }

    /// Parses a format token.
    ///
    /// With `case_sensitive` set only the lowercase tokens are accepted, which is
    /// the strict behaviour; otherwise `"PDF"` and `"Pdf"` are accepted too.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for any token outside `pdf`, `epub`, `cbz`, `cbr`.
    pub fn parse(token: &str, case_sensitive: bool) -> Result<Self> {
        ComicFormat::ALL
            .into_iter()
            .find(|format| {
                if case_sensitive {
                    format.extension() == token
                } else {
                    format.extension().eq_ignore_ascii_case(token.trim())
                }
            })
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "Unknown comic format '{}', expected one of: pdf, epub, cbz, cbr",
                    token
                ))
            })
    }
}

impl FromStr for ComicFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ComicFormat::parse(s, false)
    }
}

impl fmt::Display for ComicFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Raster encoding of a page, as detected or as requested for normalization.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ImageEncoding {
    Png,
    #[default]
    Jpg,
    Gif,
    /// Keep the original bytes untouched (after validating that they decode).
    Raw,
    Unknown,
}

impl ImageEncoding {
    /// Maps a MIME type or bare extension to an encoding.
    ///
    /// | input | result |
    /// |---|---|
    /// | `image/png`, `png` | `Png` |
    /// | `image/jpg`, `image/jpeg`, `jpg`, `jpeg` | `Jpg` |
    /// | `image/gif`, `gif` | `Gif` |
    /// | `img` | `Raw` |
    /// | anything else | `Unknown` |
    ///
    /// MIME parameters (`; charset=...`) and case are ignored.
    pub fn from_mime(mime: &str) -> Self {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/png" | "png" => ImageEncoding::Png,
            "image/jpg" | "image/jpeg" | "jpg" | "jpeg" => ImageEncoding::Jpg,
            "image/gif" | "gif" => ImageEncoding::Gif,
            "img" => ImageEncoding::Raw,
            _ => ImageEncoding::Unknown,
        }
    }

    /// Maps a decoder-detected format back onto the supported encodings.
    pub fn from_image_format(format: image::ImageFormat) -> Self {
        match format {
            image::ImageFormat::Png => ImageEncoding::Png,
            image::ImageFormat::Jpeg => ImageEncoding::Jpg,
            image::ImageFormat::Gif => ImageEncoding::Gif,
            _ => ImageEncoding::Unknown,
        }
    }

    /// The `image` crate format for concrete encodings, `None` for `Raw`/`Unknown`.
    pub fn image_format(&self) -> Option<image::ImageFormat> {
        match self {
            ImageEncoding::Png => Some(image::ImageFormat::Png),
            ImageEncoding::Jpg => Some(image::ImageFormat::Jpeg),
            ImageEncoding::Gif => Some(image::ImageFormat::Gif),
            ImageEncoding::Raw | ImageEncoding::Unknown => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageEncoding::Png => "png",
            ImageEncoding::Jpg => "jpg",
            ImageEncoding::Gif => "gif",
            ImageEncoding::Raw => "img",
            ImageEncoding::Unknown => "bin",
        }
    }
}

/// A page that was dropped from the issue because it could not be fetched or decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PageFailure {
    /// Position of the link in `Comic::links`.
    pub index: usize,
    pub url: String,
    pub reason: String,
}

/// Outcome of a successful [`make_comic`](crate::ComicAssembler::make_comic) call.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AssemblyReport {
    pub output_path: PathBuf,
    pub format: ComicFormat,
    /// Pages written into the artifact.
    pub page_count: usize,
    /// Links rejected by the URL validator before any request was made.
    pub filtered_links: usize,
    /// Pages served from an existing scratch file instead of the network.
    pub reused_pages: usize,
    /// Pages skipped under the failure tolerance policy.
    pub failed_pages: Vec<PageFailure>,
}

impl AssemblyReport {
    /// Number of fetchable pages that were skipped because they failed.
    pub fn skipped_pages(&self) -> usize {
        self.failed_pages.len()
    }
}

/// Utility function: Determines file type and MIME type from a file path
///
/// # Returns
///
/// * `Ok((&str, &str))` - A tuple containing (file extension, MIME type)
/// * `Err(Error)` - An error if the file format is unsupported
///
/// # Supported formats
///
/// - JPEG/JPG: image/jpeg
/// - PNG: image/png
/// - GIF: image/gif
pub fn get_file_info(image_path: &Path) -> Result<(&'static str, &'static str)> {
    let extension = image_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => Ok(("jpg", "image/jpeg")),
        Some("png") => Ok(("png", "image/png")),
        Some("gif") => Ok(("gif", "image/gif")),
        _ => Err(Error::Unsupported(format!(
            "Image format {:?} of '{}'",
            extension,
            image_path.display()
        ))),
    }
}
