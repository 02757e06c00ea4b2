//! Custom error types and result handling for comic assembly.
//!
//! Every operation in this crate returns a [`Result<T>`], an alias for
//! `std::result::Result<T, Error>`. The variants mirror the stages of the
//! pipeline: configuration, fetching, decoding, filesystem work and packaging.
//!
use std::path::PathBuf;

/// Type alias for Results with comic assembly errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all comic assembly operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Invalid caller input or settings (unknown format, empty name, bad builder values).
    /// Raised before any side effect is performed.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// A page could not be downloaded (transport error, non-success status, oversized body).
    #[error("Failed to fetch '{url}': {reason}")]
    Fetch { url: String, reason: String },
    /// Downloaded bytes are not a decodable raster image.
    #[error("Failed to decode image from '{url}': {source}")]
    Decode {
        url: String,
        #[source]
        source: image::ImageError,
    },
    /// Nothing survived filtering and fetching, so there is nothing to assemble.
    #[error("Comic has no pages to assemble")]
    EmptyComic,
    /// Directory creation, scratch write or rename failure, with the failing path.
    #[error("Filesystem error at '{path:?}': {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A format generator failed mid-stream. The partial output has already been removed.
    #[error("Failed to assemble '{path:?}': {source}")]
    Assembly {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },
    /// Error for unsupported operations or formats (e.g., unknown image extension)
    #[error("Unsupported: {0}")]
    Unsupported(String),
    /// I/O errors from the standard library
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Image processing errors
    #[error(transparent)]
    Image(#[from] image::ImageError),
    /// EPUB generation errors
    #[error(transparent)]
    Epub(#[from] epub_builder::Error),
    /// ZIP file operation errors
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    /// PDF document errors
    #[error(transparent)]
    Pdf(#[from] lopdf::Error),
    /// HTTP client errors
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// Async task join errors
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Semaphore(#[from] tokio::sync::AcquireError),
    #[error(transparent)]
    AssemblerBuilder(#[from] crate::assembler::ComicAssemblerBuilderError),
}

impl Error {
    /// Wraps an I/O error together with the path it happened on.
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Builds a fetch error for `url`.
    pub fn fetch(url: impl Into<String>, reason: impl ToString) -> Self {
        Error::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error describes a single page that failed (fetch or decode),
    /// as opposed to a failure of the whole issue.
    pub fn is_page_failure(&self) -> bool {
        matches!(self, Error::Fetch { .. } | Error::Decode { .. })
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_ref())
    }
}
