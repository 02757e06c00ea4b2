//! HTTP retrieval of page images.
//!
//! The fetcher downloads one URL, pushes the body through the
//! [normalizer](crate::normalizer) and writes the result to its destination.
//! File destinations are written to a hidden `.part` sibling first and renamed
//! only once the page is complete, so a failed fetch never leaves a truncated
//! page behind for the packager to pick up.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use log::{debug, warn};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use tokio::task::spawn_blocking;
use url::Url;

use crate::error::{Error, Result};
use crate::normalizer::{self, DEFAULT_JPEG_QUALITY, NormalizedImage};
use crate::path_utils::PartialFile;
use crate::types::ImageEncoding;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default timeout for a whole request, body included.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(120);
/// Bodies larger than this are refused (50 MiB).
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024;
/// Base delay for exponential backoff between retries.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
/// Upper bound on a single backoff delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

pub const DEFAULT_USER_AGENT: &str = concat!("comic-assembler/", env!("CARGO_PKG_VERSION"));

/// Tunables for [`ImageFetcher`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub user_agent: String,
    pub max_image_bytes: usize,
    /// Additional attempts for transient failures. `0` surfaces the first failure.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub jpeg_quality: u8,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            max_retries: 0,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// A fetch attempt failure, classified for the retry decision.
#[derive(Debug)]
enum AttemptError {
    /// Worth another try: transport errors, 5xx, 429.
    Transient(Error),
    Permanent(Error),
}

impl AttemptError {
    fn into_inner(self) -> Error {
        match self {
            AttemptError::Transient(e) | AttemptError::Permanent(e) => e,
        }
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_RETRY_DELAY)
}

/// Best-effort encoding hint from the `Content-Type` header, then the URL extension.
fn encoding_hint(content_type: Option<&str>, url: &str) -> ImageEncoding {
    let from_header = content_type
        .map(ImageEncoding::from_mime)
        .unwrap_or(ImageEncoding::Unknown);
    if from_header != ImageEncoding::Unknown {
        return from_header;
    }

    Url::parse(url)
        .ok()
        .and_then(|parsed| {
            Path::new(parsed.path())
                .extension()
                .and_then(|ext| ext.to_str())
                .map(ImageEncoding::from_mime)
        })
        .unwrap_or(ImageEncoding::Unknown)
}

/// Downloads page images over HTTP(S) and normalizes them.
///
/// Create it once per assembly and share it between tasks; the inner client
/// pools connections and is cheap to clone.
#[derive(Debug, Clone)]
pub struct ImageFetcher {
    client: Client,
    options: FetchOptions,
}

impl ImageFetcher {
    /// Builds a fetcher with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the TLS backend or client cannot be initialised.
    pub fn new(options: FetchOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(options.user_agent.clone())
            .connect_timeout(options.connect_timeout)
            .timeout(options.read_timeout)
            .build()?;
        Ok(Self { client, options })
    }

    /// Reuses an existing client, e.g. one that already carries cookies for the source.
    pub fn with_client(client: Client, options: FetchOptions) -> Self {
        Self { client, options }
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Downloads `url` and returns the raw body with an encoding hint.
    ///
    /// Transient failures are retried up to `max_retries` times with backoff.
    ///
    /// # Errors
    ///
    /// [`Error::Fetch`] carrying the URL for transport failures, non-success
    /// statuses and oversized bodies.
    pub async fn fetch_bytes(&self, url: &str) -> Result<(Vec<u8>, ImageEncoding)> {
        let mut attempt = 0;
        loop {
            match self.attempt(url).await {
                Ok(body) => return Ok(body),
                Err(AttemptError::Transient(e)) if attempt < self.options.max_retries => {
                    attempt += 1;
                    let delay = backoff_delay(self.options.retry_base_delay, attempt);
                    warn!(
                        "Transient failure fetching '{}' ({}), retry {}/{} in {:?}",
                        url, e, attempt, self.options.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into_inner()),
            }
        }
    }

    async fn attempt(&self, url: &str) -> std::result::Result<(Vec<u8>, ImageEncoding), AttemptError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AttemptError::Transient(Error::fetch(url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let error = Error::fetch(url, format!("HTTP status {}", status));
            return Err(if is_transient_status(status) {
                AttemptError::Transient(error)
            } else {
                AttemptError::Permanent(error)
            });
        }

        let max_bytes = self.options.max_image_bytes;
        if let Some(length) = response.content_length() {
            if length > max_bytes as u64 {
                return Err(AttemptError::Permanent(Error::fetch(
                    url,
                    format!("body of {} bytes exceeds limit of {} bytes", length, max_bytes),
                )));
            }
        }

        let hint = encoding_hint(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
            url,
        );

        let mut body = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AttemptError::Transient(Error::fetch(url, e)))?;
            if body.len() + chunk.len() > max_bytes {
                return Err(AttemptError::Permanent(Error::fetch(
                    url,
                    format!("body exceeds limit of {} bytes", max_bytes),
                )));
            }
            body.extend_from_slice(&chunk);
        }

        debug!("Fetched {} bytes from '{}' (hint {:?})", body.len(), url, hint);
        Ok((body, hint))
    }

    /// Downloads and normalizes `url`, returning the encoded page in memory.
    ///
    /// # Errors
    ///
    /// [`Error::Fetch`] for network problems, [`Error::Decode`] naming the URL
    /// when the body is not a decodable image.
    pub async fn fetch_normalized(&self, url: &str, target: ImageEncoding) -> Result<NormalizedImage> {
        let (body, hint) = self.fetch_bytes(url).await?;
        let quality = self.options.jpeg_quality;

        spawn_blocking(move || normalizer::normalize(&body, hint, target, quality))
            .await?
            .map_err(|e| match e {
                Error::Image(source) => Error::Decode {
                    url: url.to_string(),
                    source,
                },
                other => other,
            })
    }

    /// Downloads `url`, normalizes it to `target` and writes it to `dest`.
    ///
    /// Nothing is written to `dest` unless the page fetched and decoded.
    /// Returns the encoding of the written bytes.
    pub async fn fetch<W: Write>(
        &self,
        url: &str,
        target: ImageEncoding,
        dest: &mut W,
    ) -> Result<ImageEncoding> {
        let image = self.fetch_normalized(url, target).await?;
        dest.write_all(&image.bytes)?;
        dest.flush()?;
        Ok(image.encoding)
    }

    /// Downloads `url` into `dir/<stem>.<ext>`, where `ext` follows the written encoding.
    ///
    /// The page is written to `dir/.<stem>.part` and renamed on success. On any
    /// failure, or when the calling task is aborted mid-write, the partial file
    /// is removed.
    ///
    /// # Errors
    ///
    /// Fetch/decode errors as for [`fetch_normalized`](Self::fetch_normalized), and
    /// [`Error::Filesystem`] for write or rename failures.
    pub async fn fetch_to_file(
        &self,
        url: &str,
        target: ImageEncoding,
        dir: &Path,
        stem: &str,
    ) -> Result<PathBuf> {
        let image = self.fetch_normalized(url, target).await?;
        let final_path = dir.join(format!("{}.{}", stem, image.encoding.extension()));
        let partial = PartialFile::new(&dir.join(stem));

        // Write and rename run as one blocking job so an aborted fetch task
        // cannot leave the partial file behind.
        let destination = final_path.clone();
        spawn_blocking(move || -> Result<()> {
            std::fs::write(partial.path(), &image.bytes)
                .map_err(|e| Error::filesystem(partial.path(), e))?;
            partial
                .persist(&destination)
                .map_err(|e| Error::filesystem(&destination, e))
        })
        .await??;

        debug!("Stored '{}' as {:?}", url, final_path);
        Ok(final_path)
    }
}
