//! Filtering of scraped image URLs before anything is downloaded.
//!
//! Scraped pages routinely carry decorative images (logos, banners, animated
//! filler) next to the actual comic pages. The validator rejects those, plus
//! anything that is not an absolute HTTP(S) URL, so no request is wasted on them
//! and they never end up as pages in the output.

use url::Url;

use crate::error::{Error, Result};

/// Substrings that mark non-content assets. Matched case-insensitively.
pub const DEFAULT_URL_DENYLIST: &[&str] = &[".gif", "logo", "mobilebanner", "wp-content"];

/// Accepts or rejects candidate page URLs against a configurable denylist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlValidator {
    denylist: Vec<String>,
}

impl Default for UrlValidator {
    fn default() -> Self {
        Self::new(DEFAULT_URL_DENYLIST.iter().copied())
    }
}

impl UrlValidator {
    /// Creates a validator with exactly the given denylist entries.
    pub fn new<I, S>(denylist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            denylist: denylist
                .into_iter()
                .map(|entry| entry.into().to_ascii_lowercase())
                .filter(|entry| !entry.is_empty())
                .collect(),
        }
    }

    /// Adds one more marker to the denylist.
    pub fn with_denylist_entry(mut self, entry: impl Into<String>) -> Self {
        let entry = entry.into().to_ascii_lowercase();
        if !entry.is_empty() && !self.denylist.contains(&entry) {
            self.denylist.push(entry);
        }
        self
    }

    pub fn denylist(&self) -> &[String] {
        &self.denylist
    }

    /// Returns `true` when `url` is an absolute HTTP(S) URL that matches no denylist entry.
    pub fn is_valid(&self, url: &str) -> bool {
        let url = url.trim();
        if url.is_empty() {
            return false;
        }

        let lowered = url.to_ascii_lowercase();
        if self
            .denylist
            .iter()
            .any(|marker| lowered.contains(marker.as_str()))
        {
            return false;
        }

        match Url::parse(url) {
            Ok(parsed) => {
                matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some()
            }
            Err(_) => false,
        }
    }

    /// Splits `links` into the accepted ones (paired with their original index)
    /// and the number of rejected ones. Order of the accepted links is preserved.
    pub fn filter_links<S: AsRef<str>>(&self, links: &[S]) -> (Vec<(usize, String)>, usize) {
        let mut accepted = Vec::with_capacity(links.len());
        let mut rejected = 0;

        for (index, link) in links.iter().enumerate() {
            let link = link.as_ref();
            if self.is_valid(link) {
                accepted.push((index, link.trim().to_string()));
            } else {
                log::debug!("Skipping link #{} rejected by validator: '{}'", index, link);
                rejected += 1;
            }
        }

        (accepted, rejected)
    }
}

/// Checks `url` against the default denylist.
pub fn is_valid_url(url: &str) -> bool {
    UrlValidator::default().is_valid(url)
}

/// Extracts the hostname of `url`, suitable as a `Comic::source` label.
///
/// # Errors
///
/// Returns [`Error::Configuration`] when the URL cannot be parsed or has no host.
pub fn source_from_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url.trim())
        .map_err(|e| Error::Configuration(format!("Invalid URL '{}': {}", url, e)))?;

    parsed
        .host_str()
        .map(|host| host.to_string())
        .ok_or_else(|| Error::Configuration(format!("URL '{}' has no host", url)))
}
