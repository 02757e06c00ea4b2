use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::fs;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::fetcher::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_IMAGE_BYTES, DEFAULT_READ_TIMEOUT,
    DEFAULT_RETRY_BASE_DELAY, DEFAULT_USER_AGENT, FetchOptions, ImageFetcher,
};
use crate::generator::{self, GeneratorOptions, RarBackend};
use crate::normalizer::DEFAULT_JPEG_QUALITY;
use crate::path_utils::{self, is_partial_file, remove_partial};
use crate::types::{AssemblyReport, Comic, ComicFormat, ImageEncoding, PageFailure};
use crate::validator::{DEFAULT_URL_DENYLIST, UrlValidator};

/// Default number of concurrent page fetches.
pub fn default_concurrency() -> usize {
    num_cpus::get().clamp(4, 8)
}

/// Turns a list of page URLs into one comic file, built declaratively using the builder pattern.
///
/// A `ComicAssembler` holds only settings; it can be shared and reused for any
/// number of issues. Each [`make_comic`](ComicAssembler::make_comic) call owns
/// the scratch directory of its issue for the duration of the call.
///
/// ## Builder Pattern
///
/// ```rust,no_run
/// # use comic_assembler::prelude::*;
/// let assembler = ComicAssembler::builder()
///     .root_dir("./library")
///     .concurrency(4usize)
///     .max_failed_page_ratio(0.1)
///     .build()
///     .expect("Invalid configuration");
/// ```
#[derive(Debug, Clone, derive_builder::Builder)]
#[builder(setter(into, strip_option), build_fn(validate = "Self::validate"))]
pub struct ComicAssembler {
    /// Directory under which `comics/` is created. Used as given, never made absolute.
    pub root_dir: PathBuf,

    /// Maximum number of pages fetched at the same time. `1` fetches sequentially.
    #[builder(default = "default_concurrency()")]
    pub concurrency: usize,

    /// Encoding every page is converted to before packaging.
    ///
    /// - [`ImageEncoding::Jpg`]: smallest output, drops transparency
    /// - [`ImageEncoding::Png`]: lossless
    /// - [`ImageEncoding::Raw`]: keeps the downloaded bytes once they decode
    #[builder(default = "ImageEncoding::Jpg")]
    pub target_encoding: ImageEncoding,

    /// JPEG quality (1-100) used when re-encoding to JPEG.
    #[builder(default = "DEFAULT_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// Fraction of accepted pages allowed to fail before the issue is abandoned.
    ///
    /// `0.0` aborts on the first failed page. `1.0` keeps going as long as one
    /// page succeeds. Skipped pages are listed in the report.
    #[builder(default = "0.0")]
    pub max_failed_page_ratio: f64,

    /// Keep the `images-<issue>` scratch directory after a successful run.
    #[builder(default = "true")]
    pub retain_scratch_images: bool,

    /// Reuse complete scratch pages left by an earlier run instead of fetching them again.
    #[builder(default = "true")]
    pub reuse_scratch_images: bool,

    /// Match the format token exactly (`"pdf"` only) instead of case-insensitively.
    #[builder(default = "false")]
    pub case_sensitive_format: bool,

    /// Substrings that make a link ineligible, matched case-insensitively.
    #[builder(default = "DEFAULT_URL_DENYLIST.iter().map(|s| s.to_string()).collect()")]
    pub url_denylist: Vec<String>,

    /// Extra attempts for transient fetch failures (5xx, 429, transport errors).
    #[builder(default = "0")]
    pub max_retries: u32,

    #[builder(default = "DEFAULT_RETRY_BASE_DELAY")]
    pub retry_base_delay: Duration,

    #[builder(default = "DEFAULT_CONNECT_TIMEOUT")]
    pub connect_timeout: Duration,

    /// Timeout for a whole request including the body.
    #[builder(default = "DEFAULT_READ_TIMEOUT")]
    pub read_timeout: Duration,

    /// Responses larger than this many bytes count as failed pages.
    #[builder(default = "DEFAULT_MAX_IMAGE_BYTES")]
    pub max_image_bytes: usize,

    #[builder(default = "DEFAULT_USER_AGENT.to_string()")]
    pub user_agent: String,

    /// How CBR archives are produced. See [`RarBackend`].
    #[builder(default)]
    pub rar_backend: RarBackend,
}

impl ComicAssembler {
    /// Creates a new builder for configuring `ComicAssembler`.
    pub fn builder() -> ComicAssemblerBuilder {
        ComicAssemblerBuilder::default()
    }

    /// Validates `comic` without touching the filesystem or the network.
    ///
    /// Checks that the format token names a supported container and that
    /// `name` and `issue_number` are non-empty. [`make_comic`](Self::make_comic)
    /// performs the same checks first.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] describing the first problem found.
    pub fn preflight_check(&self, comic: &Comic) -> Result<ComicFormat> {
        let format = ComicFormat::parse(&comic.format, self.case_sensitive_format)?;
        if comic.name.trim().is_empty() {
            return Err(Error::Configuration("Comic name is required".to_string()));
        }
        if comic.issue_number.trim().is_empty() {
            return Err(Error::Configuration(
                "Comic issue number is required".to_string(),
            ));
        }
        Ok(format)
    }

    /// Path the artifact for `comic` would be written to. Pure.
    pub fn output_path(&self, comic: &Comic) -> Result<PathBuf> {
        let format = self.preflight_check(comic)?;
        Ok(path_utils::issue_paths(
            &self.root_dir,
            &comic.source,
            &comic.name,
            &comic.issue_number,
            format,
        )
        .output_file)
    }

    /// The link filter configured by `url_denylist`.
    pub fn validator(&self) -> UrlValidator {
        UrlValidator::new(self.url_denylist.iter())
    }

    /// Builds the HTTP fetcher configured by this assembler.
    pub fn fetcher(&self) -> Result<ImageFetcher> {
        ImageFetcher::new(FetchOptions {
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            user_agent: self.user_agent.clone(),
            max_image_bytes: self.max_image_bytes,
            max_retries: self.max_retries,
            retry_base_delay: self.retry_base_delay,
            jpeg_quality: self.jpeg_quality,
        })
    }

    fn generator_options(&self) -> GeneratorOptions {
        GeneratorOptions {
            rar_backend: self.rar_backend.clone(),
        }
    }

    /// Fetches, normalizes and packages every valid page of `comic`.
    ///
    /// The artifact is written to
    /// `<root_dir>/comics/[<source>/]<name>/<name>-<issue_number>.<format>`,
    /// replacing an earlier artifact for the same issue. Pages keep the order
    /// of `comic.links`.
    ///
    /// # Errors
    ///
    /// * [`Error::Configuration`] for an unknown format or an empty name or issue number
    /// * [`Error::EmptyComic`] when no link passes the validator, or no page survives fetching
    /// * [`Error::Fetch`] / [`Error::Decode`] for the page that exceeded `max_failed_page_ratio`
    /// * [`Error::Filesystem`] for directory, scratch or rename failures
    /// * [`Error::Assembly`] when the container could not be written
    pub async fn make_comic(&self, comic: &Comic) -> Result<AssemblyReport> {
        let format = self.preflight_check(comic)?;

        let (accepted, filtered_links) = self.validator().filter_links(&comic.links);
        if accepted.is_empty() {
            warn!(
                "No valid links for '{}' #{} ({} filtered)",
                comic.name, comic.issue_number, filtered_links
            );
            return Err(Error::EmptyComic);
        }
        info!(
            "Assembling '{}' #{} as {}: {} pages accepted, {} filtered",
            comic.name,
            comic.issue_number,
            format,
            accepted.len(),
            filtered_links
        );

        let issue_dir =
            path_utils::resolve_issue_dir(&self.root_dir, &comic.source, &comic.name).await?;
        let images_dir = path_utils::resolve_images_dir(
            &self.root_dir,
            &comic.source,
            &comic.name,
            &comic.issue_number,
        )
        .await?;

        let fetched = self.fetch_pages(accepted, &images_dir).await?;

        let mut pages = fetched.pages;
        pages.sort_by_key(|(index, _)| *index);
        if pages.is_empty() {
            return Err(Error::EmptyComic);
        }
        let page_paths: Vec<PathBuf> = pages.into_iter().map(|(_, path)| path).collect();

        let output_path =
            path_utils::file_name(&issue_dir, &comic.name, &comic.issue_number, format);
        generator::assemble(
            format,
            &page_paths,
            comic,
            &output_path,
            &self.generator_options(),
        )
        .await?;

        if !self.retain_scratch_images {
            debug!("Removing scratch directory {:?}", images_dir);
            fs::remove_dir_all(&images_dir)
                .await
                .map_err(|e| Error::filesystem(&images_dir, e))?;
        }

        let mut failed_pages = fetched.failures;
        failed_pages.sort_by_key(|failure| failure.index);

        info!(
            "Finished {:?}: {} pages, {} skipped, {} reused",
            output_path,
            page_paths.len(),
            failed_pages.len(),
            fetched.reused
        );

        Ok(AssemblyReport {
            output_path,
            format,
            page_count: page_paths.len(),
            filtered_links,
            reused_pages: fetched.reused,
            failed_pages,
        })
    }

    /// Fetches `accepted` pages into `images_dir` with bounded concurrency.
    async fn fetch_pages(
        &self,
        accepted: Vec<(usize, String)>,
        images_dir: &Path,
    ) -> Result<FetchedPages> {
        let total = accepted.len();
        let mut result = FetchedPages::default();
        let mut to_fetch = Vec::with_capacity(total);

        for (index, url) in accepted {
            let stem = scratch_stem(index, self.target_encoding);
            if self.reuse_scratch_images {
                if let Some(existing) =
                    find_scratch_page(images_dir, &stem, self.target_encoding).await
                {
                    debug!("Reusing {:?} for page {}", existing, index);
                    result.pages.push((index, existing));
                    result.reused += 1;
                    continue;
                }
            }
            to_fetch.push((index, url, stem));
        }

        if to_fetch.is_empty() {
            return Ok(result);
        }

        let fetcher = Arc::new(self.fetcher()?);
        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, url, stem) in to_fetch {
            let fetcher = Arc::clone(&fetcher);
            let semaphore = Arc::clone(&semaphore);
            let images_dir = images_dir.to_path_buf();
            let target = self.target_encoding;

            tasks.spawn(async move {
                let fetched = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        fetcher
                            .fetch_to_file(&url, target, &images_dir, &stem)
                            .await
                    }
                    Err(e) => Err(Error::Semaphore(e)),
                };
                (index, url, fetched)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    abort_fetches(&mut tasks, images_dir).await;
                    return Err(Error::Join(e));
                }
            };

            match outcome {
                (index, _, Ok(path)) => result.pages.push((index, path)),
                (index, url, Err(e)) if e.is_page_failure() => {
                    warn!("Page {} failed: {}", index, e);
                    result.failures.push(PageFailure {
                        index,
                        url,
                        reason: e.to_string(),
                    });
                    if exceeds_failure_ratio(
                        result.failures.len(),
                        total,
                        self.max_failed_page_ratio,
                    ) {
                        abort_fetches(&mut tasks, images_dir).await;
                        return Err(e);
                    }
                }
                (_, _, Err(e)) => {
                    abort_fetches(&mut tasks, images_dir).await;
                    return Err(e);
                }
            }
        }

        Ok(result)
    }
}

#[derive(Debug, Default)]
struct FetchedPages {
    pages: Vec<(usize, PathBuf)>,
    failures: Vec<PageFailure>,
    reused: usize,
}

/// Scratch file stem for the page at `index` in `Comic::links`.
///
/// Raw pages keep their downloaded encoding, so they carry a `.raw` marker to
/// stay apart from re-encoded pages of the same index and extension.
fn scratch_stem(index: usize, target: ImageEncoding) -> String {
    match target {
        ImageEncoding::Raw => format!("{:04}.raw", index),
        _ => format!("{:04}", index),
    }
}

/// `true` when `failed` out of `accepted` pages is more than the tolerated ratio.
pub(crate) fn exceeds_failure_ratio(failed: usize, accepted: usize, max_ratio: f64) -> bool {
    if accepted == 0 {
        return failed > 0;
    }
    failed as f64 / accepted as f64 > max_ratio
}

/// Looks for a complete scratch page written for the same `target` encoding.
async fn find_scratch_page(dir: &Path, stem: &str, target: ImageEncoding) -> Option<PathBuf> {
    let candidates: &[ImageEncoding] = match target {
        ImageEncoding::Raw => &[ImageEncoding::Jpg, ImageEncoding::Png, ImageEncoding::Gif],
        ImageEncoding::Jpg => &[ImageEncoding::Jpg],
        ImageEncoding::Png => &[ImageEncoding::Png],
        ImageEncoding::Gif => &[ImageEncoding::Gif],
        ImageEncoding::Unknown => &[],
    };

    for encoding in candidates {
        let path = dir.join(format!("{}.{}", stem, encoding.extension()));
        if let Ok(metadata) = fs::metadata(&path).await {
            if metadata.is_file() && metadata.len() > 0 {
                return Some(path);
            }
        }
    }
    None
}

/// Cancels in-flight fetches and removes the partial files they left behind.
async fn abort_fetches(tasks: &mut JoinSet<(usize, String, Result<PathBuf>)>, images_dir: &Path) {
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}

    let mut entries = match fs::read_dir(images_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Could not scan {:?} for partial files: {}", images_dir, e);
            return;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if is_partial_file(&path) {
            remove_partial(&path).await;
        }
    }
}

impl ComicAssemblerBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(root_dir) = &self.root_dir {
            if root_dir.as_os_str().is_empty() {
                return Err("Root directory must not be empty".to_string());
            }
        }
        if let Some(concurrency) = self.concurrency {
            if concurrency == 0 {
                return Err("Concurrency must be at least 1".to_string());
            }
        }
        if let Some(ratio) = self.max_failed_page_ratio {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(format!(
                    "max_failed_page_ratio must be between 0.0 and 1.0, got {}",
                    ratio
                ));
            }
        }
        if let Some(quality) = self.jpeg_quality {
            if !(1..=100).contains(&quality) {
                return Err(format!("jpeg_quality must be between 1 and 100, got {}", quality));
            }
        }
        if let Some(encoding) = self.target_encoding {
            if encoding == ImageEncoding::Unknown {
                return Err("target_encoding must not be Unknown".to_string());
            }
        }
        Ok(())
    }
}
