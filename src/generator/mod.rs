//! Generator module provides traits and implementations for the output containers.
//!
//! Each container format (PDF, EPUB, CBZ, CBR) has one [`Generator`]
//! implementation. [`assemble`] selects the implementation for a
//! [`ComicFormat`] and drives it through its lifecycle:
//!
//! ```text
//! Created -> Opened(partial file) -> add_page(0..N) -> Finalized (renamed into place)
//!                     \______________ any error ______________/-> Aborted (partial removed)
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::fs;

use crate::error::{Error, Result};
use crate::path_utils::{partial_path, remove_partial};
use crate::types::{Comic, ComicFormat};

pub mod cbr;
pub mod cbz;
pub mod epub;
pub mod pdf;

use cbr::Cbr;
use cbz::Cbz;
use epub::EPub;
use pdf::Pdf;

/// How the CBR generator produces RAR archives.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RarBackend {
    /// Use a `rar` executable found on `PATH`, falling back to a ZIP container.
    #[default]
    Auto,
    /// Use this `rar` executable.
    Binary(PathBuf),
    /// Always write the ZIP container (logged as a fallback).
    ZipFallback,
}

impl RarBackend {
    /// Resolves the executable to use, if any.
    pub fn resolve(&self) -> Option<PathBuf> {
        match self {
            RarBackend::Auto => which::which("rar").ok(),
            RarBackend::Binary(path) => Some(path.clone()),
            RarBackend::ZipFallback => None,
        }
    }
}

/// Settings shared by every generator.
#[derive(Debug, Clone, Default)]
pub struct GeneratorOptions {
    pub rar_backend: RarBackend,
}

/// Common interface for all container generators.
///
/// The driver calls `new`, then `set_metadata` once, then `add_page` for every
/// page in reading order, and finally `save`. Implementations write only to
/// the path given to `new`; moving the result into place is the driver's job.
#[async_trait]
pub trait Generator {
    /// Creates a new generator writing to `output_file`.
    ///
    /// # Parameters
    /// * `output_file` - File to produce (the driver passes a temporary sibling of the target)
    /// * `options` - Shared generator settings
    fn new(output_file: &Path, options: &GeneratorOptions) -> Result<Self>
    where
        Self: Sized;

    /// Records issue metadata before any page is added.
    ///
    /// # Parameters
    /// * `comic` - The issue being assembled
    /// * `total_pages` - Number of pages that will follow
    async fn set_metadata(&mut self, comic: &Comic, total_pages: usize) -> Result<&mut Self>
    where
        Self: Sized;

    /// Appends the next page.
    ///
    /// # Parameters
    /// * `image_path` - Path to the image file to add as a page
    async fn add_page(&mut self, image_path: &Path) -> Result<&mut Self>
    where
        Self: Sized;

    /// Finalizes the container and flushes it to disk.
    async fn save(self) -> Result<()>;
}

async fn write_with<G>(
    pages: &[PathBuf],
    comic: &Comic,
    output_file: &Path,
    options: &GeneratorOptions,
) -> Result<()>
where
    G: Generator + Send,
{
    let mut generator = G::new(output_file, options)?;
    generator.set_metadata(comic, pages.len()).await?;
    for (index, page) in pages.iter().enumerate() {
        debug!("Writing page {} from {:?}", index + 1, page);
        generator.add_page(page).await?;
    }
    generator.save().await
}

/// Packages `pages` (in reading order) into `output_file` using the container for `format`.
///
/// The container is written to a hidden partial file next to `output_file`
/// and renamed only once complete, so the target is either a whole artifact or
/// untouched.
///
/// # Errors
///
/// * [`Error::EmptyComic`] when `pages` is empty
/// * [`Error::Assembly`] when the generator fails; the partial file is deleted first
/// * [`Error::Filesystem`] when the finished file cannot be moved into place
pub async fn assemble(
    format: ComicFormat,
    pages: &[PathBuf],
    comic: &Comic,
    output_file: &Path,
    options: &GeneratorOptions,
) -> Result<()> {
    if pages.is_empty() {
        return Err(Error::EmptyComic);
    }

    let partial = partial_path(output_file);
    info!(
        "Assembling {} pages of '{}' #{} as {}",
        pages.len(),
        comic.name,
        comic.issue_number,
        format
    );

    let written = match format {
        ComicFormat::Pdf => write_with::<Pdf>(pages, comic, &partial, options).await,
        ComicFormat::Epub => write_with::<EPub>(pages, comic, &partial, options).await,
        ComicFormat::Cbz => write_with::<Cbz>(pages, comic, &partial, options).await,
        ComicFormat::Cbr => write_with::<Cbr>(pages, comic, &partial, options).await,
    };

    if let Err(e) = written {
        warn!("Aborting {} assembly of {:?}: {}", format, output_file, e);
        remove_partial(&partial).await;
        return Err(Error::Assembly {
            path: output_file.to_path_buf(),
            source: Box::new(e),
        });
    }

    if let Err(e) = fs::rename(&partial, output_file).await {
        remove_partial(&partial).await;
        return Err(Error::filesystem(output_file, e));
    }

    info!("Wrote {:?}", output_file);
    Ok(())
}
