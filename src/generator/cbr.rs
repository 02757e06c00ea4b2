use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::generator::cbz::{Cbz, page_entry_name, page_name_width};
use crate::generator::{Generator, GeneratorOptions};
use crate::path_utils::{get_file_name_lossy, path_to_string_lossy};
use crate::types::{Comic, get_file_info};
use async_trait::async_trait;
use log::{debug, warn};
use tokio::fs;
use tokio::process::Command;

/// File name rar writes inside the staging directory before the driver moves it.
const STAGED_ARCHIVE: &str = "archive.cbr";
const COMMENT_FILE: &str = "comment.txt";

/// Pages staged for an external `rar` run.
struct RarJob {
    binary: PathBuf,
    staging_dir: PathBuf,
    output_file: PathBuf,
    entries: Vec<PathBuf>,
    comment: String,
    name_width: usize,
}

impl Drop for RarJob {
    fn drop(&mut self) {
        if self.staging_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.staging_dir) {
                warn!("Could not remove staging directory {:?}: {}", self.staging_dir, e);
            }
        }
    }
}

enum Backend {
    Rar(RarJob),
    Zip(Cbz),
}

/// A generator for CBR (Comic Book RAR) files.
///
/// RAR archives can only be written by the proprietary `rar` tool. When it is
/// available pages are staged under their final entry names and archived in
/// one `rar` run on save. Without it the pages are written as a ZIP container
/// under the `.cbr` name, which every common comic reader accepts.
pub struct Cbr {
    backend: Backend,
}

impl Cbr {
    /// `true` when the archive is produced by an external `rar` executable.
    pub fn uses_rar(&self) -> bool {
        matches!(self.backend, Backend::Rar(_))
    }
}

#[async_trait]
impl Generator for Cbr {
    fn new(output_file: &Path, options: &GeneratorOptions) -> Result<Self> {
        let backend = match options.rar_backend.resolve() {
            Some(binary) => {
                let staging_dir = output_file.with_file_name(format!(
                    ".{}.staging",
                    get_file_name_lossy(output_file)
                ));
                std::fs::create_dir_all(&staging_dir)
                    .map_err(|e| Error::filesystem(&staging_dir, e))?;
                debug!("Staging CBR pages for {:?} in {:?}", binary, staging_dir);

                Backend::Rar(RarJob {
                    binary,
                    staging_dir,
                    output_file: output_file.to_path_buf(),
                    entries: Vec::new(),
                    comment: String::new(),
                    name_width: page_name_width(0),
                })
            }
            None => {
                warn!(
                    "No rar executable available, writing {:?} as a ZIP container",
                    output_file
                );
                let file = std::fs::File::create(output_file)
                    .map_err(|e| Error::filesystem(output_file, e))?;
                Backend::Zip(Cbz::from_file(file))
            }
        };

        Ok(Cbr { backend })
    }

    async fn set_metadata(&mut self, comic: &Comic, total_pages: usize) -> Result<&mut Self> {
        match &mut self.backend {
            Backend::Rar(job) => {
                job.comment = comic.name.clone();
                job.name_width = page_name_width(total_pages);
            }
            Backend::Zip(cbz) => {
                cbz.set_metadata(comic, total_pages).await?;
            }
        }
        Ok(self)
    }

    async fn add_page(&mut self, image_path: &Path) -> Result<&mut Self> {
        match &mut self.backend {
            Backend::Rar(job) => {
                let (image_extension, _) = get_file_info(image_path)?;
                let entry = job.staging_dir.join(page_entry_name(
                    job.entries.len() + 1,
                    job.name_width,
                    image_extension,
                ));
                fs::copy(image_path, &entry).await.map_err(|e| {
                    Error::Io(std::io::Error::new(
                        e.kind(),
                        format!(
                            "Failed to stage image file '{}': {}",
                            path_to_string_lossy(image_path),
                            e
                        ),
                    ))
                })?;
                job.entries.push(entry);
            }
            Backend::Zip(cbz) => {
                cbz.add_page(image_path).await?;
            }
        }
        Ok(self)
    }

    async fn save(self) -> Result<()> {
        let job = match self.backend {
            Backend::Zip(cbz) => return cbz.save().await,
            Backend::Rar(job) => job,
        };

        let comment_file = job.staging_dir.join(COMMENT_FILE);
        fs::write(&comment_file, job.comment.as_bytes())
            .await
            .map_err(|e| Error::filesystem(&comment_file, e))?;

        let staged_archive = job.staging_dir.join(STAGED_ARCHIVE);
        let mut zcomment = std::ffi::OsString::from("-z");
        zcomment.push(&comment_file);

        let output = Command::new(&job.binary)
            .arg("a")
            .arg("-ep")
            .arg("-idq")
            .arg("-y")
            .arg(zcomment)
            .arg(&staged_archive)
            .args(&job.entries)
            .output()
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to run '{}': {}", path_to_string_lossy(&job.binary), e),
                ))
            })?;

        if !output.status.success() {
            return Err(Error::Io(std::io::Error::other(format!(
                "'{}' exited with {}: {}",
                path_to_string_lossy(&job.binary),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))));
        }

        fs::rename(&staged_archive, &job.output_file)
            .await
            .map_err(|e| Error::filesystem(&job.output_file, e))?;

        // Dropping the job removes the staging directory.
        Ok(())
    }
}
