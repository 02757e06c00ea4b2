use crate::error::{Error, Result};
use crate::generator::{Generator, GeneratorOptions};
use crate::path_utils::path_to_string_lossy;
use crate::types::{Comic, get_file_info};
use async_trait::async_trait;
use memmap2::MmapOptions;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tokio::fs;
use tokio::task::spawn_blocking;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Minimum number of digits in page entry names.
const MIN_PAGE_DIGITS: usize = 3;

/// Digits needed so that `total_pages` names sort lexicographically in page order.
pub fn page_name_width(total_pages: usize) -> usize {
    total_pages.to_string().len().max(MIN_PAGE_DIGITS)
}

/// Archive entry name for the 1-based `page_number`, e.g. `007.jpg`.
pub fn page_entry_name(page_number: usize, width: usize, extension: &str) -> String {
    format!("{:0width$}.{}", page_number, extension, width = width)
}

/// A generator for creating CBZ (Comic Book ZIP) files.
///
/// Pages are renamed to zero-padded sequence numbers while they are copied in,
/// so readers that sort entries by name show them in reading order. The
/// series name goes into the archive comment.
pub struct Cbz {
    zip: Option<ZipWriter<File>>,
    options: SimpleFileOptions,
    page_index: usize, // 0-based index for pages added
    name_width: usize,
}

impl Cbz {
    /// Wraps an already opened file. Used by the CBR fallback as well.
    pub(crate) fn from_file(file: File) -> Self {
        let options: SimpleFileOptions = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644);

        Cbz {
            zip: Some(ZipWriter::new(file)),
            options,
            page_index: 0,
            name_width: MIN_PAGE_DIGITS,
        }
    }

    fn writer(&mut self) -> Result<&mut ZipWriter<File>> {
        self.zip
            .as_mut()
            .ok_or_else(|| Error::Unsupported("Zip writer not available".to_string()))
    }
}

#[async_trait]
impl Generator for Cbz {
    fn new(output_file: &Path, _options: &GeneratorOptions) -> Result<Self> {
        let file = File::create(output_file).map_err(|e| Error::filesystem(output_file, e))?;
        Ok(Cbz::from_file(file))
    }

    async fn set_metadata(&mut self, comic: &Comic, total_pages: usize) -> Result<&mut Self> {
        self.name_width = page_name_width(total_pages);
        let comment = comic.name.clone();
        self.writer()?.set_comment(comment);
        Ok(self)
    }

    async fn add_page(&mut self, image_path: &Path) -> Result<&mut Self> {
        let (image_extension, _) = get_file_info(image_path)?;

        let file = fs::File::open(image_path).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to open image file '{}': {}",
                    path_to_string_lossy(image_path),
                    e
                ),
            ))
        })?;

        let file_std = file.into_std().await;
        let options = self.options;
        let file_name = page_entry_name(self.page_index + 1, self.name_width, image_extension);

        // Create the read-only memory map
        let mmap = spawn_blocking(move || unsafe { MmapOptions::new().map(&file_std) }).await??;

        let zip = self.writer()?;
        zip.start_file(file_name, options)?;
        zip.write_all(&mmap[..])?;

        self.page_index += 1;

        Ok(self)
    }

    async fn save(mut self) -> Result<()> {
        // Take ownership of the zip writer
        let zip = match self.zip.take() {
            Some(z) => z,
            None => {
                return Err(Error::Unsupported("Zip writer not available".to_string()));
            }
        };

        // Finish writing the zip file in a blocking task
        spawn_blocking(move || zip.finish().map(|_| ()).map_err(Error::Zip)).await??;

        Ok(())
    }
}
