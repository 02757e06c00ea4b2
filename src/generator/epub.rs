use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::generator::{Generator, GeneratorOptions};
use crate::path_utils::path_to_string_lossy;
use crate::types::{Comic, get_file_info};
use async_trait::async_trait;
use epub_builder::{EpubBuilder, EpubContent, EpubVersion, ReferenceType, ZipLibrary};
use log::debug;
use memmap2::MmapOptions;
use tokio::task::spawn_blocking;

/// Language written to the package metadata.
const DEFAULT_LANGUAGE: &str = "en";

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Generates XHTML content for an image to be included in the EPUB.
///
/// # Arguments
///
/// * `image_source` - Path to the image file relative to the EPUB root
/// * `page_title` - Title of the page, also used as alt text
fn generate_xhtml(image_source: &str, page_title: &str) -> String {
    const TEMPLATE: &str = include_str!("../../templates/Epub.xhtml");
    let title = escape_xml(page_title);
    TEMPLATE
        .replace("%title%", &title)
        .replace("%src%", image_source)
        .replace("%alt%", &title)
}

/// A generator for creating image-only EPUB 3 files.
///
/// Every page becomes one full-bleed XHTML document in the spine, in the order
/// pages are added. The first page doubles as the cover image.
pub struct EPub {
    epub: EpubBuilder<ZipLibrary>,
    output_file: PathBuf,
    page_index: usize, // 0-based index for pages added
    title: String,
}

impl EPub {
    /// Adds a resource to the EPUB using memory mapping for efficient handling of large files.
    ///
    /// # Arguments
    ///
    /// * `resource_path` - Path where the resource will be stored in the EPUB (e.g., "images/page_001.jpg")
    /// * `image_path` - Path to the image file on the filesystem
    /// * `as_cover` - Register the resource as the book cover instead of a plain resource
    async fn add_resource_mmap(
        &mut self,
        resource_path: &str,
        image_path: &Path,
        as_cover: bool,
    ) -> Result<&mut Self> {
        let (_, image_mime) = get_file_info(image_path)?;

        let file = tokio::fs::File::open(image_path).await.map_err(|e| {
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
        let mmap = spawn_blocking(move || unsafe { MmapOptions::new().map(&file_std) }).await??;

        if as_cover {
            self.epub
                .add_cover_image(resource_path, Cursor::new(&mmap[..]), image_mime)?;
        } else {
            self.epub
                .add_resource(resource_path, Cursor::new(&mmap[..]), image_mime)?;
        }

        Ok(self)
    }
}

#[async_trait]
impl Generator for EPub {
    fn new(output_file: &Path, _options: &GeneratorOptions) -> Result<Self> {
        let mut epub = EpubBuilder::new(ZipLibrary::new()?)?;

        epub.epub_version(EpubVersion::V30);

        epub.stylesheet(include_bytes!("../../templates/Epub.css").as_slice())?;

        Ok(EPub {
            epub,
            output_file: output_file.to_path_buf(),
            page_index: 0,
            title: String::new(),
        })
    }

    async fn set_metadata(&mut self, comic: &Comic, total_pages: usize) -> Result<&mut Self> {
        self.title = if comic.issue_number.is_empty() {
            comic.name.clone()
        } else {
            format!("{} {}", comic.name, comic.issue_number)
        };

        self.epub.metadata("title", &self.title)?;
        if let Some(author) = comic.author.as_deref().filter(|a| !a.trim().is_empty()) {
            self.epub.metadata("author", author)?;
        }
        self.epub
            .metadata("description", format!("Issue {}", comic.issue_number))?;
        debug!("EPUB '{}' with {} pages", self.title, total_pages);
        if !comic.source.is_empty() {
            self.epub.metadata("subject", &comic.source)?;
        }
        self.epub
            .metadata("generator", concat!("comic-assembler ", env!("CARGO_PKG_VERSION")))?;
        self.epub.set_lang(DEFAULT_LANGUAGE);

        Ok(self)
    }

    async fn add_page(&mut self, image_path: &Path) -> Result<&mut Self> {
        let (image_extension, _) = get_file_info(image_path)?;
        let page_number = self.page_index + 1;

        if self.page_index == 0 {
            let cover_name = format!("images/cover.{}", image_extension);
            self.add_resource_mmap(&cover_name, image_path, true).await?;
        }

        let image_name = format!("images/page_{:04}.{}", page_number, image_extension);
        self.add_resource_mmap(&image_name, image_path, false).await?;

        let page_title = format!("{} - Page {}", self.title, page_number);
        let xhtml_content = generate_xhtml(&image_name, &page_title);
        let content_path = format!("page_{:04}.xhtml", page_number);

        let mut content = EpubContent::new(content_path, xhtml_content.as_bytes()).title(page_title);
        if self.page_index == 0 {
            content = content.reftype(ReferenceType::Cover);
        }
        self.epub.add_content(content)?;

        self.page_index += 1;
        Ok(self)
    }

    async fn save(mut self) -> Result<()> {
        let output_file = self.output_file.clone();
        let file = File::create(&output_file).map_err(|e| Error::filesystem(&output_file, e))?;

        spawn_blocking(move || self.epub.generate(file).map_err(Error::Epub)).await??;
        Ok(())
    }
}
