use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::generator::{Generator, GeneratorOptions};
use crate::types::{Comic, get_file_info};
use async_trait::async_trait;
use chrono::Local;
use image::{ColorType, DynamicImage, ImageFormat};
use log::{debug, warn};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};
use memmap2::MmapOptions;
use rayon::prelude::*;
use tokio::task::spawn_blocking;

const PRODUCER: &str = concat!("comic-assembler ", env!("CARGO_PKG_VERSION"));

/// One page image turned into an image XObject payload.
struct PreparedPage {
    width: u32,
    height: u32,
    color_space: &'static str,
    data: Vec<u8>,
    /// JPEG data is embedded as is and must not be deflated again.
    dct: bool,
}

/// Reads and decodes one page on a rayon worker.
///
/// JPEG pages with a gray or RGB layout are embedded verbatim (`DCTDecode`);
/// everything else is expanded to RGB8 and deflated when the document is built.
fn prepare_page(path: &Path) -> Result<PreparedPage> {
    let file = File::open(path).map_err(|e| Error::filesystem(path, e))?;
    let mmap = unsafe { MmapOptions::new().map(&file) }.map_err(|e| Error::filesystem(path, e))?;

    let format = image::guess_format(&mmap[..])?;
    let decoded = image::load_from_memory_with_format(&mmap[..], format)?;
    let (width, height) = (decoded.width(), decoded.height());

    if format == ImageFormat::Jpeg {
        let color_space = match decoded.color() {
            ColorType::L8 => Some("DeviceGray"),
            ColorType::Rgb8 => Some("DeviceRGB"),
            _ => None,
        };
        if let Some(color_space) = color_space {
            return Ok(PreparedPage {
                width,
                height,
                color_space,
                data: mmap.to_vec(),
                dct: true,
            });
        }
    }

    Ok(PreparedPage {
        width,
        height,
        color_space: "DeviceRGB",
        data: flatten_rgb(decoded),
        dct: false,
    })
}

fn flatten_rgb(image: DynamicImage) -> Vec<u8> {
    image.into_rgb8().into_raw()
}

fn page_dimensions(page: &PreparedPage) -> Vec<Object> {
    vec![
        0_i64.into(),
        0_i64.into(),
        (page.width as i64).into(),
        (page.height as i64).into(),
    ]
}

/// Adds one page to `doc`, returning the page object id.
fn add_page_object(doc: &mut Document, pages_id: ObjectId, page: PreparedPage) -> Result<ObjectId> {
    let media_box = page_dimensions(&page);
    let mut image_dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => page.width as i64,
        "Height" => page.height as i64,
        "ColorSpace" => page.color_space,
        "BitsPerComponent" => 8_i64,
    };
    if page.dct {
        image_dict.set("Filter", "DCTDecode");
    }

    let mut image_stream = Stream::new(image_dict, page.data);
    if page.dct {
        image_stream = image_stream.with_compression(false);
    } else if let Err(e) = image_stream.compress() {
        warn!("Embedding {}x{} page image uncompressed: {}", page.width, page.height, e);
    }
    let image_id = doc.add_object(image_stream);

    // Scale the unit square to the full page.
    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    (page.width as i64).into(),
                    0_i64.into(),
                    0_i64.into(),
                    (page.height as i64).into(),
                    0_i64.into(),
                    0_i64.into(),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im1".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode()?));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "MediaBox" => media_box,
        "Resources" => dictionary! {
            "XObject" => dictionary! {
                "Im1" => image_id,
            },
        },
    });

    Ok(page_id)
}

/// Builds the whole document from prepared pages, in order.
fn build_document(pages: Vec<PreparedPage>, title: &str, author: Option<&str>) -> Result<Document> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids = Vec::with_capacity(pages.len());
    for page in pages {
        kids.push(Object::Reference(add_page_object(&mut doc, pages_id, page)?));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut info = dictionary! {
        "Title" => Object::string_literal(title),
        "Producer" => Object::string_literal(PRODUCER),
        "CreationDate" => Object::string_literal(Local::now().format("D:%Y%m%d%H%M%S").to_string()),
    };
    if let Some(author) = author {
        info.set("Author", Object::string_literal(author));
    }
    let info_id = doc.add_object(info);
    doc.trailer.set("Info", info_id);

    Ok(doc)
}

/// A generator for image-only PDF files.
///
/// Each page's MediaBox equals the image size in pixels (one pixel per point)
/// and the image covers the page entirely. Pages are only collected while they
/// are added; decoding runs in parallel when the document is saved.
pub struct Pdf {
    output_file: PathBuf,
    pages: Vec<PathBuf>,
    title: String,
    author: Option<String>,
}

#[async_trait]
impl Generator for Pdf {
    fn new(output_file: &Path, _options: &GeneratorOptions) -> Result<Self> {
        Ok(Pdf {
            output_file: output_file.to_path_buf(),
            pages: Vec::new(),
            title: String::new(),
            author: None,
        })
    }

    async fn set_metadata(&mut self, comic: &Comic, total_pages: usize) -> Result<&mut Self> {
        self.title = format!("{} {}", comic.name, comic.issue_number)
            .trim()
            .to_string();
        self.author = comic.author.clone().filter(|a| !a.trim().is_empty());
        self.pages.reserve(total_pages);
        Ok(self)
    }

    async fn add_page(&mut self, image_path: &Path) -> Result<&mut Self> {
        // Fail early on files the document could not embed.
        get_file_info(image_path)?;
        if !tokio::fs::try_exists(image_path)
            .await
            .map_err(|e| Error::filesystem(image_path, e))?
        {
            return Err(Error::filesystem(
                image_path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "page image is missing"),
            ));
        }
        self.pages.push(image_path.to_path_buf());
        Ok(self)
    }

    async fn save(self) -> Result<()> {
        let Pdf {
            output_file,
            pages,
            title,
            author,
        } = self;

        spawn_blocking(move || -> Result<()> {
            let prepared = pages
                .par_iter()
                .map(|page| prepare_page(page.as_path()))
                .collect::<Result<Vec<_>>>()?;
            debug!("Prepared {} PDF pages for {:?}", prepared.len(), output_file);

            let mut doc = build_document(prepared, &title, author.as_deref())?;
            doc.save(&output_file)
                .map_err(|e| Error::filesystem(&output_file, e))?;
            Ok(())
        })
        .await??;

        Ok(())
    }
}
