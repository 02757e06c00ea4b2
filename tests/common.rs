//! Common test utilities and constants for the comic-assembler crate.
//!
//! Provides functions for setting up test directories, generating page
//! images in memory, serving them from a mock HTTP server and inspecting the
//! archives the assembler produces.

use comic_assembler::prelude::*;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use rand::{Rng, distributions::Alphanumeric};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[allow(dead_code)]
pub const TEST_TMP_DIR: &str = "tests/tmp";
#[allow(dead_code)]
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);
#[allow(dead_code)]
pub const LONG_TEST_TIMEOUT: Duration = Duration::from_secs(120); // For full assemblies if they are slow

#[allow(dead_code)]
pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
#[allow(dead_code)]
pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
#[allow(dead_code)]
pub const BLUE: Rgb<u8> = Rgb([0, 0, 255]);

/// Creates a fresh, uniquely named root directory for one test.
#[allow(dead_code)]
pub async fn setup_test_root(sub_path: &str) -> PathBuf {
    let rand_string: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let root = PathBuf::from(TEST_TMP_DIR).join(format!("{}-{}", sub_path, rand_string));
    if root.exists() {
        fs::remove_dir_all(&root).await.unwrap();
    }
    fs::create_dir_all(&root).await.unwrap();
    root
}

/// Builder preset for tests: fast retries, strict failure policy.
#[allow(dead_code)]
pub fn assembler_builder(root: &Path) -> ComicAssemblerBuilder {
    let mut builder = ComicAssembler::builder();
    builder
        .root_dir(root.to_path_buf())
        .concurrency(4usize)
        .retry_base_delay(Duration::from_millis(10))
        .rar_backend(RarBackend::ZipFallback);
    builder
}

fn solid(color: Rgb<u8>, width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, color))
}

fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
    bytes
}

/// A solid-color PNG page.
#[allow(dead_code)]
pub fn png_bytes(color: Rgb<u8>, width: u32, height: u32) -> Vec<u8> {
    encode(solid(color, width, height), ImageFormat::Png)
}

/// A solid-color JPEG page.
#[allow(dead_code)]
pub fn jpeg_bytes(color: Rgb<u8>, width: u32, height: u32) -> Vec<u8> {
    encode(solid(color, width, height), ImageFormat::Jpeg)
}

/// A solid-color GIF page.
#[allow(dead_code)]
pub fn gif_bytes(color: Rgb<u8>, width: u32, height: u32) -> Vec<u8> {
    encode(
        DynamicImage::ImageRgba8(solid(color, width, height).to_rgba8()),
        ImageFormat::Gif,
    )
}

/// Serves `body` with `content_type` at `url_path` and returns the absolute URL.
#[allow(dead_code)]
pub async fn mount_page(
    server: &MockServer,
    url_path: &str,
    body: Vec<u8>,
    content_type: &str,
) -> String {
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, content_type))
        .mount(server)
        .await;
    format!("{}{}", server.uri(), url_path)
}

/// Serves a bare status code at `url_path` and returns the absolute URL.
#[allow(dead_code)]
pub async fn mount_status(server: &MockServer, url_path: &str, status: u16) -> String {
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
    format!("{}{}", server.uri(), url_path)
}

/// Entry names of a ZIP based archive (CBZ, fallback CBR, EPUB) in archive order.
#[allow(dead_code)]
pub fn zip_entry_names(archive_path: &Path) -> Vec<String> {
    let file = std::fs::File::open(archive_path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

/// Raw bytes of one archive entry.
#[allow(dead_code)]
pub fn read_zip_entry(archive_path: &Path, name: &str) -> Vec<u8> {
    let file = std::fs::File::open(archive_path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut content = Vec::new();
    entry.read_to_end(&mut content).unwrap();
    content
}

/// The archive comment as text.
#[allow(dead_code)]
pub fn zip_comment(archive_path: &Path) -> String {
    let file = std::fs::File::open(archive_path).unwrap();
    let archive = zip::ZipArchive::new(file).unwrap();
    String::from_utf8_lossy(archive.comment()).to_string()
}

/// Content of the first `.opf` package document in an EPUB.
#[allow(dead_code)]
pub fn epub_package_document(epub_path: &Path) -> String {
    let name = zip_entry_names(epub_path)
        .into_iter()
        .find(|name| name.ends_with(".opf"))
        .expect("EPUB has no package document");
    String::from_utf8(read_zip_entry(epub_path, &name)).unwrap()
}

/// Raw bytes of the `Im1` image XObject drawn on the 1-based `page_number`.
///
/// JPEG pages are embedded verbatim, so the result decodes as a JPEG.
#[allow(dead_code)]
pub fn pdf_page_image(doc: &lopdf::Document, page_number: u32) -> Vec<u8> {
    let page_id = doc.get_pages()[&page_number];
    let resources = doc
        .get_dictionary(page_id)
        .and_then(|page| page.get(b"Resources"))
        .and_then(lopdf::Object::as_dict)
        .unwrap();
    let image_id = resources
        .get(b"XObject")
        .and_then(lopdf::Object::as_dict)
        .and_then(|xobjects| xobjects.get(b"Im1"))
        .and_then(lopdf::Object::as_reference)
        .unwrap();
    let stream = doc.get_object(image_id).and_then(lopdf::Object::as_stream).unwrap();
    stream.content.clone()
}

/// Image entries of an EPUB named `images/page_NNNN.<ext>`, in page order.
#[allow(dead_code)]
pub fn epub_page_images(epub_path: &Path) -> Vec<Vec<u8>> {
    let mut names: Vec<String> = zip_entry_names(epub_path)
        .into_iter()
        .filter(|name| name.contains("images/page_"))
        .collect();
    names.sort();
    names
        .iter()
        .map(|name| read_zip_entry(epub_path, name))
        .collect()
}

/// Center pixel of an encoded image.
#[allow(dead_code)]
pub fn center_pixel(bytes: &[u8]) -> Rgb<u8> {
    let image = image::load_from_memory(bytes).unwrap().to_rgb8();
    *image.get_pixel(image.width() / 2, image.height() / 2)
}

/// `true` when every channel of `actual` is within `tolerance` of `expected` (JPEG is lossy).
#[allow(dead_code)]
pub fn color_close(actual: Rgb<u8>, expected: Rgb<u8>, tolerance: u8) -> bool {
    actual
        .0
        .iter()
        .zip(expected.0.iter())
        .all(|(a, e)| a.abs_diff(*e) <= tolerance)
}

/// Every file below `dir`, recursively.
#[allow(dead_code)]
pub fn list_files_recursive(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                files.extend(list_files_recursive(&path));
            } else {
                files.push(path);
            }
        }
    }
    files
}

/// Asserts that no in-progress `.part` file is left anywhere below `dir`.
#[allow(dead_code)]
pub fn assert_no_partial_files(dir: &Path) {
    let leftovers: Vec<PathBuf> = list_files_recursive(dir)
        .into_iter()
        .filter(|p| comic_assembler::path_utils::is_partial_file(p))
        .collect();
    assert!(leftovers.is_empty(), "Partial files left behind: {:?}", leftovers);
}
