//! Integration tests for the comic-assembler crate.
//!
//! These tests run full `make_comic` pipelines against a mock HTTP server,
//! from link filtering to output validation.

use comic_assembler::error::{Error, Result};
use comic_assembler::prelude::*;
use std::path::Path;
use std::time::Duration;
use tokio::time::timeout;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;
use common::{
    BLUE, GREEN, LONG_TEST_TIMEOUT, RED, assert_no_partial_files, assembler_builder, center_pixel,
    color_close, epub_package_document, epub_page_images, gif_bytes, jpeg_bytes, mount_page,
    mount_status, pdf_page_image, png_bytes, read_zip_entry, setup_test_root, zip_comment,
    zip_entry_names,
};

/// Serves three pages in three encodings and returns their URLs in page order.
async fn serve_three_pages(server: &MockServer) -> Vec<String> {
    vec![
        mount_page(server, "/pages/1", png_bytes(RED, 30, 40), "image/png").await,
        mount_page(server, "/pages/2", jpeg_bytes(GREEN, 30, 40), "image/jpeg").await,
        mount_page(server, "/pages/3", gif_bytes(BLUE, 30, 40), "image/gif").await,
    ]
}

#[tokio::test]
async fn test_make_comic_pdf_three_pages() -> Result<()> {
    let root = setup_test_root("pdf_three_pages").await;
    let server = MockServer::start().await;
    let links = serve_three_pages(&server).await;

    let assembler = assembler_builder(&root).build()?;
    let comic = Comic::new("foo", "1", "pdf").with_links(links);

    let report = timeout(LONG_TEST_TIMEOUT, assembler.make_comic(&comic))
        .await
        .expect("Test timed out")?;

    let expected = root.join("comics").join("foo").join("foo-1.pdf");
    assert_eq!(report.output_path, expected);
    assert_eq!(report.format, ComicFormat::Pdf);
    assert_eq!(report.page_count, 3);
    assert!(report.failed_pages.is_empty());

    let doc = lopdf::Document::load(&expected)?;
    let pages = doc.get_pages();
    assert_eq!(pages.len(), 3);
    let first = doc.get_dictionary(pages[&1])?;
    let media_box = first.get(b"MediaBox")?.as_array()?;
    assert_eq!(media_box[2].as_i64()?, 30);
    assert_eq!(media_box[3].as_i64()?, 40);

    for (page_number, expected) in (1..=3).zip([RED, GREEN, BLUE]) {
        let image = pdf_page_image(&doc, page_number);
        assert_eq!(image::guess_format(&image)?, image::ImageFormat::Jpeg);
        assert!(
            color_close(center_pixel(&image), expected, 16),
            "page {} has the wrong image",
            page_number
        );
    }

    assert_no_partial_files(&root);
    Ok(())
}

#[tokio::test]
async fn test_make_comic_epub_with_metadata() -> Result<()> {
    let root = setup_test_root("epub_metadata").await;
    let server = MockServer::start().await;
    let links = serve_three_pages(&server).await;

    let assembler = assembler_builder(&root).build()?;
    let comic = Comic::new("Foo", "7", "EPUB")
        .with_source("mangarock.com")
        .with_author("Jane Doe")
        .with_links(links);

    let report = timeout(LONG_TEST_TIMEOUT, assembler.make_comic(&comic))
        .await
        .expect("Test timed out")?;

    assert_eq!(
        report.output_path,
        root.join("comics/mangarock.com/Foo/Foo-7.epub")
    );
    let names = zip_entry_names(&report.output_path);
    assert_eq!(names.first().map(String::as_str), Some("mimetype"));
    assert_eq!(
        names.iter().filter(|n| n.ends_with(".xhtml") && n.contains("page_")).count(),
        3
    );

    let images = epub_page_images(&report.output_path);
    assert_eq!(images.len(), 3);
    for (image, expected) in images.iter().zip([RED, GREEN, BLUE]) {
        assert!(color_close(center_pixel(image), expected, 16));
    }

    let opf = epub_package_document(&report.output_path);
    assert!(opf.contains("Foo 7"));
    assert!(opf.contains("Jane Doe"));
    assert!(opf.contains("Issue 7"));
    Ok(())
}

#[tokio::test]
async fn test_make_comic_cbz_raw_keeps_order_and_bytes() -> Result<()> {
    let root = setup_test_root("cbz_raw").await;
    let server = MockServer::start().await;

    let bodies = [png_bytes(RED, 8, 8), png_bytes(GREEN, 8, 8), png_bytes(BLUE, 8, 8)];
    let mut links = Vec::new();
    for (i, body) in bodies.iter().enumerate() {
        links.push(mount_page(&server, &format!("/raw/{}", i), body.clone(), "image/png").await);
    }

    let assembler = assembler_builder(&root)
        .target_encoding(ImageEncoding::Raw)
        .build()?;
    let comic = Comic::new("Foo", "2", "cbz").with_links(links);

    let report = timeout(LONG_TEST_TIMEOUT, assembler.make_comic(&comic))
        .await
        .expect("Test timed out")?;

    let names = zip_entry_names(&report.output_path);
    assert_eq!(names, vec!["001.png", "002.png", "003.png"]);
    for (name, body) in names.iter().zip(bodies.iter()) {
        assert_eq!(&read_zip_entry(&report.output_path, name), body);
    }
    assert_eq!(zip_comment(&report.output_path), "Foo");
    Ok(())
}

#[tokio::test]
async fn test_make_comic_cbz_converts_to_jpeg() -> Result<()> {
    let root = setup_test_root("cbz_jpeg").await;
    let server = MockServer::start().await;
    let links = serve_three_pages(&server).await;

    let assembler = assembler_builder(&root).build()?;
    let comic = Comic::new("Foo", "3", "cbz").with_links(links);

    let report = timeout(LONG_TEST_TIMEOUT, assembler.make_comic(&comic))
        .await
        .expect("Test timed out")?;

    let names = zip_entry_names(&report.output_path);
    assert_eq!(names, vec!["001.jpg", "002.jpg", "003.jpg"]);
    for (name, expected) in names.iter().zip([RED, GREEN, BLUE]) {
        let bytes = read_zip_entry(&report.output_path, name);
        assert_eq!(image::guess_format(&bytes)?, image::ImageFormat::Jpeg);
        assert!(color_close(center_pixel(&bytes), expected, 16));
    }
    Ok(())
}

#[tokio::test]
async fn test_make_comic_keeps_order_when_later_pages_finish_first() -> Result<()> {
    let root = setup_test_root("order_under_delay").await;
    let server = MockServer::start().await;

    let colors = [RED, GREEN, BLUE, RED, GREEN];
    let mut links = Vec::new();
    for (i, color) in colors.iter().enumerate() {
        let url_path = format!("/slow/{}", i);
        // Earlier pages are slower.
        let delay = Duration::from_millis(50 * (colors.len() - i) as u64);
        Mock::given(method("GET"))
            .and(path(url_path.as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(png_bytes(*color, 6, 6), "image/png")
                    .set_delay(delay),
            )
            .mount(&server)
            .await;
        links.push(format!("{}{}", server.uri(), url_path));
    }

    let assembler = assembler_builder(&root)
        .target_encoding(ImageEncoding::Png)
        .concurrency(5usize)
        .build()?;
    let comic = Comic::new("Foo", "4", "cbz").with_links(links);

    let report = timeout(LONG_TEST_TIMEOUT, assembler.make_comic(&comic))
        .await
        .expect("Test timed out")?;

    let names = zip_entry_names(&report.output_path);
    assert_eq!(names.len(), colors.len());
    for (name, expected) in names.iter().zip(colors) {
        let bytes = read_zip_entry(&report.output_path, name);
        assert_eq!(center_pixel(&bytes), expected);
    }
    Ok(())
}

#[tokio::test]
async fn test_make_comic_cbr_falls_back_to_zip() -> Result<()> {
    let root = setup_test_root("cbr_fallback").await;
    let server = MockServer::start().await;
    let links = serve_three_pages(&server).await;

    let assembler = assembler_builder(&root).build()?;
    let comic = Comic::new("Foo", "5", "cbr").with_links(links);

    let report = timeout(LONG_TEST_TIMEOUT, assembler.make_comic(&comic))
        .await
        .expect("Test timed out")?;

    assert_eq!(report.output_path, root.join("comics/Foo/Foo-5.cbr"));
    assert_eq!(
        zip_entry_names(&report.output_path),
        vec!["001.jpg", "002.jpg", "003.jpg"]
    );
    assert_eq!(zip_comment(&report.output_path), "Foo");
    Ok(())
}

#[tokio::test]
async fn test_make_comic_rejects_unknown_format_without_side_effects() -> Result<()> {
    let root = setup_test_root("unknown_format").await;
    let assembler = assembler_builder(&root).build()?;
    let comic = Comic::new("Foo", "1", "djvu").with_links(["https://example.com/1.jpg"]);

    let result = assembler.make_comic(&comic).await;
    match result {
        Err(Error::Configuration(message)) => assert!(message.contains("djvu")),
        other => panic!("Expected a configuration error, got {:?}", other),
    }
    assert!(!root.join("comics").exists());
    Ok(())
}

#[tokio::test]
async fn test_make_comic_empty_links() -> Result<()> {
    let root = setup_test_root("empty_links").await;
    let assembler = assembler_builder(&root).build()?;

    let no_links = Comic::new("Foo", "1", "cbz");
    assert!(matches!(
        assembler.make_comic(&no_links).await,
        Err(Error::EmptyComic)
    ));

    let all_filtered = Comic::new("Foo", "1", "cbz").with_links([
        "https://example.com/logo.png",
        "https://example.com/wp-content/uploads/1.jpg",
        "https://example.com/banner.GIF",
        "not a url",
        "",
    ]);
    assert!(matches!(
        assembler.make_comic(&all_filtered).await,
        Err(Error::EmptyComic)
    ));

    assert!(!root.join("comics").exists());
    Ok(())
}

#[tokio::test]
async fn test_make_comic_reports_filtered_links_and_keeps_index() -> Result<()> {
    let root = setup_test_root("filtered_links").await;
    let server = MockServer::start().await;
    let first = mount_page(&server, "/pages/a", png_bytes(RED, 8, 8), "image/png").await;
    let second = mount_page(&server, "/pages/b", png_bytes(BLUE, 8, 8), "image/png").await;

    let assembler = assembler_builder(&root).build()?;
    let comic = Comic::new("Foo", "9", "cbz").with_links([
        first,
        format!("{}/img/logo.png", server.uri()),
        second,
    ]);

    let report = timeout(LONG_TEST_TIMEOUT, assembler.make_comic(&comic))
        .await
        .expect("Test timed out")?;

    assert_eq!(report.filtered_links, 1);
    assert_eq!(report.page_count, 2);

    let scratch = root.join("comics/Foo/images-9");
    assert!(scratch.join("0000.jpg").exists());
    assert!(!scratch.join("0001.jpg").exists());
    assert!(scratch.join("0002.jpg").exists());
    Ok(())
}

#[tokio::test]
async fn test_make_comic_missing_page_aborts_by_default() -> Result<()> {
    let root = setup_test_root("strict_failure").await;
    let server = MockServer::start().await;
    let mut links = serve_three_pages(&server).await;
    let missing = mount_status(&server, "/pages/missing", 404).await;
    links.insert(1, missing.clone());

    let assembler = assembler_builder(&root).build()?;
    let comic = Comic::new("Foo", "1", "pdf").with_links(links);

    let result = timeout(LONG_TEST_TIMEOUT, assembler.make_comic(&comic))
        .await
        .expect("Test timed out");

    match result {
        Err(Error::Fetch { url, reason }) => {
            assert_eq!(url, missing);
            assert!(reason.contains("404"));
        }
        other => panic!("Expected a fetch error, got {:?}", other),
    }
    assert!(!root.join("comics/Foo/Foo-1.pdf").exists());
    assert_no_partial_files(&root);
    Ok(())
}

#[tokio::test]
async fn test_make_comic_abort_leaves_no_partial_pages() -> Result<()> {
    let root = setup_test_root("abort_in_flight").await;
    let server = MockServer::start().await;

    let mut links = Vec::new();
    for i in 0..8u64 {
        let url_path = format!("/busy/{}", i);
        Mock::given(method("GET"))
            .and(path(url_path.as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(png_bytes(GREEN, 400, 600), "image/png")
                    .set_delay(Duration::from_millis(10 * i)),
            )
            .mount(&server)
            .await;
        links.push(format!("{}{}", server.uri(), url_path));
    }
    Mock::given(method("GET"))
        .and(path("/busy/missing"))
        .respond_with(ResponseTemplate::new(404).set_delay(Duration::from_millis(40)))
        .mount(&server)
        .await;
    links.insert(4, format!("{}/busy/missing", server.uri()));

    let assembler = assembler_builder(&root)
        .target_encoding(ImageEncoding::Png)
        .concurrency(9usize)
        .build()?;
    let comic = Comic::new("Foo", "1", "cbz").with_links(links);

    let result = timeout(LONG_TEST_TIMEOUT, assembler.make_comic(&comic))
        .await
        .expect("Test timed out");
    assert!(matches!(result, Err(Error::Fetch { .. })));

    // Writes already handed to the blocking pool finish or clean up on their own.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_no_partial_files(&root);
    assert!(!root.join("comics/Foo/Foo-1.cbz").exists());
    Ok(())
}

#[tokio::test]
async fn test_make_comic_tolerates_failures_within_ratio() -> Result<()> {
    let root = setup_test_root("tolerant_failure").await;
    let server = MockServer::start().await;
    let mut links = serve_three_pages(&server).await;
    let missing = mount_status(&server, "/pages/missing", 404).await;
    links.insert(1, missing.clone());

    let assembler = assembler_builder(&root)
        .max_failed_page_ratio(0.5)
        .build()?;
    let comic = Comic::new("Foo", "1", "cbz").with_links(links);

    let report = timeout(LONG_TEST_TIMEOUT, assembler.make_comic(&comic))
        .await
        .expect("Test timed out")?;

    assert_eq!(report.page_count, 3);
    assert_eq!(report.skipped_pages(), 1);
    assert_eq!(report.failed_pages[0].index, 1);
    assert_eq!(report.failed_pages[0].url, missing);
    assert_eq!(zip_entry_names(&report.output_path).len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_make_comic_decode_error_names_url() -> Result<()> {
    let root = setup_test_root("decode_error").await;
    let server = MockServer::start().await;
    let good = mount_page(&server, "/pages/good", png_bytes(RED, 8, 8), "image/png").await;
    let html = mount_page(
        &server,
        "/pages/html",
        b"<html><body>Please log in</body></html>".to_vec(),
        "image/jpeg",
    )
    .await;

    let assembler = assembler_builder(&root).build()?;
    let comic = Comic::new("Foo", "1", "cbz").with_links([good, html.clone()]);

    match assembler.make_comic(&comic).await {
        Err(Error::Decode { url, .. }) => assert_eq!(url, html),
        other => panic!("Expected a decode error, got {:?}", other),
    }
    assert!(!root.join("comics/Foo/Foo-1.cbz").exists());
    Ok(())
}

#[tokio::test]
async fn test_make_comic_retries_transient_failures() -> Result<()> {
    let root = setup_test_root("retry").await;
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(png_bytes(GREEN, 8, 8), "image/png"))
        .mount(&server)
        .await;

    let assembler = assembler_builder(&root).max_retries(2u32).build()?;
    let comic = Comic::new("Foo", "1", "cbz").with_links([format!("{}/flaky", server.uri())]);

    let report = timeout(LONG_TEST_TIMEOUT, assembler.make_comic(&comic))
        .await
        .expect("Test timed out")?;
    assert_eq!(report.page_count, 1);
    assert!(report.failed_pages.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_make_comic_without_retries_surfaces_transient_failure() -> Result<()> {
    let root = setup_test_root("no_retry").await;
    let server = MockServer::start().await;
    let flaky = mount_status(&server, "/flaky", 503).await;

    let assembler = assembler_builder(&root).build()?;
    let comic = Comic::new("Foo", "1", "cbz").with_links([flaky]);

    assert!(matches!(
        assembler.make_comic(&comic).await,
        Err(Error::Fetch { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_make_comic_rerun_reuses_scratch_and_overwrites() -> Result<()> {
    let root = setup_test_root("rerun").await;
    let server = MockServer::start().await;

    let mut links = Vec::new();
    for (i, color) in [RED, GREEN].iter().enumerate() {
        let url_path = format!("/once/{}", i);
        Mock::given(method("GET"))
            .and(path(url_path.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_raw(png_bytes(*color, 8, 8), "image/png"))
            .expect(1)
            .mount(&server)
            .await;
        links.push(format!("{}{}", server.uri(), url_path));
    }

    let assembler = assembler_builder(&root).build()?;
    let comic = Comic::new("Foo", "1", "cbz").with_links(links);

    let first = assembler.make_comic(&comic).await?;
    let first_names = zip_entry_names(&first.output_path);
    assert_eq!(first.reused_pages, 0);

    let second = assembler.make_comic(&comic).await?;
    assert_eq!(second.output_path, first.output_path);
    assert_eq!(second.reused_pages, 2);
    assert_eq!(zip_entry_names(&second.output_path), first_names);

    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn test_make_comic_rerun_with_other_encoding_fetches_again() -> Result<()> {
    let root = setup_test_root("rerun_encoding").await;
    let server = MockServer::start().await;
    let body = png_bytes(RED, 8, 8);
    let links = vec![mount_page(&server, "/switch/1", body.clone(), "image/png").await];
    let comic = Comic::new("Foo", "4", "cbz").with_links(links);

    let as_jpeg = assembler_builder(&root).build()?;
    let first = as_jpeg.make_comic(&comic).await?;
    assert_eq!(zip_entry_names(&first.output_path), vec!["001.jpg"]);

    let as_raw = assembler_builder(&root)
        .target_encoding(ImageEncoding::Raw)
        .build()?;
    let second = as_raw.make_comic(&comic).await?;
    assert_eq!(second.reused_pages, 0);
    assert_eq!(zip_entry_names(&second.output_path), vec!["001.png"]);
    assert_eq!(read_zip_entry(&second.output_path, "001.png"), body);

    let third = as_jpeg.make_comic(&comic).await?;
    assert_eq!(third.reused_pages, 1);
    assert_eq!(zip_entry_names(&third.output_path), vec!["001.jpg"]);
    Ok(())
}

#[tokio::test]
async fn test_make_comic_removes_scratch_when_not_retained() -> Result<()> {
    let root = setup_test_root("no_scratch").await;
    let server = MockServer::start().await;
    let links = serve_three_pages(&server).await;

    let assembler = assembler_builder(&root)
        .retain_scratch_images(false)
        .build()?;
    let comic = Comic::new("Foo", "1", "cbz").with_links(links);

    let report = assembler.make_comic(&comic).await?;
    assert!(report.output_path.exists());
    assert!(!root.join("comics/Foo/images-1").exists());
    Ok(())
}

#[tokio::test]
async fn test_make_comic_sequential_with_concurrency_one() -> Result<()> {
    let root = setup_test_root("sequential").await;
    let server = MockServer::start().await;
    let links = serve_three_pages(&server).await;

    let assembler = assembler_builder(&root).concurrency(1usize).build()?;
    let comic = Comic::new("Foo", "1", "cbz").with_links(links);

    let report = assembler.make_comic(&comic).await?;
    assert_eq!(report.page_count, 3);
    assert!(Path::new(&report.output_path).exists());
    Ok(())
}
