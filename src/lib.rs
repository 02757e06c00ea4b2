//! Comic Assembler - Page Images to Comic File Library
//!
//! This crate turns the ordered page image URLs of one comic or manga issue
//! into a single file in one of the usual reading formats (PDF, EPUB, CBZ or
//! CBR). Pages are downloaded concurrently, validated by decoding them,
//! normalized to one encoding and packaged in their original order.
//!
//! # Getting Started
//!
//! Configure a [`ComicAssembler`] through its builder, describe the issue with
//! a [`Comic`] and call [`make_comic`](ComicAssembler::make_comic).
//!
//! ```rust,no_run
//! use comic_assembler::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> comic_assembler::error::Result<()> {
//!     // 1. Configure where and how issues are assembled
//!     let assembler = ComicAssembler::builder()
//!         .root_dir("./library")
//!         .target_encoding(ImageEncoding::Jpg)
//!         .max_retries(2u32)
//!         .build()?;
//!
//!     // 2. Describe the issue
//!     let comic = Comic::new("My Series", "12", "cbz")
//!         .with_source("example.com")
//!         .with_author("Jane Doe")
//!         .with_links([
//!             "https://example.com/pages/1.jpg",
//!             "https://example.com/pages/2.jpg",
//!         ]);
//!
//!     // Optional: reject bad input before any network or disk work
//!     assembler.preflight_check(&comic)?;
//!
//!     // 3. Fetch and package
//!     let report = assembler.make_comic(&comic).await?;
//!     println!("Wrote {} pages to {:?}", report.page_count, report.output_path);
//!
//!     Ok(())
//! }
//! ```
//!
//! The artifact lands at `<root>/comics/<source>/<name>/<name>-<issue>.<format>`
//! and the normalized pages are kept next to it in `images-<issue>/`.

pub mod assembler;
pub mod error;
pub mod fetcher;
pub mod generator;
pub mod normalizer;
pub mod path_utils;
pub mod types;
pub mod validator;

// Publicly expose the main `ComicAssembler` struct and its builder
pub use assembler::{ComicAssembler, ComicAssemblerBuilder};

// Re-export error and core types for direct access
pub use error::{Error, Result};
pub use generator::RarBackend;
pub use types::{AssemblyReport, Comic, ComicFormat, ImageEncoding, PageFailure};

/// Prelude module for convenient imports.
///
/// This module re-exports the most commonly used types, allowing you to
/// import everything you need with a single `use comic_assembler::prelude::*;` statement.
pub mod prelude {
    pub use super::{
        AssemblyReport, Comic, ComicAssembler, ComicAssemblerBuilder, ComicFormat, ImageEncoding,
        PageFailure, RarBackend,
    };
    pub use crate::error::{Error, Result};
    pub use crate::fetcher::{FetchOptions, ImageFetcher};
    pub use crate::validator::UrlValidator;
}
