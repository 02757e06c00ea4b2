//! Example assembling one issue from page URLs given on the command line.
//!
//! ```text
//! cargo run --example assemble_issue -- <root> <name> <issue> <format> <url>...
//! cargo run --example assemble_issue -- ./library "My Series" 12 cbz \
//!     https://example.com/pages/1.jpg https://example.com/pages/2.jpg
//! ```
//!
//! The source label is taken from the host of the first link.

use comic_assembler::prelude::*;
use comic_assembler::validator::source_from_url;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 5 {
        eprintln!("usage: assemble_issue <root> <name> <issue> <format> <url>...");
        std::process::exit(2);
    }

    let (root, name, issue, format) = (&args[0], &args[1], &args[2], &args[3]);
    let links = &args[4..];

    let source = source_from_url(&links[0]).unwrap_or_default();

    let assembler = ComicAssembler::builder()
        .root_dir(root.as_str())
        .max_retries(2u32)
        .max_failed_page_ratio(0.1)
        .build()?;

    let comic = Comic::new(name.as_str(), issue.as_str(), format.as_str())
        .with_source(source)
        .with_links(links.iter().cloned());

    println!("=== Assembling '{}' #{} ===\n", comic.name, comic.issue_number);
    println!("   Output: {:?}", assembler.output_path(&comic)?);

    let report = assembler.make_comic(&comic).await?;

    println!("   ✓ Wrote {} pages as {}", report.page_count, report.format);
    println!("   Filtered links: {}", report.filtered_links);
    println!("   Reused pages:   {}", report.reused_pages);
    for failure in &report.failed_pages {
        println!("   ⚠ Skipped page {} ({}): {}", failure.index, failure.url, failure.reason);
    }

    Ok(())
}
