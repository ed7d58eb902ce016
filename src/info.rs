//! Index summary for `pdfqa info`.
//!
//! Gives a quick view of what a persisted index contains: chunk and page
//! counts, the files it was built from, and the embedding model, so a user
//! can confirm an indexing run before asking questions.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::Config;
use crate::error::QaResult;
use crate::index::{FlatIndex, IndexPaths};

/// Per-file breakdown.
struct FileStats {
    pages: BTreeSet<i64>,
    chunks: usize,
}

/// Load the configured index and print a summary to stdout.
pub fn run_info(config: &Config) -> QaResult<()> {
    let index = FlatIndex::load(&config.index.dir, &config.index.name)?;
    let paths = IndexPaths::new(&config.index.dir, &config.index.name);
    let size: u64 = [&paths.vectors, &paths.manifest]
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .sum();

    let mut files: BTreeMap<&str, FileStats> = BTreeMap::new();
    for chunk in index.chunks() {
        let entry = files.entry(chunk.file_name()).or_insert_with(|| FileStats {
            pages: BTreeSet::new(),
            chunks: 0,
        });
        entry.pages.insert(chunk.page);
        entry.chunks += 1;
    }
    let total_pages: usize = files.values().map(|f| f.pages.len()).sum();

    println!("pdf-qa index '{}'", config.index.name);
    println!("================================");
    println!();
    println!("  Location:    {}", config.index.dir.display());
    println!("  Size:        {}", format_bytes(size));
    println!(
        "  Built:       {}",
        index.created_at().format("%Y-%m-%d %H:%M UTC")
    );
    println!("  Model:       {}", index.model());
    println!("  Dimensions:  {}", index.dims());
    println!();
    println!("  Files:       {}", files.len());
    println!("  Pages:       {}", total_pages);
    println!("  Chunks:      {}", index.len());

    if !files.is_empty() {
        println!();
        println!("  {:<40} {:>6} {:>8}", "FILE", "PAGES", "CHUNKS");
        println!("  {}", "-".repeat(56));
        for (name, stats) in &files {
            println!(
                "  {:<40} {:>6} {:>8}",
                name,
                stats.pages.len(),
                stats.chunks
            );
        }
    }
    println!();

    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QaError;

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn missing_index_is_load_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.index.dir = tmp.path().to_path_buf();
        let err = run_info(&config).unwrap_err();
        assert!(matches!(err, QaError::IndexLoad { .. }));
    }
}
