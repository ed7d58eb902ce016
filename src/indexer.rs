//! Index build pipeline: discover → load → split → embed → persist.
//!
//! Validation happens in a fixed order so the first problem reported is the
//! most fundamental one:
//!
//! 1. credential (only for providers that need one, skipped on dry runs)
//! 2. at least one matching file ([`QaError::NoInput`])
//! 3. per-file load failures, logged and skipped ([`QaError::Load`])
//! 4. at least one usable page ([`QaError::EmptyCorpus`])
//!
//! Any embedding failure aborts the run before anything is written.

use globset::{Glob, GlobMatcher};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::chunk::RecursiveSplitter;
use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{QaError, QaResult};
use crate::extract::load_pdf;
use crate::index::{FlatIndex, IndexPaths};
use crate::models::{Chunk, PageDocument};
use crate::progress::{IndexProgressEvent, IndexProgressReporter};

/// Turns one file into page documents.
pub trait PageLoader: Send + Sync {
    fn load(&self, path: &Path) -> QaResult<Vec<PageDocument>>;
}

/// Loads pages with the PDF text extractor.
pub struct PdfLoader;

impl PageLoader for PdfLoader {
    fn load(&self, path: &Path) -> QaResult<Vec<PageDocument>> {
        load_pdf(path)
    }
}

/// What an indexing run did.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub files: Vec<PathBuf>,
    pub skipped: Vec<(PathBuf, String)>,
    pub pages: usize,
    pub chunks: usize,
    pub model: Option<String>,
    pub dims: usize,
    /// `None` for dry runs.
    pub written: Option<IndexPaths>,
}

impl IndexReport {
    /// Closing line of `pdfqa index`.
    pub fn summary(&self) -> String {
        let loaded = self.files.len().saturating_sub(self.skipped.len());
        let mut line = format!(
            "Indexed {} of {} files: {} pages, {} chunks",
            loaded,
            self.files.len(),
            self.pages,
            self.chunks
        );
        match &self.model {
            Some(model) => line.push_str(&format!(", {} ({} dims)", model, self.dims)),
            None => line.push_str(" (dry run)"),
        }
        line
    }
}

/// Files in `dir` whose name matches `pattern`, in sorted path order.
///
/// Only the top level is scanned unless `recursive` is set. A missing
/// directory has no matching files.
pub fn discover_pdfs(dir: &Path, pattern: &str, recursive: bool) -> QaResult<Vec<PathBuf>> {
    let matcher = build_matcher(pattern)?;
    if !dir.is_dir() {
        return Err(QaError::NoInput(dir.to_path_buf()));
    }

    let mut walker = WalkDir::new(dir).follow_links(true).min_depth(1);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if entry.file_type().is_file() && matcher.is_match(entry.file_name()) {
            files.push(entry.into_path());
        }
    }

    if files.is_empty() {
        return Err(QaError::NoInput(dir.to_path_buf()));
    }
    files.sort();
    Ok(files)
}

fn build_matcher(pattern: &str) -> QaResult<GlobMatcher> {
    Glob::new(pattern)
        .map(|g| g.compile_matcher())
        .map_err(|e| QaError::Config(format!("invalid ingest.include_glob '{}': {}", pattern, e)))
}

/// Entry point for `pdfqa index`.
///
/// Resolves the embedding provider (checking the credential) unless this is
/// a dry run, then runs [`index_corpus`] with the PDF loader.
pub async fn run_index(
    config: &Config,
    api_key: Option<&str>,
    dry_run: bool,
    progress: &dyn IndexProgressReporter,
) -> QaResult<IndexReport> {
    let embedder = if dry_run {
        None
    } else {
        if config.embedding.requires_api_key() && api_key.is_none() {
            return Err(QaError::Config(format!(
                "{} environment variable not set",
                config.credentials.api_key_env
            )));
        }
        Some(create_provider(&config.embedding, api_key)?)
    };

    index_corpus(config, embedder.as_deref(), &PdfLoader, progress).await
}

/// Build and persist an index for `config.ingest.pdf_dir`.
///
/// With `embedder` set to `None` the run stops after splitting and writes
/// nothing.
pub async fn index_corpus(
    config: &Config,
    embedder: Option<&dyn EmbeddingProvider>,
    loader: &dyn PageLoader,
    progress: &dyn IndexProgressReporter,
) -> QaResult<IndexReport> {
    let pdf_dir = &config.ingest.pdf_dir;
    let mut report = IndexReport::default();

    progress.report(IndexProgressEvent::Discovering {
        dir: pdf_dir.display().to_string(),
    });
    let files = discover_pdfs(pdf_dir, &config.ingest.include_glob, config.ingest.recursive)?;

    println!("Found {} PDF files in {}:", files.len(), pdf_dir.display());
    for f in &files {
        println!("  - {}", display_name(f));
    }

    let mut pages: Vec<PageDocument> = Vec::new();
    let total = files.len() as u64;
    for (i, path) in files.iter().enumerate() {
        progress.report(IndexProgressEvent::Loading {
            file: display_name(path),
            n: i as u64 + 1,
            total,
        });
        match loader.load(path) {
            Ok(loaded) => pages.extend(loaded),
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "skipping PDF");
                println!("  warning: {}", e);
                report.skipped.push((path.clone(), e.to_string()));
            }
        }
    }
    report.files = files;

    if pages.is_empty() {
        return Err(QaError::EmptyCorpus(pdf_dir.clone()));
    }
    report.pages = pages.len();
    println!("Loaded {} pages.", pages.len());

    let splitter = RecursiveSplitter::new(
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
    );
    let chunks = splitter.split_pages(&pages);
    if chunks.is_empty() {
        return Err(QaError::EmptyCorpus(pdf_dir.clone()));
    }
    report.chunks = chunks.len();
    println!(
        "Split into {} chunks (size {}, overlap {}).",
        chunks.len(),
        splitter.chunk_size(),
        splitter.chunk_overlap()
    );

    let Some(embedder) = embedder else {
        println!("Dry run: nothing written.");
        return Ok(report);
    };

    println!("Embedding with {}...", embedder.model_name());
    let vectors = embed_chunks(
        embedder,
        &chunks,
        config.embedding.batch_size,
        progress,
    )
    .await?;

    let index = FlatIndex::build(embedder.model_name(), chunks, vectors)?;
    report.model = Some(index.model().to_string());
    report.dims = index.dims();

    let paths = index.save(&config.index.dir, &config.index.name)?;
    println!(
        "Index '{}' saved to {} ({} vectors, {} dims).",
        config.index.name,
        config.index.dir.display(),
        index.len(),
        index.dims()
    );
    report.written = Some(paths);
    Ok(report)
}

async fn embed_chunks(
    embedder: &dyn EmbeddingProvider,
    chunks: &[Chunk],
    batch_size: usize,
    progress: &dyn IndexProgressReporter,
) -> QaResult<Vec<Vec<f32>>> {
    let total = chunks.len() as u64;
    let mut vectors = Vec::with_capacity(chunks.len());

    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embedded = embedder
            .embed_documents(&texts)
            .await
            .map_err(|e| QaError::Model(format!("embedding failed: {:#}", e)))?;
        if embedded.len() != texts.len() {
            return Err(QaError::Model(format!(
                "embedding provider returned {} vectors for {} texts",
                embedded.len(),
                texts.len()
            )));
        }
        vectors.extend(embedded);
        progress.report(IndexProgressEvent::Embedding {
            n: vectors.len() as u64,
            total,
        });
    }

    Ok(vectors)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashProvider;
    use crate::progress::NoProgress;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serves canned pages by file name; unknown names fail to load.
    struct FakeLoader {
        pages: HashMap<String, Vec<String>>,
        seen: Mutex<Vec<String>>,
    }

    impl FakeLoader {
        fn new(entries: &[(&str, &[&str])]) -> Self {
            Self {
                pages: entries
                    .iter()
                    .map(|(name, pages)| {
                        (name.to_string(), pages.iter().map(|p| p.to_string()).collect())
                    })
                    .collect(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl PageLoader for FakeLoader {
        fn load(&self, path: &Path) -> QaResult<Vec<PageDocument>> {
            let name = display_name(path);
            self.seen.lock().unwrap().push(name.clone());
            let pages = self.pages.get(&name).ok_or_else(|| QaError::Load {
                path: path.to_path_buf(),
                reason: "not a PDF".into(),
            })?;
            Ok(pages
                .iter()
                .enumerate()
                .map(|(i, text)| PageDocument {
                    source: path.to_string_lossy().into_owned(),
                    page: i as i64,
                    text: text.clone(),
                })
                .collect())
        }
    }

    struct ShortChanging;

    #[async_trait]
    impl EmbeddingProvider for ShortChanging {
        fn model_name(&self) -> &str {
            "short"
        }
        async fn embed_documents(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(vec![vec![1.0]; texts.len().saturating_sub(1)])
        }
        async fn embed_query(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![1.0])
        }
    }

    fn setup(files: &[&str]) -> (TempDir, Config) {
        let tmp = TempDir::new().unwrap();
        let pdf_dir = tmp.path().join("data_pdfs");
        std::fs::create_dir_all(&pdf_dir).unwrap();
        for f in files {
            std::fs::write(pdf_dir.join(f), b"%PDF-1.4 placeholder").unwrap();
        }
        let mut config = Config::default();
        config.ingest.pdf_dir = pdf_dir;
        config.index.dir = tmp.path().join("vectorstore");
        config.index.name = "test_index".into();
        config.chunking.chunk_size = 40;
        config.chunking.chunk_overlap = 10;
        config.embedding.batch_size = 2;
        (tmp, config)
    }

    const PAGE_ONE: &str = "Wudu is invalidated by sleep.\n\nIt is also invalidated by loss of consciousness.";
    const PAGE_TWO: &str = "Zakat is due on gold and silver after one lunar year.";

    #[test]
    fn discovery_is_sorted_and_filtered() {
        let (_tmp, config) = setup(&["b.pdf", "a.pdf", "notes.txt"]);
        std::fs::create_dir_all(config.ingest.pdf_dir.join("nested")).unwrap();
        std::fs::write(config.ingest.pdf_dir.join("nested/c.pdf"), b"x").unwrap();

        let flat = discover_pdfs(&config.ingest.pdf_dir, "*.pdf", false).unwrap();
        let names: Vec<String> = flat.iter().map(|p| display_name(p)).collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf"]);

        let deep = discover_pdfs(&config.ingest.pdf_dir, "*.pdf", true).unwrap();
        assert_eq!(deep.len(), 3);
    }

    #[test]
    fn invalid_glob_is_config_error() {
        let (_tmp, config) = setup(&["a.pdf"]);
        let err = discover_pdfs(&config.ingest.pdf_dir, "[", false).unwrap_err();
        assert!(matches!(err, QaError::Config(_)));
    }

    #[tokio::test]
    async fn no_matching_files_loads_nothing() {
        let (_tmp, config) = setup(&["readme.txt"]);
        let loader = FakeLoader::new(&[]);
        let err = index_corpus(&config, None, &loader, &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, QaError::NoInput(_)));
        assert!(loader.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_directory_is_no_input() {
        let (_tmp, mut config) = setup(&[]);
        config.ingest.pdf_dir = config.ingest.pdf_dir.join("does-not-exist");
        let err = index_corpus(&config, None, &FakeLoader::new(&[]), &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, QaError::NoInput(_)));
    }

    #[tokio::test]
    async fn all_files_unreadable_is_empty_corpus() {
        let (_tmp, config) = setup(&["broken1.pdf", "broken2.pdf"]);
        let loader = FakeLoader::new(&[]);
        let err = index_corpus(&config, None, &loader, &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, QaError::EmptyCorpus(_)));
        assert_eq!(loader.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unreadable_file_is_skipped() {
        let (_tmp, config) = setup(&["good.pdf", "broken.pdf"]);
        let loader = FakeLoader::new(&[("good.pdf", &[PAGE_ONE])]);
        let report = index_corpus(&config, None, &loader, &NoProgress)
            .await
            .unwrap();
        assert_eq!(report.files.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].0.ends_with("broken.pdf"));
        assert_eq!(report.pages, 1);
        assert!(report.chunks > 0);
        assert!(report.summary().starts_with("Indexed 1 of 2 files: 1 pages"));
        assert!(report.summary().ends_with("(dry run)"));
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let (_tmp, config) = setup(&["a.pdf"]);
        let loader = FakeLoader::new(&[("a.pdf", &[PAGE_ONE, PAGE_TWO])]);
        let report = index_corpus(&config, None, &loader, &NoProgress)
            .await
            .unwrap();
        assert!(report.written.is_none());
        assert!(!config.index.dir.exists());
    }

    #[tokio::test]
    async fn roundtrip_chunk_count_matches_splitter() {
        let (_tmp, config) = setup(&["a.pdf", "b.pdf"]);
        let loader = FakeLoader::new(&[("a.pdf", &[PAGE_ONE, PAGE_TWO]), ("b.pdf", &[PAGE_TWO])]);
        let embedder = HashProvider::new(32);

        let report = index_corpus(
            &config,
            Some(&embedder as &dyn EmbeddingProvider),
            &loader,
            &NoProgress,
        )
        .await
        .unwrap();
        assert!(report.written.is_some());

        let mut pages = Vec::new();
        for f in &report.files {
            pages.extend(loader.load(f).unwrap());
        }
        let expected = RecursiveSplitter::new(40, 10).split_pages(&pages).len();

        let loaded = FlatIndex::load(&config.index.dir, "test_index").unwrap();
        assert_eq!(loaded.len(), expected);
        assert_eq!(report.chunks, expected);
        assert_eq!(loaded.dims(), 32);
        assert_eq!(loaded.model(), "hash-32");
        assert!(loaded.chunks()[0].source.ends_with("a.pdf"));

        assert_eq!(report.model.as_deref(), Some("hash-32"));
        assert_eq!(report.dims, 32);
        assert_eq!(
            report.summary(),
            format!("Indexed 2 of 2 files: 3 pages, {} chunks, hash-32 (32 dims)", expected)
        );
    }

    #[tokio::test]
    async fn embedding_count_mismatch_aborts_without_writing() {
        let (_tmp, config) = setup(&["a.pdf"]);
        let loader = FakeLoader::new(&[("a.pdf", &[PAGE_ONE])]);
        let err = index_corpus(
            &config,
            Some(&ShortChanging as &dyn EmbeddingProvider),
            &loader,
            &NoProgress,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, QaError::Model(_)));
        assert!(!config.index.dir.exists());
    }

    #[tokio::test]
    async fn missing_key_fails_before_discovery() {
        let (_tmp, mut config) = setup(&[]);
        config.credentials.api_key_env = "PDFQA_INDEXER_TEST_KEY_UNSET".into();
        let err = run_index(&config, None, false, &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, QaError::Config(_)));

        // dry runs need no key and reach discovery
        let err = run_index(&config, None, true, &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, QaError::NoInput(_)));
    }
}
