//! Citation formatting and context rendering.

use std::collections::BTreeSet;

use crate::models::{Chunk, ScoredChunk};

/// Deduplicated, sorted `"<file>, page <n>"` strings.
///
/// Pages are shown 1-indexed; chunks whose displayed page is not positive
/// are left out. Two chunks from the same file and page yield one citation.
///
/// ```rust
/// use pdf_qa::citation::format_citations;
/// use pdf_qa::models::Chunk;
///
/// let chunk = |source: &str, page: i64| Chunk {
///     id: String::new(),
///     text: String::new(),
///     source: source.to_string(),
///     page,
///     chunk_index: 0,
///     hash: String::new(),
/// };
/// let cites = format_citations(&[
///     chunk("data/b.pdf", 2),
///     chunk("data/a.pdf", 0),
///     chunk("data/b.pdf", 2),
/// ]);
/// assert_eq!(cites, vec!["a.pdf, page 1", "b.pdf, page 3"]);
/// ```
pub fn format_citations<'a>(chunks: impl IntoIterator<Item = &'a Chunk>) -> Vec<String> {
    let cites: BTreeSet<String> = chunks
        .into_iter()
        .filter_map(|c| {
            c.display_page()
                .map(|page| format!("{}, page {}", c.file_name(), page))
        })
        .collect();
    cites.into_iter().collect()
}

/// Render retrieved chunks as the `{context}` block of the grounded prompt.
///
/// One line group per chunk: `- (<file> p.<page>) <text>`, with `?` for an
/// unknown page.
pub fn render_context(results: &[ScoredChunk]) -> String {
    results
        .iter()
        .map(|r| {
            let page = r
                .chunk
                .display_page()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "?".to_string());
            format!("- ({} p.{}) {}", r.chunk.file_name(), page, r.chunk.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
