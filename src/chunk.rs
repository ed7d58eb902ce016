//! Recursive character text splitter.
//!
//! Splits page text into [`Chunk`]s of at most `chunk_size` characters,
//! trying the largest semantic boundary first (paragraph break, then line
//! break, then space) and only falling back to single characters when no
//! separator is left. Consecutive chunks from the same page share up to
//! `chunk_overlap` characters so context at a boundary is not lost.
//!
//! Lengths are measured in Unicode scalar values, not bytes.
//!
//! Each chunk receives a random UUID plus a SHA-256 hash of its text.

use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::models::{Chunk, PageDocument};

/// Separators in priority order. The empty string means "split into characters".
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveSplitter {
    /// Build a splitter with [`DEFAULT_SEPARATORS`].
    ///
    /// Callers validate `chunk_overlap < chunk_size` through
    /// [`Config::validate`](crate::config::Config::validate).
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split raw text into trimmed, non-empty pieces.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    /// Split every page and attach source metadata to each piece.
    ///
    /// Chunks keep page order; `chunk_index` restarts at 0 on every page.
    pub fn split_pages(&self, pages: &[PageDocument]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for page in pages {
            for (i, piece) in self.split_text(&page.text).into_iter().enumerate() {
                chunks.push(make_chunk(&page.source, page.page, i, piece));
            }
        }
        chunks
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut finer: &[String] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = "";
                break;
            }
            if text.contains(sep.as_str()) {
                separator = sep.as_str();
                finer = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut small: Vec<String> = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(&piece) < self.chunk_size {
                small.push(piece);
                continue;
            }
            if !small.is_empty() {
                chunks.extend(self.merge_splits(&small));
                small.clear();
            }
            if finer.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_recursive(&piece, finer));
            }
        }
        if !small.is_empty() {
            chunks.extend(self.merge_splits(&small));
        }
        chunks
    }

    /// Greedily pack pieces into chunks, carrying the tail of each chunk
    /// into the next one while it fits in `chunk_overlap`.
    ///
    /// Pieces already carry their separator, so they are joined with "".
    fn merge_splits(&self, pieces: &[String]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !current.is_empty() {
                if let Some(doc) = join_trimmed(&current) {
                    docs.push(doc);
                }
                while total > self.chunk_overlap
                    || (total + len > self.chunk_size && total > 0)
                {
                    match current.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }
            current.push_back(piece.as_str());
            total += len;
        }

        if let Some(doc) = join_trimmed(&current) {
            docs.push(doc);
        }
        docs
    }
}

/// Split on `separator`, re-attaching it to the start of each following
/// piece. Empty pieces are dropped. An empty separator yields characters.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }

    let mut parts = text.split(separator);
    let mut out = Vec::new();
    if let Some(first) = parts.next() {
        if !first.is_empty() {
            out.push(first.to_string());
        }
    }
    for part in parts {
        out.push(format!("{}{}", separator, part));
    }
    out
}

fn join_trimmed(parts: &VecDeque<&str>) -> Option<String> {
    let joined: String = parts.iter().copied().collect();
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn make_chunk(source: &str, page: i64, index: usize, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        text,
        source: source.to_string(),
        page,
        chunk_index: index,
        hash,
    }
}
