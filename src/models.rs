//! Core data models used throughout pdf-qa.
//!
//! These types represent the pages, chunks, retrieval hits and conversation
//! messages that flow through the indexing and answering pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// One page of extracted PDF text, before splitting.
#[derive(Debug, Clone)]
pub struct PageDocument {
    /// Path of the PDF the page came from, as discovered.
    pub source: String,
    /// 0-indexed page number.
    pub page: i64,
    pub text: String,
}

/// A bounded span of page text, persisted in the index sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    /// Path of the source PDF.
    pub source: String,
    /// 0-indexed page number. Negative when the page is unknown.
    pub page: i64,
    /// Position of the chunk within its page.
    pub chunk_index: usize,
    /// SHA-256 of `text`.
    pub hash: String,
}

impl Chunk {
    /// File name of the source without its directory.
    pub fn file_name(&self) -> &str {
        Path::new(&self.source)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.source)
    }

    /// 1-indexed page number for display, or `None` if not positive.
    pub fn display_page(&self) -> Option<i64> {
        let page = self.page.checked_add(1)?;
        (page > 0).then_some(page)
    }
}

/// A chunk returned by similarity search with its raw distance.
///
/// Distances are non-negative and 0 means identical. A NaN or negative
/// distance is treated as malformed by the router.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub distance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}
