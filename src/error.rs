//! Error taxonomy for indexing and answering.
//!
//! Indexing-time errors abort the whole run (either a usable index is
//! produced or none is). Query-time errors are isolated to a single turn:
//! [`QaError::Retrieval`] is recovered by the router and
//! [`QaError::Model`] becomes the visible answer text for that turn.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QaError {
    /// Missing or invalid credential or configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// The input directory contained no matching files.
    #[error("no PDF files found in '{}'", .0.display())]
    NoInput(PathBuf),

    /// A single PDF could not be read or parsed. Recorded, never fatal.
    #[error("could not load {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    /// No matching file yielded any usable text.
    #[error("failed to load any documents from the PDF files in '{}'", .0.display())]
    EmptyCorpus(PathBuf),

    /// The persisted index is missing, incomplete, or inconsistent.
    #[error("failed to load index '{name}' from '{}': {reason}", dir.display())]
    IndexLoad {
        dir: PathBuf,
        name: String,
        reason: String,
    },

    /// Embedding the query or searching the index failed.
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    /// The embedding or chat model returned an error.
    #[error("model error: {0}")]
    Model(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl QaError {
    pub(crate) fn index_load(
        dir: impl Into<PathBuf>,
        name: &str,
        reason: impl std::fmt::Display,
    ) -> Self {
        QaError::IndexLoad {
            dir: dir.into(),
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type QaResult<T> = std::result::Result<T, QaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_path() {
        let err = QaError::NoInput(PathBuf::from("data_pdfs"));
        assert_eq!(err.to_string(), "no PDF files found in 'data_pdfs'");

        let err = QaError::index_load("vectorstore", "kitab", "missing kitab.vec");
        assert!(err.to_string().contains("'kitab'"));
        assert!(err.to_string().contains("missing kitab.vec"));
    }
}
