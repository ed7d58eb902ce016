//! # pdf-qa
//!
//! Document-grounded question answering over a folder of PDFs.
//!
//! An indexing run splits every page into overlapping chunks, embeds them
//! and writes a flat vector index. At question time the question is
//! embedded, the nearest chunks are retrieved, and their distances are
//! turned into a confidence score. Confident turns are answered from the
//! retrieved excerpts with page citations; the rest fall back to a general
//! answer (or are flagged as lacking evidence when fallback is off).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────────────┐
//! │   PDFs   │──▶│ Split+Embed  │──▶│ <name>.vec/.json│
//! └──────────┘   └──────────────┘   └────────┬────────┘
//!                                            │
//!                  question ──▶ Router ◀─────┘
//!                                 │
//!                     ┌───────────┴───────────┐
//!                     ▼                       ▼
//!                grounded answer       fallback answer
//!                 + citations         (with history)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export GOOGLE_API_KEY=...
//! pdfqa index --pdf-dir data_pdfs       # build vectorstore/fiqih_index.*
//! pdfqa info                            # inspect the index
//! pdfqa ask "what invalidates wudu?"    # one question
//! pdfqa chat                            # interactive session
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF page text extraction |
//! | [`chunk`] | Recursive character splitting |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Flat vector index and its on-disk format |
//! | [`indexer`] | Index build pipeline |
//! | [`router`] | Retrieval, confidence and routing |
//! | [`citation`] | Citation and context formatting |
//! | [`llm`] | Chat model abstraction |
//! | [`compose`] | Grounded and fallback answer composition |
//! | [`session`] | Conversation state |
//! | [`repl`] | Interactive chat loop |
//! | [`info`] | Index summary |
//! | [`progress`] | Indexing progress reporting |

pub mod chunk;
pub mod citation;
pub mod compose;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
mod http;
pub mod index;
pub mod indexer;
pub mod info;
pub mod llm;
pub mod models;
pub mod progress;
pub mod repl;
pub mod router;
pub mod session;
