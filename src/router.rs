//! Retrieval and the grounded/fallback routing decision.
//!
//! A question is embedded, the `top_k` nearest chunks are retrieved with
//! their raw squared-L2 distances, and each distance is mapped to a bounded
//! similarity:
//!
//! ```text
//! similarity = 1 / (1 + d)        d >= 0, finite
//! similarity = 0                  otherwise
//! ```
//!
//! The best similarity is the turn's confidence. A turn is under-grounded
//! when confidence is below the threshold or nothing was retrieved; it then
//! goes to fallback answering if allowed, otherwise it stays grounded and is
//! flagged `no_evidence`.

use async_trait::async_trait;
use serde::Serialize;

use crate::embedding::EmbeddingProvider;
use crate::error::{QaError, QaResult};
use crate::index::FlatIndex;
use crate::models::ScoredChunk;

/// How a turn is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerMode {
    Grounded,
    Fallback,
}

impl AnswerMode {
    pub fn label(&self) -> &'static str {
        match self {
            AnswerMode::Grounded => "grounded",
            AnswerMode::Fallback => "fallback",
        }
    }
}

/// Map a raw distance to a similarity in `(0, 1]`.
///
/// NaN, negative and infinite inputs yield `0.0`.
///
/// ```rust
/// use pdf_qa::router::score_to_similarity;
///
/// assert_eq!(score_to_similarity(0.0), 1.0);
/// assert_eq!(score_to_similarity(1.0), 0.5);
/// assert_eq!(score_to_similarity(f64::NAN), 0.0);
/// ```
pub fn score_to_similarity(distance: f64) -> f64 {
    if !distance.is_finite() || distance < 0.0 {
        return 0.0;
    }
    1.0 / (1.0 + distance)
}

/// Best similarity over the retrieved set, `0.0` when empty.
pub fn confidence(results: &[ScoredChunk]) -> f64 {
    results
        .iter()
        .map(|r| score_to_similarity(r.distance as f64))
        .fold(0.0, f64::max)
}

/// Routing decision. Returns the mode and whether the turn lacks evidence.
pub fn decide(
    confidence: f64,
    threshold: f64,
    allow_fallback: bool,
    retrieved_nothing: bool,
) -> (AnswerMode, bool) {
    let under_grounded = retrieved_nothing || confidence < threshold;
    match (under_grounded, allow_fallback) {
        (false, _) => (AnswerMode::Grounded, false),
        (true, true) => (AnswerMode::Fallback, false),
        (true, false) => (AnswerMode::Grounded, true),
    }
}

/// Anything that can return the nearest chunks for a question.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> QaResult<Vec<ScoredChunk>>;
}

/// A loaded index paired with the embedder that built it.
pub struct VectorStore {
    index: FlatIndex,
    embedder: Box<dyn EmbeddingProvider>,
}

impl VectorStore {
    pub fn new(index: FlatIndex, embedder: Box<dyn EmbeddingProvider>) -> Self {
        if index.model() != embedder.model_name() {
            tracing::warn!(
                index_model = index.model(),
                query_model = embedder.model_name(),
                "index was built with a different embedding model"
            );
        }
        Self { index, embedder }
    }
}

#[async_trait]
impl Retriever for VectorStore {
    async fn search(&self, query: &str, k: usize) -> QaResult<Vec<ScoredChunk>> {
        let vector = self
            .embedder
            .embed_query(query)
            .await
            .map_err(|e| QaError::Retrieval(format!("query embedding failed: {:#}", e)))?;
        self.index.search(&vector, k)
    }
}

/// Everything the composers need from a routed turn.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub mode: AnswerMode,
    pub context: Vec<ScoredChunk>,
    pub confidence: f64,
    pub no_evidence: bool,
    /// Set when retrieval failed and the turn degraded to empty context.
    pub retrieval_error: Option<String>,
}

/// Retrieve and decide. Never fails: a retrieval error degrades to empty
/// context with confidence `0.0` and is kept in
/// [`RouteOutcome::retrieval_error`].
pub async fn route(
    question: &str,
    retriever: &dyn Retriever,
    top_k: usize,
    threshold: f64,
    allow_fallback: bool,
) -> RouteOutcome {
    let (context, retrieval_error) = match retriever.search(question, top_k).await {
        Ok(results) => (results, None),
        Err(e) => {
            tracing::warn!(error = %e, "retrieval failed, continuing without context");
            (Vec::new(), Some(e.to_string()))
        }
    };

    let confidence = confidence(&context);
    let (mode, no_evidence) = decide(confidence, threshold, allow_fallback, context.is_empty());
    tracing::debug!(
        mode = mode.label(),
        confidence,
        retrieved = context.len(),
        "routed question"
    );

    RouteOutcome {
        mode,
        context,
        confidence,
        no_evidence,
        retrieval_error,
    }
}
