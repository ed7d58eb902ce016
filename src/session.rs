//! Conversation session: credential, history, cached index and model.
//!
//! A [`Session`] is owned by one caller (the REPL or a one-shot `ask`) and
//! mutated through `&mut self`. The index and chat model are created lazily
//! on the first turn through a [`Bindings`] implementation and then reused
//! until the key changes or the session is reset.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::citation::format_citations;
use crate::compose::{compose_fallback, compose_grounded};
use crate::config::{Config, PromptsConfig, RetrievalConfig};
use crate::embedding::create_provider;
use crate::error::{QaError, QaResult};
use crate::index::FlatIndex;
use crate::llm::{create_chat_model, ChatModel};
use crate::models::Message;
use crate::router::{route, AnswerMode, Retriever, VectorStore};

/// Creates the retriever and chat model a session talks to.
#[async_trait]
pub trait Bindings: Send + Sync {
    async fn load_retriever(&self, api_key: Option<&str>) -> QaResult<Arc<dyn Retriever>>;
    fn chat_model(&self, api_key: Option<&str>) -> QaResult<Arc<dyn ChatModel>>;
}

/// Loads the persisted index from disk and talks to the configured APIs.
pub struct LiveBindings {
    config: Config,
}

impl LiveBindings {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Bindings for LiveBindings {
    async fn load_retriever(&self, api_key: Option<&str>) -> QaResult<Arc<dyn Retriever>> {
        let dir = self.config.index.dir.clone();
        let name = self.config.index.name.clone();
        let index = tokio::task::spawn_blocking(move || FlatIndex::load(&dir, &name))
            .await
            .map_err(|e| {
                QaError::index_load(&self.config.index.dir, &self.config.index.name, e)
            })??;
        tracing::debug!(
            chunks = index.len(),
            dims = index.dims(),
            model = index.model(),
            "index loaded"
        );
        let embedder = create_provider(&self.config.embedding, api_key)?;
        Ok(Arc::new(VectorStore::new(index, embedder)))
    }

    fn chat_model(&self, api_key: Option<&str>) -> QaResult<Arc<dyn ChatModel>> {
        Ok(Arc::from(create_chat_model(&self.config.chat, api_key)?))
    }
}

/// Mode label shown to the user for a finished turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnMode {
    Grounded,
    Fallback,
    Error,
}

impl From<AnswerMode> for TurnMode {
    fn from(mode: AnswerMode) -> Self {
        match mode {
            AnswerMode::Grounded => TurnMode::Grounded,
            AnswerMode::Fallback => TurnMode::Fallback,
        }
    }
}

impl TurnMode {
    pub fn label(&self) -> &'static str {
        match self {
            TurnMode::Grounded => "grounded",
            TurnMode::Fallback => "fallback",
            TurnMode::Error => "error",
        }
    }
}

/// Result of one question.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub question: String,
    pub answer: String,
    pub mode: TurnMode,
    pub citations: Vec<String>,
    pub confidence: f64,
    pub top_k: usize,
    /// Grounded only because fallback is disabled.
    pub no_evidence: bool,
    pub retrieval_error: Option<String>,
    pub model_error: Option<String>,
}

impl TurnOutcome {
    /// `Sources (top_k=3, max_sim≈0.82):`
    pub fn evidence_header(&self) -> String {
        format!(
            "Sources (top_k={}, max_sim≈{:.2}):",
            self.top_k, self.confidence
        )
    }

    pub fn mode_note(&self) -> &'static str {
        match self.mode {
            TurnMode::Grounded if self.no_evidence => {
                "Mode: document answer, but no passage passed the relevance threshold (fallback disabled)"
            }
            TurnMode::Grounded => "Mode: answered from the indexed documents",
            TurnMode::Fallback => "Mode: general answer (no sufficiently relevant passage found)",
            TurnMode::Error => "Mode: error",
        }
    }
}

pub struct Session {
    retrieval: RetrievalConfig,
    prompts: PromptsConfig,
    key_required: bool,
    api_key: Option<String>,
    allow_fallback: bool,
    messages: Vec<Message>,
    retriever: Option<Arc<dyn Retriever>>,
    model: Option<Arc<dyn ChatModel>>,
    bindings: Box<dyn Bindings>,
}

impl Session {
    pub fn new(config: &Config, bindings: Box<dyn Bindings>) -> Self {
        Self {
            retrieval: config.retrieval.clone(),
            prompts: config.prompts.clone(),
            key_required: config.embedding.requires_api_key() || config.chat.requires_api_key(),
            api_key: None,
            allow_fallback: config.retrieval.allow_fallback,
            messages: Vec::new(),
            retriever: None,
            model: None,
            bindings,
        }
    }

    /// A session backed by the on-disk index and the configured providers.
    pub fn live(config: &Config) -> Self {
        Self::new(config, Box::new(LiveBindings::new(config.clone())))
    }

    /// Set the credential. Returns `true` if it differs from the previous
    /// one, in which case history and cached bindings were dropped.
    pub fn set_api_key(&mut self, key: &str) -> QaResult<bool> {
        let key = key.trim();
        if key.is_empty() {
            return Err(QaError::Config("API key must not be empty".to_string()));
        }
        if self.api_key.as_deref() == Some(key) {
            return Ok(false);
        }
        let had_key = self.api_key.is_some();
        self.api_key = Some(key.to_string());
        self.reset();
        if had_key {
            tracing::info!("API key changed; conversation and cached bindings cleared");
        }
        Ok(true)
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Whether a turn can run with the current credential.
    pub fn is_ready(&self) -> bool {
        !self.key_required || self.api_key.is_some()
    }

    pub fn set_allow_fallback(&mut self, allow: bool) {
        self.allow_fallback = allow;
    }

    pub fn allow_fallback(&self) -> bool {
        self.allow_fallback
    }

    /// Clear history and cached bindings. Key and fallback flag stay.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.retriever = None;
        self.model = None;
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    async fn retriever(&mut self) -> QaResult<Arc<dyn Retriever>> {
        if let Some(r) = &self.retriever {
            return Ok(r.clone());
        }
        let r = self.bindings.load_retriever(self.api_key.as_deref()).await?;
        self.retriever = Some(r.clone());
        Ok(r)
    }

    fn model(&mut self) -> QaResult<Arc<dyn ChatModel>> {
        if let Some(m) = &self.model {
            return Ok(m.clone());
        }
        let m = self.bindings.chat_model(self.api_key.as_deref())?;
        self.model = Some(m.clone());
        Ok(m)
    }

    /// Answer one question.
    ///
    /// Returns `Ok(None)` for a blank question. Index and credential
    /// problems are returned as errors and leave the history untouched;
    /// model failures become the turn's answer text.
    pub async fn handle_turn(&mut self, question: &str) -> QaResult<Option<TurnOutcome>> {
        let question = question.trim();
        if question.is_empty() {
            return Ok(None);
        }
        if !self.is_ready() {
            return Err(QaError::Config(
                "no API key set; enter one with /key <value> or set the environment variable"
                    .to_string(),
            ));
        }

        let retriever = self.retriever().await?;
        let model = self.model()?;
        self.messages.push(Message::user(question));

        let top_k = self.retrieval.top_k;
        let routed = route(
            question,
            retriever.as_ref(),
            top_k,
            self.retrieval.threshold,
            self.allow_fallback,
        )
        .await;

        let composed = match routed.mode {
            AnswerMode::Grounded => {
                compose_grounded(
                    model.as_ref(),
                    &self.prompts.grounded_template,
                    question,
                    &routed.context,
                )
                .await
            }
            AnswerMode::Fallback => {
                compose_fallback(model.as_ref(), &self.prompts.fallback_system, &self.messages)
                    .await
            }
        };

        let (answer, mode, model_error) = match composed {
            Ok(answer) => (answer, TurnMode::from(routed.mode), None),
            Err(e) => {
                tracing::warn!(error = %e, "chat model failed");
                let detail = match e {
                    QaError::Model(msg) => msg,
                    other => other.to_string(),
                };
                (
                    format!("An error occurred: {}", detail),
                    TurnMode::Error,
                    Some(detail),
                )
            }
        };

        let citations = if mode == TurnMode::Grounded {
            format_citations(routed.context.iter().map(|r| &r.chunk))
        } else {
            Vec::new()
        };

        self.messages.push(Message::assistant(answer.clone()));

        Ok(Some(TurnOutcome {
            question: question.to_string(),
            answer,
            mode,
            citations,
            confidence: routed.confidence,
            top_k,
            no_evidence: routed.no_evidence,
            retrieval_error: routed.retrieval_error,
            model_error,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::tests::ScriptedModel;
    use crate::compose::EMPTY_REPLY;
    use crate::models::{Chunk, Role, ScoredChunk};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed(Vec<(i64, f32)>);

    #[async_trait]
    impl Retriever for Fixed {
        async fn search(&self, _query: &str, k: usize) -> QaResult<Vec<ScoredChunk>> {
            Ok(self
                .0
                .iter()
                .take(k)
                .map(|(page, distance)| ScoredChunk {
                    chunk: Chunk {
                        id: page.to_string(),
                        text: format!("passage on page {}", page),
                        source: "data_pdfs/kitab.pdf".into(),
                        page: *page,
                        chunk_index: 0,
                        hash: String::new(),
                    },
                    distance: *distance,
                })
                .collect())
        }
    }

    struct Fake {
        hits: Vec<(i64, f32)>,
        model: Arc<ScriptedModel>,
        loads: Arc<AtomicUsize>,
        fail_load: bool,
    }

    #[async_trait]
    impl Bindings for Fake {
        async fn load_retriever(&self, _api_key: Option<&str>) -> QaResult<Arc<dyn Retriever>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_load {
                return Err(QaError::index_load("vectorstore", "fiqih_index", "missing"));
            }
            Ok(Arc::new(Fixed(self.hits.clone())))
        }

        fn chat_model(&self, _api_key: Option<&str>) -> QaResult<Arc<dyn ChatModel>> {
            Ok(self.model.clone())
        }
    }

    struct Harness {
        session: Session,
        model: Arc<ScriptedModel>,
        loads: Arc<AtomicUsize>,
    }

    fn harness(hits: Vec<(i64, f32)>, model: ScriptedModel, fail_load: bool) -> Harness {
        let model = Arc::new(model);
        let loads = Arc::new(AtomicUsize::new(0));
        let bindings = Fake {
            hits,
            model: model.clone(),
            loads: loads.clone(),
            fail_load,
        };
        let mut session = Session::new(&Config::default(), Box::new(bindings));
        session.set_api_key("test-key").unwrap();
        Harness {
            session,
            model,
            loads,
        }
    }

    #[tokio::test]
    async fn grounded_turn_cites_pages() {
        let mut h = harness(
            vec![(4, 0.1), (4, 0.2), (0, 0.3)],
            ScriptedModel::replying("from the book"),
            false,
        );
        let turn = h.session.handle_turn("what breaks wudu?").await.unwrap().unwrap();
        assert_eq!(turn.mode, TurnMode::Grounded);
        assert_eq!(turn.answer, "from the book");
        assert_eq!(turn.citations, vec!["kitab.pdf, page 1", "kitab.pdf, page 5"]);
        assert!(turn.evidence_header().starts_with("Sources (top_k=3, max_sim≈0.91"));

        let messages = h.session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].content, "from the book");
        // grounded prompts carry no history
        assert_eq!(h.model.calls.lock().unwrap()[0].1.len(), 1);
    }

    #[tokio::test]
    async fn fallback_turn_sends_history() {
        let mut h = harness(vec![(1, 5.0)], ScriptedModel::replying("general"), false);
        h.session.handle_turn("first").await.unwrap();
        let turn = h.session.handle_turn("second").await.unwrap().unwrap();
        assert_eq!(turn.mode, TurnMode::Fallback);
        assert!(turn.citations.is_empty());

        let calls = h.model.calls.lock().unwrap();
        let (system, history) = &calls[1];
        assert!(system.is_some());
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].content, "second");
    }

    #[tokio::test]
    async fn fallback_disabled_flags_missing_evidence() {
        let mut h = harness(vec![(1, 5.0)], ScriptedModel::replying("x"), false);
        h.session.set_allow_fallback(false);
        let turn = h.session.handle_turn("q").await.unwrap().unwrap();
        assert_eq!(turn.mode, TurnMode::Grounded);
        assert!(turn.no_evidence);
        assert!(turn.mode_note().contains("fallback disabled"));
    }

    #[tokio::test]
    async fn model_error_becomes_answer_text() {
        let mut h = harness(vec![(1, 0.0)], ScriptedModel::failing("503 overloaded"), false);
        let turn = h.session.handle_turn("q").await.unwrap().unwrap();
        assert_eq!(turn.mode, TurnMode::Error);
        assert!(turn.answer.starts_with("An error occurred: "));
        assert!(turn.answer.contains("503 overloaded"));
        assert!(turn.citations.is_empty());
        assert_eq!(h.session.messages().len(), 2);
    }

    #[tokio::test]
    async fn empty_fallback_reply_is_replaced() {
        let mut h = harness(vec![], ScriptedModel::replying(""), false);
        let turn = h.session.handle_turn("q").await.unwrap().unwrap();
        assert_eq!(turn.mode, TurnMode::Fallback);
        assert_eq!(turn.confidence, 0.0);
        assert_eq!(turn.answer, EMPTY_REPLY);
    }

    #[tokio::test]
    async fn blank_question_is_ignored() {
        let mut h = harness(vec![], ScriptedModel::replying("x"), false);
        assert!(h.session.handle_turn("   ").await.unwrap().is_none());
        assert!(h.session.messages().is_empty());
        assert_eq!(h.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn index_is_loaded_once() {
        let mut h = harness(vec![(1, 0.0)], ScriptedModel::replying("x"), false);
        h.session.handle_turn("a").await.unwrap();
        h.session.handle_turn("b").await.unwrap();
        assert_eq!(h.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn index_load_failure_is_not_recorded() {
        let mut h = harness(vec![], ScriptedModel::replying("x"), true);
        let err = h.session.handle_turn("q").await.unwrap_err();
        assert!(matches!(err, QaError::IndexLoad { .. }));
        assert!(h.session.messages().is_empty());
    }

    #[tokio::test]
    async fn missing_key_is_config_error() {
        let bindings = Fake {
            hits: vec![],
            model: Arc::new(ScriptedModel::replying("x")),
            loads: Arc::new(AtomicUsize::new(0)),
            fail_load: false,
        };
        let mut session = Session::new(&Config::default(), Box::new(bindings));
        assert!(!session.is_ready());
        let err = session.handle_turn("q").await.unwrap_err();
        assert!(matches!(err, QaError::Config(_)));
        assert!(matches!(session.set_api_key("  "), Err(QaError::Config(_))));
    }

    #[tokio::test]
    async fn key_change_clears_history_and_caches() {
        let mut h = harness(vec![(1, 0.0)], ScriptedModel::replying("x"), false);
        h.session.handle_turn("a").await.unwrap();
        assert_eq!(h.session.messages().len(), 2);

        assert!(!h.session.set_api_key("test-key").unwrap());
        assert_eq!(h.session.messages().len(), 2);

        assert!(h.session.set_api_key("other-key").unwrap());
        assert!(h.session.messages().is_empty());
        h.session.handle_turn("b").await.unwrap();
        assert_eq!(h.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reset_keeps_key_and_fallback_flag() {
        let mut h = harness(vec![(1, 0.0)], ScriptedModel::replying("x"), false);
        h.session.set_allow_fallback(false);
        h.session.handle_turn("a").await.unwrap();
        h.session.reset();
        assert!(h.session.messages().is_empty());
        assert!(h.session.has_api_key());
        assert!(!h.session.allow_fallback());
        h.session.handle_turn("b").await.unwrap();
        assert_eq!(h.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn outcome_serializes_mode_label() {
        let turn = TurnOutcome {
            question: "q".into(),
            answer: "a".into(),
            mode: TurnMode::Fallback,
            citations: vec![],
            confidence: 0.25,
            top_k: 3,
            no_evidence: false,
            retrieval_error: None,
            model_error: None,
        };
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["mode"], "fallback");
        assert_eq!(TurnMode::Error.label(), "error");
    }
}
