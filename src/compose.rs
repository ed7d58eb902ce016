//! Answer composers: grounded (template + context) and fallback (history).

use crate::citation::render_context;
use crate::error::{QaError, QaResult};
use crate::llm::ChatModel;
use crate::models::{Message, ScoredChunk};

pub const EMPTY_REPLY: &str = "I'm sorry, I couldn't generate a response.";

/// Substitute `{question}` and `{context}` in a grounded template.
///
/// Single pass over the template, so placeholder-like text inside the
/// question or the context is never substituted again.
pub fn fill_template(template: &str, question: &str, context: &str) -> String {
    const PLACEHOLDERS: [&str; 2] = ["{question}", "{context}"];
    let mut out = String::with_capacity(template.len() + question.len() + context.len());
    let mut rest = template;

    loop {
        let next = PLACEHOLDERS
            .iter()
            .filter_map(|p| rest.find(p).map(|at| (at, *p)))
            .min_by_key(|(at, _)| *at);
        let Some((at, placeholder)) = next else {
            out.push_str(rest);
            return out;
        };
        out.push_str(&rest[..at]);
        out.push_str(if placeholder == "{question}" {
            question
        } else {
            context
        });
        rest = &rest[at + placeholder.len()..];
    }
}

/// Answer from retrieved excerpts. Sent as a single user turn, no history.
pub async fn compose_grounded(
    model: &dyn ChatModel,
    template: &str,
    question: &str,
    context: &[ScoredChunk],
) -> QaResult<String> {
    let prompt = fill_template(template, question, &render_context(context));
    model
        .complete(&prompt)
        .await
        .map_err(|e| QaError::Model(format!("{:#}", e)))
}

/// Answer from general knowledge over the whole conversation.
pub async fn compose_fallback(
    model: &dyn ChatModel,
    system: &str,
    history: &[Message],
) -> QaResult<String> {
    let reply = model
        .generate(Some(system), history)
        .await
        .map_err(|e| QaError::Model(format!("{:#}", e)))?;
    if reply.trim().is_empty() {
        return Ok(EMPTY_REPLY.to_string());
    }
    Ok(reply)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{Chunk, Role};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every call and answers with a canned reply.
    pub(crate) struct ScriptedModel {
        pub reply: Result<String, String>,
        pub calls: Mutex<Vec<(Option<String>, Vec<Message>)>>,
    }

    impl ScriptedModel {
        pub fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(error: &str) -> Self {
            Self {
                reply: Err(error.to_string()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            system: Option<&str>,
            messages: &[Message],
        ) -> anyhow::Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((system.map(str::to_string), messages.to_vec()));
            self.reply.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    #[test]
    fn template_placeholders_are_filled() {
        let out = fill_template("Q: {question}\nC:\n{context}", "what is wudu?", "- (a.pdf p.1) x");
        assert_eq!(out, "Q: what is wudu?\nC:\n- (a.pdf p.1) x");
    }

    #[test]
    fn question_text_is_not_reinterpreted() {
        let out = fill_template("{question} | {context}", "say {context}", "CTX");
        assert_eq!(out, "say {context} | CTX");

        let out = fill_template("{context} / {question}", "Q", "has {question}");
        assert_eq!(out, "has {question} / Q");
    }

    #[tokio::test]
    async fn grounded_sends_single_turn_with_context() {
        let model = ScriptedModel::replying("grounded answer");
        let context = vec![ScoredChunk {
            chunk: Chunk {
                id: "1".into(),
                text: "wudu has four pillars".into(),
                source: "data/kitab.pdf".into(),
                page: 2,
                chunk_index: 0,
                hash: String::new(),
            },
            distance: 0.1,
        }];
        let answer = compose_grounded(&model, "{question}\n{context}", "pillars?", &context)
            .await
            .unwrap();
        assert_eq!(answer, "grounded answer");

        let calls = model.calls.lock().unwrap();
        let (system, messages) = &calls[0];
        assert!(system.is_none());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(
            messages[0].content,
            "pillars?\n- (kitab.pdf p.3) wudu has four pillars"
        );
    }

    #[tokio::test]
    async fn fallback_sends_history_and_system() {
        let model = ScriptedModel::replying("general answer");
        let history = vec![
            Message::user("first"),
            Message::assistant("reply"),
            Message::user("second"),
        ];
        let answer = compose_fallback(&model, "be kind", &history).await.unwrap();
        assert_eq!(answer, "general answer");
        let calls = model.calls.lock().unwrap();
        assert_eq!(calls[0].0.as_deref(), Some("be kind"));
        assert_eq!(calls[0].1, history);
    }

    #[tokio::test]
    async fn empty_fallback_reply_becomes_placeholder() {
        let model = ScriptedModel::replying("   ");
        let answer = compose_fallback(&model, "s", &[Message::user("q")])
            .await
            .unwrap();
        assert_eq!(answer, EMPTY_REPLY);
    }

    #[tokio::test]
    async fn model_failure_is_typed() {
        let model = ScriptedModel::failing("quota exceeded");
        let err = compose_grounded(&model, "{question}{context}", "q", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, QaError::Model(ref m) if m.contains("quota exceeded")));
    }
}
