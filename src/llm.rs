//! Chat model abstraction and HTTP implementations.
//!
//! - **[`GeminiChat`]**: Google Generative Language `generateContent`.
//! - **[`OpenAIChat`]**: OpenAI `POST /v1/chat/completions`.
//! - **[`OllamaChat`]**: a local Ollama instance's `/api/chat`.
//!
//! Every call is a single, non-streaming request. Transient failures are
//! retried by [`post_json_with_retry`]; anything else is returned to the
//! caller, which reports it for the current turn only.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::ChatConfig;
use crate::error::QaError;
use crate::http::{build_client, join_url, post_json_with_retry};
use crate::models::{Message, Role};

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Generate one reply to `messages`, optionally under a system
    /// instruction.
    async fn generate(&self, system: Option<&str>, messages: &[Message]) -> Result<String>;

    /// Single user turn with no history.
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.generate(None, &[Message::user(prompt)]).await
    }
}

// ============ Gemini ============

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    base_url: String,
    max_retries: u32,
}

impl GeminiChat {
    pub fn new(config: &ChatConfig, api_key: &str) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            api_key: api_key.to_string(),
            model: config
                .model
                .strip_prefix("models/")
                .unwrap_or(&config.model)
                .to_string(),
            temperature: config.temperature,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            max_retries: config.max_retries,
        })
    }
}

fn gemini_body(system: Option<&str>, messages: &[Message], temperature: f32) -> Value {
    let contents: Vec<Value> = messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            json!({ "role": role, "parts": [{ "text": m.content }] })
        })
        .collect();

    let mut body = json!({
        "contents": contents,
        "generationConfig": { "temperature": temperature },
    });
    if let Some(system) = system {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }
    body
}

/// Concatenate the text parts of the first candidate.
fn parse_gemini_reply(json: &Value) -> Result<String> {
    let candidate = json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first());

    let Some(candidate) = candidate else {
        if let Some(reason) = json
            .pointer("/promptFeedback/blockReason")
            .and_then(|r| r.as_str())
        {
            bail!("Gemini blocked the prompt: {}", reason);
        }
        bail!("Invalid Gemini response: no candidates");
    };

    let text = candidate
        .pointer("/content/parts")
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<String>()
        })
        .unwrap_or_default();
    Ok(text)
}

#[async_trait]
impl ChatModel for GeminiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, system: Option<&str>, messages: &[Message]) -> Result<String> {
        let url = join_url(
            &self.base_url,
            &format!("v1beta/models/{}:generateContent", self.model),
        );
        let headers = [("x-goog-api-key", self.api_key.clone())];
        let body = gemini_body(system, messages, self.temperature);
        let json = post_json_with_retry(
            &self.client,
            "Gemini",
            &url,
            &headers,
            &body,
            self.max_retries,
        )
        .await?;
        parse_gemini_reply(&json)
    }
}

// ============ OpenAI ============

const OPENAI_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAIChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    base_url: String,
    max_retries: u32,
}

impl OpenAIChat {
    pub fn new(config: &ChatConfig, api_key: &str) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            api_key: api_key.to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            max_retries: config.max_retries,
        })
    }
}

/// Role/content message list with an optional leading system message.
/// Shared by the OpenAI and Ollama request shapes.
fn chat_messages(system: Option<&str>, messages: &[Message]) -> Vec<Value> {
    system
        .map(|s| json!({ "role": "system", "content": s }))
        .into_iter()
        .chain(
            messages
                .iter()
                .map(|m| json!({ "role": m.role.as_str(), "content": m.content })),
        )
        .collect()
}

fn parse_openai_reply(json: &Value) -> Result<String> {
    match json.pointer("/choices/0/message/content") {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Null) => Ok(String::new()),
        _ => bail!("Invalid OpenAI response: missing choices[0].message.content"),
    }
}

#[async_trait]
impl ChatModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, system: Option<&str>, messages: &[Message]) -> Result<String> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": chat_messages(system, messages),
        });
        let headers = [("Authorization", format!("Bearer {}", self.api_key))];
        let json = post_json_with_retry(
            &self.client,
            "OpenAI",
            &join_url(&self.base_url, "v1/chat/completions"),
            &headers,
            &body,
            self.max_retries,
        )
        .await?;
        parse_openai_reply(&json)
    }
}

// ============ Ollama ============

const OLLAMA_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaChat {
    client: reqwest::Client,
    model: String,
    temperature: f32,
    base_url: String,
    max_retries: u32,
}

impl OllamaChat {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            model: config.model.clone(),
            temperature: config.temperature,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OLLAMA_BASE_URL.to_string()),
            max_retries: config.max_retries,
        })
    }
}

fn parse_ollama_reply(json: &Value) -> Result<String> {
    json.pointer("/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message.content"))
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, system: Option<&str>, messages: &[Message]) -> Result<String> {
        let body = json!({
            "model": self.model,
            "stream": false,
            "options": { "temperature": self.temperature },
            "messages": chat_messages(system, messages),
        });
        let json = post_json_with_retry(
            &self.client,
            "Ollama",
            &join_url(&self.base_url, "api/chat"),
            &[],
            &body,
            self.max_retries,
        )
        .await?;
        parse_ollama_reply(&json)
    }
}

/// Create the configured [`ChatModel`].
///
/// | Config Value | Model | Needs API key |
/// |-------------|-------|---------------|
/// | `"gemini"` | [`GeminiChat`] | yes |
/// | `"openai"` | [`OpenAIChat`] | yes |
/// | `"ollama"` | [`OllamaChat`] | no |
pub fn create_chat_model(
    config: &ChatConfig,
    api_key: Option<&str>,
) -> Result<Box<dyn ChatModel>, QaError> {
    let key = || {
        api_key.filter(|k| !k.trim().is_empty()).ok_or_else(|| {
            QaError::Config(format!(
                "an API key is required for the '{}' chat provider",
                config.provider
            ))
        })
    };
    let init = |e: anyhow::Error| QaError::Config(e.to_string());

    match config.provider.as_str() {
        "gemini" => Ok(Box::new(GeminiChat::new(config, key()?).map_err(init)?)),
        "openai" => Ok(Box::new(OpenAIChat::new(config, key()?).map_err(init)?)),
        "ollama" => Ok(Box::new(OllamaChat::new(config).map_err(init)?)),
        other => Err(QaError::Config(format!("Unknown chat provider: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemini_body_maps_roles_and_system() {
        let messages = vec![Message::user("hi"), Message::assistant("hello")];
        let body = gemini_body(Some("be brief"), &messages, 0.3);
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][1]["parts"][0]["text"], "hello");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert!((body["generationConfig"]["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);

        let body = gemini_body(None, &messages, 0.3);
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn gemini_reply_joins_parts() {
        let json = json!({
            "candidates": [{ "content": { "parts": [{ "text": "Wudu " }, { "text": "is..." }] } }]
        });
        assert_eq!(parse_gemini_reply(&json).unwrap(), "Wudu is...");

        let empty = json!({ "candidates": [{ "finishReason": "SAFETY" }] });
        assert_eq!(parse_gemini_reply(&empty).unwrap(), "");
    }

    #[test]
    fn gemini_reply_reports_block_reason() {
        let json = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        let err = parse_gemini_reply(&json).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn chat_messages_prepend_system() {
        let out = chat_messages(Some("sys"), &[Message::user("q")]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["role"], "system");
        assert_eq!(out[1]["role"], "user");
        assert_eq!(chat_messages(None, &[Message::user("q")]).len(), 1);
    }

    #[test]
    fn openai_and_ollama_replies() {
        let json = json!({ "choices": [{ "message": { "content": "answer" } }] });
        assert_eq!(parse_openai_reply(&json).unwrap(), "answer");
        assert!(parse_openai_reply(&json!({})).is_err());

        let json = json!({ "message": { "role": "assistant", "content": "answer" } });
        assert_eq!(parse_ollama_reply(&json).unwrap(), "answer");
        assert!(parse_ollama_reply(&json!({ "done": true })).is_err());
    }

    #[test]
    fn create_requires_key_for_remote_providers() {
        let config = ChatConfig::default();
        assert!(matches!(
            create_chat_model(&config, None),
            Err(QaError::Config(_))
        ));
        let model = create_chat_model(&config, Some("k")).unwrap();
        assert_eq!(model.model_name(), "gemini-2.5-flash");

        let mut config = ChatConfig::default();
        config.provider = "ollama".into();
        assert!(create_chat_model(&config, None).is_ok());
        config.provider = "claude-on-a-toaster".into();
        assert!(create_chat_model(&config, None).is_err());
    }
}
