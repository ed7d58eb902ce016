//! Configuration parsing and validation.
//!
//! pdf-qa is configured via a TOML file passed with `--config`. Every section
//! and field is optional; missing values take the defaults below. See
//! `config/pdfqa.example.toml` for a complete example.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::QaError;

/// Default config location used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "./config/pdfqa.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_index_name")]
    pub name: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            name: default_index_name(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("vectorstore")
}
fn default_index_name() -> String {
    "fiqih_index".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_pdf_dir")]
    pub pdf_dir: PathBuf,
    #[serde(default = "default_include_glob")]
    pub include_glob: String,
    #[serde(default)]
    pub recursive: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            pdf_dir: default_pdf_dir(),
            include_glob: default_include_glob(),
            recursive: false,
        }
    }
}

fn default_pdf_dir() -> PathBuf {
    PathBuf::from("data_pdfs")
}
fn default_include_glob() -> String {
    "*.pdf".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// Left empty, the provider's default model is filled in on load.
    #[serde(default)]
    pub model: String,
    /// Vector width for the `hash` provider; other providers report their own.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(&default_embedding_provider()).to_string(),
            dims: None,
            base_url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "gemini".to_string()
}
fn default_embedding_model(provider: &str) -> &'static str {
    match provider {
        "openai" => "text-embedding-3-small",
        "ollama" => "nomic-embed-text",
        "local" => "multilingual-e5-small",
        "hash" => "hash",
        _ => "models/text-embedding-004",
    }
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    /// Whether this provider authenticates with the configured API key.
    pub fn requires_api_key(&self) -> bool {
        matches!(self.provider.as_str(), "gemini" | "openai")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: default_chat_provider(),
            model: default_chat_model(&default_chat_provider()).to_string(),
            temperature: default_temperature(),
            base_url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_chat_timeout_secs(),
        }
    }
}

fn default_chat_provider() -> String {
    "gemini".to_string()
}
fn default_chat_model(provider: &str) -> &'static str {
    match provider {
        "openai" => "gpt-4o-mini",
        "ollama" => "llama3.2",
        _ => "gemini-2.5-flash",
    }
}
fn default_temperature() -> f32 {
    0.3
}
fn default_chat_timeout_secs() -> u64 {
    120
}

impl ChatConfig {
    pub fn requires_api_key(&self) -> bool {
        matches!(self.provider.as_str(), "gemini" | "openai")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_allow_fallback")]
    pub allow_fallback: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            threshold: default_threshold(),
            allow_fallback: default_allow_fallback(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_threshold() -> f64 {
    0.67
}
fn default_allow_fallback() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct CredentialsConfig {
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_api_key_env() -> String {
    "GOOGLE_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptsConfig {
    /// Single-turn template for grounded answers. Must contain
    /// `{question}` and `{context}`.
    #[serde(default = "default_grounded_template")]
    pub grounded_template: String,
    /// System instruction for fallback (general knowledge) answers.
    #[serde(default = "default_fallback_system")]
    pub fallback_system: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            grounded_template: default_grounded_template(),
            fallback_system: default_fallback_system(),
        }
    }
}

fn default_grounded_template() -> String {
    "You are a friendly assistant who is an expert in the subject of the indexed books.\n\
     Use the excerpts from the books below as the PRIMARY reference and SOURCE OF TRUTH \
     for answering the question.\n\
     Answer the user's question completely and clearly using information from the given context.\n\
     If the context only contains a list, briefly explain each point in the list.\n\
     Synthesize and summarize information from several sources when needed to give a \
     comprehensive answer.\n\
     If the context found is relevant, explain its content as far as needed to answer the question.\n\
     \n\
     Question: {question}\n\
     \n\
     Context from the books:\n\
     {context}\n"
        .to_string()
}

fn default_fallback_system() -> String {
    "You are an assistant who answers in a relaxed and friendly tone, \
     while staying polite and substantive. Answer concisely (2-3 sentences). \
     If the question is outside the subject of the indexed books, say briefly \
     that it is outside the scope of this assistant."
        .to_string()
}

impl Config {
    /// Give each section without an explicit `model` its provider's default.
    pub fn fill_model_defaults(&mut self) {
        if self.embedding.model.trim().is_empty() {
            self.embedding.model = default_embedding_model(&self.embedding.provider).to_string();
        }
        if self.chat.model.trim().is_empty() {
            self.chat.model = default_chat_model(&self.chat.provider).to_string();
        }
    }

    /// Resolve the API key from the configured environment variable.
    ///
    /// Blank values are treated as missing.
    pub fn api_key_from_env(&self) -> Option<String> {
        std::env::var(&self.credentials.api_key_env)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }

    /// Like [`api_key_from_env`](Self::api_key_from_env) but fails with
    /// [`QaError::Config`] when the key is absent.
    pub fn require_api_key(&self) -> Result<String, QaError> {
        self.api_key_from_env().ok_or_else(|| {
            QaError::Config(format!(
                "{} environment variable not set",
                self.credentials.api_key_env
            ))
        })
    }

    /// Check invariants the rest of the crate relies on.
    pub fn validate(&self) -> Result<()> {
        if self.index.name.trim().is_empty() {
            bail!("index.name must not be empty");
        }
        if self.index.name.contains(['/', '\\']) {
            bail!("index.name must be a base name, not a path");
        }

        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }

        if self.retrieval.top_k < 1 {
            bail!("retrieval.top_k must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.retrieval.threshold) {
            bail!("retrieval.threshold must be in [0.0, 1.0]");
        }

        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        match self.embedding.provider.as_str() {
            "gemini" | "openai" | "ollama" | "local" | "hash" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be gemini, openai, ollama, local, or hash.",
                other
            ),
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0 when set");
        }

        match self.chat.provider.as_str() {
            "gemini" | "openai" | "ollama" => {}
            other => bail!(
                "Unknown chat provider: '{}'. Must be gemini, openai, or ollama.",
                other
            ),
        }

        for placeholder in ["{question}", "{context}"] {
            if !self.prompts.grounded_template.contains(placeholder) {
                bail!(
                    "prompts.grounded_template must contain the {} placeholder",
                    placeholder
                );
            }
        }

        Ok(())
    }
}

/// Load and validate configuration.
///
/// `None` reads [`DEFAULT_CONFIG_PATH`] if it exists and falls back to
/// built-in defaults otherwise. An explicit path must exist.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(p) => read_config_file(p)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                read_config_file(default_path)?
            } else {
                Config::default()
            }
        }
    };

    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.fill_model_defaults();
    Ok(config)
}
