//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`GeminiProvider`]**: Google Generative Language `batchEmbedContents`,
//!   with separate document/query task types.
//! - **[`OpenAIProvider`]**: OpenAI `POST /v1/embeddings`.
//! - **[`OllamaProvider`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **[`HashProvider`]**: offline feature hashing over word tokens; no
//!   model, no network. Useful for air-gapped smoke tests.
//! - **`LocalProvider`**: in-process models via fastembed (feature
//!   `local-embeddings`).
//!
//! Also provides the vector helpers used by the index file format:
//! [`vec_to_blob`], [`blob_to_vec`] and [`squared_l2`].
//!
//! # Provider Selection
//!
//! ```rust
//! # use pdf_qa::config::EmbeddingConfig;
//! # use pdf_qa::embedding::create_provider;
//! let mut config = EmbeddingConfig::default();
//! config.provider = "hash".to_string();
//! let provider = create_provider(&config, None).unwrap();
//! assert_eq!(provider.model_name(), "hash-256");
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;
use crate::error::QaError;
use crate::http::{build_client, join_url, post_json_with_retry};

/// Trait for embedding providers.
///
/// Documents and queries are embedded separately because some models use a
/// different task type for each side of retrieval.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"models/text-embedding-004"`).
    fn model_name(&self) -> &str;

    /// Embed a batch of passages, returning one vector per input in order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

// ============ Gemini Provider ============

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
/// Upper bound on requests per `batchEmbedContents` call.
const GEMINI_MAX_BATCH: usize = 100;

/// Embedding provider using the Google Generative Language API.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    /// Fully-qualified model name, always starting with `models/`.
    model: String,
    base_url: String,
    max_retries: u32,
}

impl GeminiProvider {
    pub fn new(config: &EmbeddingConfig, api_key: &str) -> Result<Self> {
        let model = if config.model.starts_with("models/") {
            config.model.clone()
        } else {
            format!("models/{}", config.model)
        };
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            api_key: api_key.to_string(),
            model,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            max_retries: config.max_retries,
        })
    }

    async fn batch_embed(&self, texts: &[String], task_type: &str) -> Result<Vec<Vec<f32>>> {
        let url = join_url(
            &self.base_url,
            &format!("v1beta/{}:batchEmbedContents", self.model),
        );
        let headers = [("x-goog-api-key", self.api_key.clone())];

        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(GEMINI_MAX_BATCH) {
            let requests: Vec<serde_json::Value> = batch
                .iter()
                .map(|text| {
                    serde_json::json!({
                        "model": self.model,
                        "content": { "parts": [{ "text": text }] },
                        "taskType": task_type,
                    })
                })
                .collect();
            let body = serde_json::json!({ "requests": requests });
            let json = post_json_with_retry(
                &self.client,
                "Gemini",
                &url,
                &headers,
                &body,
                self.max_retries,
            )
            .await?;
            out.extend(parse_gemini_response(&json)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_embed(texts, "RETRIEVAL_DOCUMENT").await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        first_vector(self.batch_embed(&[text.to_string()], "RETRIEVAL_QUERY").await?)
    }
}

/// Extract `embeddings[].values` from a `batchEmbedContents` response.
fn parse_gemini_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|item| {
            item.get("values")
                .and_then(|v| v.as_array())
                .map(|values| json_floats(values))
                .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing values"))
        })
        .collect()
}

// ============ OpenAI Provider ============

const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Embedding provider using the OpenAI API.
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_retries: u32,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig, api_key: &str) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            api_key: api_key.to_string(),
            model: config.model.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let headers = [("Authorization", format!("Bearer {}", self.api_key))];
        let json = post_json_with_retry(
            &self.client,
            "OpenAI",
            &join_url(&self.base_url, "v1/embeddings"),
            &headers,
            &body,
            self.max_retries,
        )
        .await?;
        parse_openai_response(&json)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        first_vector(self.embed_documents(&[text.to_string()]).await?)
    }
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts the `data[].embedding` arrays and returns them in input order.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, json_floats(embedding)));
    }

    // Sort by index to ensure order matches input
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Embedding provider using a local Ollama instance.
///
/// Requires Ollama to be running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    client: reqwest::Client,
    model: String,
    base_url: String,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            model: config.model.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OLLAMA_BASE_URL.to_string()),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json_with_retry(
            &self.client,
            "Ollama",
            &join_url(&self.base_url, "api/embed"),
            &[],
            &body,
            self.max_retries,
        )
        .await?;
        parse_ollama_response(&json)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        first_vector(self.embed_documents(&[text.to_string()]).await?)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| json_floats(values))
                .ok_or_else(|| {
                    anyhow::anyhow!("Invalid Ollama response: embedding is not an array")
                })
        })
        .collect()
}

// ============ Hash Provider ============

const HASH_DEFAULT_DIMS: usize = 256;

/// Deterministic lexical embedding by feature hashing.
///
/// Each lowercase alphanumeric token is hashed with SHA-256 into one of
/// `dims` buckets with a ±1 sign, and the result is L2-normalized. Texts
/// sharing words land close together; there is no semantic understanding.
pub struct HashProvider {
    name: String,
    dims: usize,
}

impl HashProvider {
    pub fn new(dims: usize) -> Self {
        let dims = dims.max(1);
        Self {
            name: format!("hash-{}", dims),
            dims,
        }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashProvider {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed(text))
    }
}

// ============ Local Provider (fastembed) ============

/// Embedding provider for in-process inference via fastembed.
///
/// Models are downloaded on first use from Hugging Face and cached; after
/// that no network calls are needed.
#[cfg(feature = "local-embeddings")]
pub struct LocalProvider {
    model_name: String,
    model: std::sync::Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
    batch_size: usize,
}

#[cfg(feature = "local-embeddings")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        // Validate the name up front so a typo fails before any download.
        config_to_fastembed_model(&config.model)?;
        Ok(Self {
            model_name: config.model.clone(),
            model: std::sync::Arc::new(std::sync::Mutex::new(None)),
            batch_size: config.batch_size,
        })
    }

    async fn embed_blocking(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let fastembed_model = config_to_fastembed_model(&self.model_name)?;
        let slot = self.model.clone();
        let batch_size = self.batch_size;

        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            if guard.is_none() {
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model)
                        .with_show_download_progress(true),
                )
                .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
                *guard = Some(model);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("local embedding model not initialized"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_blocking(texts.to_vec()).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        first_vector(self.embed_blocking(vec![text.to_string()]).await?)
    }
}

#[cfg(feature = "local-embeddings")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// | Config Value | Provider | Needs API key |
/// |-------------|----------|---------------|
/// | `"gemini"` | [`GeminiProvider`] | yes |
/// | `"openai"` | [`OpenAIProvider`] | yes |
/// | `"ollama"` | [`OllamaProvider`] | no |
/// | `"hash"` | [`HashProvider`] | no |
/// | `"local"` | `LocalProvider` (feature `local-embeddings`) | no |
///
/// # Errors
///
/// [`QaError::Config`] for unknown providers, a missing API key, or a
/// provider whose feature is not compiled in.
pub fn create_provider(
    config: &EmbeddingConfig,
    api_key: Option<&str>,
) -> Result<Box<dyn EmbeddingProvider>, QaError> {
    let key = || {
        api_key.filter(|k| !k.trim().is_empty()).ok_or_else(|| {
            QaError::Config(format!(
                "an API key is required for the '{}' embedding provider",
                config.provider
            ))
        })
    };
    let init = |e: anyhow::Error| QaError::Config(e.to_string());

    match config.provider.as_str() {
        "gemini" => Ok(Box::new(GeminiProvider::new(config, key()?).map_err(init)?)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config, key()?).map_err(init)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config).map_err(init)?)),
        "hash" => Ok(Box::new(HashProvider::new(
            config.dims.unwrap_or(HASH_DEFAULT_DIMS),
        ))),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Box::new(LocalProvider::new(config).map_err(init)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(QaError::Config(
            "Local embedding provider requires --features local-embeddings".to_string(),
        )),
        other => Err(QaError::Config(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

fn json_floats(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

fn first_vector(vectors: Vec<Vec<f32>>) -> Result<Vec<f32>> {
    match vectors.into_iter().next() {
        Some(v) if !v.is_empty() => Ok(v),
        Some(_) => bail!("Empty embedding vector"),
        None => bail!("Empty embedding response"),
    }
}

/// Encode a float vector as little-endian f32 bytes.
///
/// ```rust
/// use pdf_qa::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Squared Euclidean distance. `0.0` means identical.
///
/// Returns NaN for vectors of different lengths so the router treats the
/// score as malformed.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::NAN;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
