//! Flat vector index with a two-file on-disk layout.
//!
//! Search is exact, brute-force nearest neighbour over squared Euclidean
//! distance, so results are ordered best match first and a distance of
//! `0.0` means identical.
//!
//! # Layout
//!
//! Both files share a base name inside the index directory:
//!
//! | File | Content |
//! |------|---------|
//! | `<name>.vec` | magic `PQAV`, u32 version, u32 dims, u64 count, then `count × dims` LE f32 |
//! | `<name>.json` | [`IndexManifest`]: model, dims, count, SHA-256 of `<name>.vec`, chunks |
//!
//! Loading requires both files and rejects a sidecar whose checksum does not
//! match the vector file. Files are written to temporaries and renamed into
//! place, so an index is either fully present or not present.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::embedding::{blob_to_vec, squared_l2, vec_to_blob};
use crate::error::{QaError, QaResult};
use crate::models::{Chunk, ScoredChunk};

const MAGIC: &[u8; 4] = b"PQAV";
pub const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// Sidecar metadata and chunk store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub index_name: String,
    pub embedding_model: String,
    pub dims: usize,
    pub chunk_count: usize,
    pub vectors_sha256: String,
    pub created_at: DateTime<Utc>,
    pub chunks: Vec<Chunk>,
}

/// Paths of the two artifacts for a base name.
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub vectors: PathBuf,
    pub manifest: PathBuf,
}

impl IndexPaths {
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            vectors: dir.join(format!("{}.vec", name)),
            manifest: dir.join(format!("{}.json", name)),
        }
    }
}

/// In-memory index: parallel vectors and chunks.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    model: String,
    dims: usize,
    vectors: Vec<Vec<f32>>,
    chunks: Vec<Chunk>,
    created_at: DateTime<Utc>,
}

impl FlatIndex {
    /// Build an index from chunks and their embeddings.
    ///
    /// Fails with [`QaError::Model`] if the counts differ or the vectors do
    /// not share one non-zero dimension.
    pub fn build(model: &str, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> QaResult<Self> {
        if chunks.len() != vectors.len() {
            return Err(QaError::Model(format!(
                "embedding count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        let dims = vectors.first().map(Vec::len).unwrap_or(0);
        if dims == 0 && !vectors.is_empty() {
            return Err(QaError::Model("embedding model returned empty vectors".into()));
        }
        if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dims) {
            return Err(QaError::Model(format!(
                "inconsistent embedding dimension at chunk {}: expected {}, got {}",
                i,
                dims,
                v.len()
            )));
        }

        Ok(Self {
            model: model.to_string(),
            dims,
            vectors,
            chunks,
            created_at: Utc::now(),
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Return the `k` nearest chunks, ascending by distance.
    ///
    /// Ties keep insertion order. NaN distances sort last.
    pub fn search(&self, query: &[f32], k: usize) -> QaResult<Vec<ScoredChunk>> {
        if query.len() != self.dims {
            return Err(QaError::Retrieval(format!(
                "query has {} dimensions, index '{}' has {}",
                query.len(),
                self.model,
                self.dims
            )));
        }

        let mut scored: Vec<(f32, usize)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (squared_l2(query, v), i))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(distance, i)| ScoredChunk {
                chunk: self.chunks[i].clone(),
                distance,
            })
            .collect())
    }

    /// Write both artifacts into `dir` under `name`, creating `dir` if needed.
    pub fn save(&self, dir: &Path, name: &str) -> QaResult<IndexPaths> {
        std::fs::create_dir_all(dir)?;
        let paths = IndexPaths::new(dir, name);

        let mut bytes = Vec::with_capacity(HEADER_LEN + self.len() * self.dims * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dims as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for v in &self.vectors {
            bytes.extend_from_slice(&vec_to_blob(v));
        }

        let manifest = IndexManifest {
            format_version: FORMAT_VERSION,
            index_name: name.to_string(),
            embedding_model: self.model.clone(),
            dims: self.dims,
            chunk_count: self.len(),
            vectors_sha256: sha256_hex(&bytes),
            created_at: self.created_at,
            chunks: self.chunks.clone(),
        };
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| QaError::Io(std::io::Error::other(e)))?;

        write_atomic(&paths.vectors, &bytes)?;
        write_atomic(&paths.manifest, &json)?;
        Ok(paths)
    }

    /// Load an index saved by [`save`](Self::save).
    pub fn load(dir: &Path, name: &str) -> QaResult<Self> {
        let paths = IndexPaths::new(dir, name);
        let err = |reason: String| QaError::index_load(dir, name, reason);

        for path in [&paths.vectors, &paths.manifest] {
            if !path.is_file() {
                return Err(err(format!("missing {}", path.display())));
            }
        }

        let manifest = read_manifest(dir, name)?;
        let bytes = std::fs::read(&paths.vectors)
            .map_err(|e| err(format!("cannot read {}: {}", paths.vectors.display(), e)))?;

        if sha256_hex(&bytes) != manifest.vectors_sha256 {
            return Err(err(format!(
                "{} does not belong to {} (checksum mismatch)",
                paths.vectors.display(),
                paths.manifest.display()
            )));
        }
        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(err("vector file has no PQAV header".to_string()));
        }

        let version = u32::from_le_bytes(read_array(&bytes[4..8]));
        let dims = u32::from_le_bytes(read_array(&bytes[8..12])) as usize;
        let count = u64::from_le_bytes(read_array(&bytes[12..20])) as usize;

        if version != FORMAT_VERSION || manifest.format_version != FORMAT_VERSION {
            return Err(err(format!(
                "unsupported format version {} (expected {})",
                version, FORMAT_VERSION
            )));
        }
        if dims != manifest.dims {
            return Err(err(format!(
                "dimension mismatch: vectors {}, metadata {}",
                dims, manifest.dims
            )));
        }
        if count != manifest.chunk_count || count != manifest.chunks.len() {
            return Err(err(format!(
                "count mismatch: vectors {}, metadata {}, chunks {}",
                count,
                manifest.chunk_count,
                manifest.chunks.len()
            )));
        }
        let body = &bytes[HEADER_LEN..];
        if body.len() != count * dims * 4 {
            return Err(err(format!(
                "vector data is {} bytes, expected {}",
                body.len(),
                count * dims * 4
            )));
        }

        let vectors = if dims == 0 {
            vec![Vec::new(); count]
        } else {
            body.chunks_exact(dims * 4).map(blob_to_vec).collect()
        };

        Ok(Self {
            model: manifest.embedding_model,
            dims,
            vectors,
            chunks: manifest.chunks,
            created_at: manifest.created_at,
        })
    }
}

/// Read and parse only the sidecar, without touching the vector file.
pub fn read_manifest(dir: &Path, name: &str) -> QaResult<IndexManifest> {
    let paths = IndexPaths::new(dir, name);
    let raw = std::fs::read(&paths.manifest).map_err(|e| {
        QaError::index_load(
            dir,
            name,
            format!("cannot read {}: {}", paths.manifest.display(), e),
        )
    })?;
    serde_json::from_slice(&raw).map_err(|e| {
        QaError::index_load(
            dir,
            name,
            format!("invalid metadata in {}: {}", paths.manifest.display(), e),
        )
    })
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}
