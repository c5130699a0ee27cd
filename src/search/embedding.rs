//! Text embedding providers.

use std::fmt;
use std::str::FromStr;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Sentence-embedding models the crate knows how to load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmbeddingModelKind {
    #[default]
    #[serde(rename = "all-MiniLM-L6-v2")]
    AllMiniLmL6V2,
    #[serde(rename = "bge-small-en-v1.5")]
    BgeSmallEnV15,
    #[serde(rename = "bge-base-en-v1.5")]
    BgeBaseEnV15,
    #[serde(rename = "nomic-embed-text-v1.5")]
    NomicEmbedTextV15,
}

impl EmbeddingModelKind {
    pub const ALL: [EmbeddingModelKind; 4] = [
        EmbeddingModelKind::AllMiniLmL6V2,
        EmbeddingModelKind::BgeSmallEnV15,
        EmbeddingModelKind::BgeBaseEnV15,
        EmbeddingModelKind::NomicEmbedTextV15,
    ];

    /// Identifier used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingModelKind::AllMiniLmL6V2 => "all-MiniLM-L6-v2",
            EmbeddingModelKind::BgeSmallEnV15 => "bge-small-en-v1.5",
            EmbeddingModelKind::BgeBaseEnV15 => "bge-base-en-v1.5",
            EmbeddingModelKind::NomicEmbedTextV15 => "nomic-embed-text-v1.5",
        }
    }

    /// Native output dimension of the model.
    pub fn dimension(&self) -> usize {
        match self {
            EmbeddingModelKind::AllMiniLmL6V2 => 384,
            EmbeddingModelKind::BgeSmallEnV15 => 384,
            EmbeddingModelKind::BgeBaseEnV15 => 768,
            EmbeddingModelKind::NomicEmbedTextV15 => 768,
        }
    }

    fn fastembed_model(&self) -> EmbeddingModel {
        match self {
            EmbeddingModelKind::AllMiniLmL6V2 => EmbeddingModel::AllMiniLML6V2,
            EmbeddingModelKind::BgeSmallEnV15 => EmbeddingModel::BGESmallENV15,
            EmbeddingModelKind::BgeBaseEnV15 => EmbeddingModel::BGEBaseENV15,
            EmbeddingModelKind::NomicEmbedTextV15 => EmbeddingModel::NomicEmbedTextV15,
        }
    }
}

impl fmt::Display for EmbeddingModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbeddingModelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Config(format!("unknown embedding model '{}'", s)))
    }
}

/// Maps free text to fixed-dimension vectors.
///
/// Implementations must be deterministic: the same input always produces
/// the same vector. Providers are built once per process and shared.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("model produced no vector".into()))
    }

    /// Output dimension.
    fn dimension(&self) -> usize;

    /// Model identifier, for logging.
    fn model_name(&self) -> &str;
}

/// Embedding provider backed by a local ONNX model via fastembed.
pub struct FastEmbedProvider {
    model: TextEmbedding,
    kind: EmbeddingModelKind,
}

impl FastEmbedProvider {
    /// Load the model, downloading it on first use.
    pub fn new(kind: EmbeddingModelKind, show_download_progress: bool) -> Result<Self> {
        info!(model = %kind, "Loading embedding model");
        let options = InitOptions::new(kind.fastembed_model())
            .with_show_download_progress(show_download_progress);
        let model = TextEmbedding::try_new(options)
            .map_err(|e| Error::Embedding(format!("failed to load {}: {}", kind, e)))?;
        Ok(Self { model, kind })
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(batch_size = texts.len(), model = %self.kind, "Embedding batch");
        let vectors = self
            .model
            .embed(texts.to_vec(), None)
            .map_err(|e| Error::Embedding(e.to_string()))?;
        if vectors.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "model returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.kind.dimension()
    }

    fn model_name(&self) -> &str {
        self.kind.as_str()
    }
}

/// Fail unless the provider produces vectors of the expected dimension.
pub fn ensure_dimension(provider: &dyn EmbeddingProvider, expected: usize) -> Result<()> {
    let actual = provider.dimension();
    if actual != expected {
        return Err(Error::DimensionMismatch { expected, actual });
    }
    Ok(())
}

/// Serialize a vector as raw little-endian `f32` bytes, in order.
///
/// This is the layout the store expects for the KNN query parameter.
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode raw little-endian `f32` bytes back into a vector.
pub fn bytes_to_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::Format(format!(
            "vector blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
