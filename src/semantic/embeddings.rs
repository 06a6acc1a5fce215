//! Embedding providers.
//!
//! [`EmbeddingProvider`] is the seam between the index and whatever turns
//! text into vectors. [`EmbeddingModel`] is the production implementation:
//! - Local ONNX inference through fastembed
//! - Model files downloaded once into a configurable directory
//! - Batch embedding generation

use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Mutex;

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

/// Something that turns text into a fixed-length dense vector.
///
/// Implementations must be deterministic for a given `name()`: the index
/// cache is keyed on the provider identity and assumes identical text always
/// embeds to the same vector.
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identity of the provider, stored in the index cache header.
    fn name(&self) -> &str;

    /// Length of every vector returned by `embed`.
    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed several texts, returning vectors in input order.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    /// SHA256 of the provider name, used to tag cache files.
    fn model_id_hash(&self) -> [u8; 32] {
        provider_id_hash(self.name())
    }
}

/// Compute SHA256 hash of a provider name for storage identification.
pub fn provider_id_hash(name: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.finalize().into()
}

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct EmbeddingModel {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl EmbeddingModel {
    /// Load the named model, downloading it into `models_dir` on first use.
    pub fn new(model_name: &str, models_dir: PathBuf) -> Result<Self, EmbeddingError> {
        let (canonical_name, model_enum) = parse_model_name(model_name)?;

        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let mut model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        let dimensions = Self::probe_dimensions(&mut model)?;

        log::info!("Loaded embedding model '{canonical_name}' ({dimensions} dimensions)");

        Ok(Self {
            model: Mutex::new(model),
            model_name: canonical_name.to_string(),
            dimensions,
        })
    }

    /// Check a model name without loading anything.
    pub fn is_supported(name: &str) -> bool {
        parse_model_name(name).is_ok()
    }

    /// Canonical spelling of a supported model name, used as the provider
    /// identity regardless of how the name was typed.
    pub fn canonical_name(name: &str) -> Result<&'static str, EmbeddingError> {
        parse_model_name(name).map(|(canonical, _)| canonical)
    }

    /// Probe the model to determine embedding dimensions.
    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let test_embeddings = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to probe dimensions: {}", e)))?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
    }
}

impl EmbeddingProvider for EmbeddingModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))
    }
}

/// Parse a case-insensitive model name into its canonical spelling and
/// fastembed enum. The canonical name is what identifies cached indexes.
fn parse_model_name(name: &str) -> Result<(&'static str, fastembed::EmbeddingModel), EmbeddingError> {
    use fastembed::EmbeddingModel as Model;

    let parsed = match name.trim().to_lowercase().as_str() {
        "all-minilm-l6-v2" | "allminiml6v2" => ("all-MiniLM-L6-v2", Model::AllMiniLML6V2),
        "all-minilm-l6-v2-q" | "allminiml6v2q" => ("all-MiniLM-L6-v2-q", Model::AllMiniLML6V2Q),
        "bge-small-en-v1.5" | "bgesmallenv15" => ("bge-small-en-v1.5", Model::BGESmallENV15),
        "bge-small-en-v1.5-q" | "bgesmallenv15q" => ("bge-small-en-v1.5-q", Model::BGESmallENV15Q),
        "bge-base-en-v1.5" | "bgebaseenv15" => ("bge-base-en-v1.5", Model::BGEBaseENV15),
        "bge-base-en-v1.5-q" | "bgebaseenv15q" => ("bge-base-en-v1.5-q", Model::BGEBaseENV15Q),
        _ => {
            return Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5 (add -q suffix for quantized)",
                name
            )))
        }
    };
    Ok(parsed)
}
