//! Diagnosis facade over the semantic index.
//!
//! Coordinates normalization, query embedding and ranking:
//! - Loads the index from cache or builds it once, under a cross-process lock
//! - Holds it read-only for the process lifetime
//! - Answers any number of concurrent queries without locking the index

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::lock::BuildLock;
use crate::reference::{ReferenceError, ReferenceStore};
use crate::semantic::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::semantic::index::{BuildError, BuildProgress, IndexError, ScoredMatch, SemanticIndex};
use crate::semantic::preprocess::{describe_query, normalize_symptoms};
use crate::semantic::storage::{IndexCache, IndexCacheError};

/// Errors surfaced by the diagnosis facade.
#[derive(Debug, thiserror::Error)]
pub enum DiagnosisError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid reference data: {0}")]
    Reference(#[from] ReferenceError),

    #[error("Index build failed: {0}")]
    Build(#[from] BuildError),

    #[error("Failed to embed query '{query}': {source}")]
    Query {
        query: String,
        #[source]
        source: EmbeddingError,
    },

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Cache error: {0}")]
    Cache(#[from] IndexCacheError),

    #[error("Cache directory {path} unavailable: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DiagnosisError {
    /// True for errors caused by setup or API misuse rather than a failed
    /// build or query.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Reference(_))
    }
}

/// Best-matching condition for a set of symptoms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisResult {
    pub disease: String,
    /// Cosine similarity rounded to 4 decimals, within [0, 1]
    pub confidence: f64,
    pub precautions: Vec<String>,
}

/// Where the in-memory index came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexOrigin {
    Cache,
    Built,
}

struct IndexState {
    index: SemanticIndex,
    origin: IndexOrigin,
}

/// Entry point for symptom → condition matching.
///
/// The store and provider are shared handles created once at startup and
/// never torn down. The index is written once by `initialize` (or `rebuild`)
/// and is read-only afterwards.
pub struct DiagnosisService {
    store: Arc<ReferenceStore>,
    provider: Arc<dyn EmbeddingProvider>,
    cache_dir: PathBuf,
    cache: IndexCache,
    progress: Option<Arc<BuildProgress>>,
    state: OnceCell<IndexState>,
}

impl DiagnosisService {
    pub fn new(
        store: Arc<ReferenceStore>,
        provider: Arc<dyn EmbeddingProvider>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        let cache_dir = cache_dir.into();
        Self {
            store,
            provider,
            cache: IndexCache::new(&cache_dir),
            cache_dir,
            progress: None,
            state: OnceCell::new(),
        }
    }

    /// Report build progress as (embedded, total) after each batch.
    pub fn with_build_progress(mut self, progress: Arc<BuildProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Load the cached index or build and cache it.
    ///
    /// Idempotent; concurrent callers wait for the first one to finish.
    pub fn initialize(&self) -> Result<IndexOrigin, DiagnosisError> {
        self.state
            .get_or_try_init(|| self.load_or_build(false))
            .map(|state| state.origin)
    }

    /// Build from scratch, ignoring and then replacing any cached index.
    ///
    /// Only valid before the service holds an index.
    pub fn rebuild(&self) -> Result<(), DiagnosisError> {
        let mut built_here = false;
        self.state.get_or_try_init(|| {
            built_here = true;
            self.load_or_build(true)
        })?;

        if !built_here {
            return Err(DiagnosisError::Configuration(
                "index already initialized; rebuild must happen before first use".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.get().is_some()
    }

    /// Origin of the held index, or `None` before initialization.
    pub fn origin(&self) -> Option<IndexOrigin> {
        self.state.get().map(|s| s.origin)
    }

    /// Get the number of indexed conditions.
    ///
    /// Returns 0 if not yet initialized.
    pub fn indexed_count(&self) -> usize {
        self.state.get().map(|s| s.index.len()).unwrap_or(0)
    }

    pub fn store(&self) -> &ReferenceStore {
        &self.store
    }

    pub fn provider(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    pub fn cache_path(&self) -> &Path {
        self.cache.path()
    }

    /// Delete the cached index blob. The in-memory index is unaffected.
    pub fn clear_cache(&self) -> Result<(), DiagnosisError> {
        Ok(self.cache.delete()?)
    }

    /// The single closest condition.
    pub fn best_match<S: AsRef<str>>(&self, symptoms: &[S]) -> Result<DiagnosisResult, DiagnosisError> {
        self.top_matches(symptoms, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| DiagnosisError::Configuration("semantic index is empty".to_string()))
    }

    /// Up to `top_k` closest conditions, best first.
    ///
    /// Returns `min(top_k, indexed conditions)` results.
    pub fn top_matches<S: AsRef<str>>(
        &self,
        symptoms: &[S],
        top_k: usize,
    ) -> Result<Vec<DiagnosisResult>, DiagnosisError> {
        let state = self.state.get().ok_or_else(|| {
            DiagnosisError::Configuration(
                "diagnosis requested before the semantic index was initialized".to_string(),
            )
        })?;

        let normalized = normalize_symptoms(symptoms);
        let query = describe_query(&normalized);

        let embedding = self
            .provider
            .embed(&query)
            .map_err(|source| DiagnosisError::Query {
                query: query.clone(),
                source,
            })?;

        let matches = state.index.rank(&embedding, top_k)?;
        log::debug!("query={query:?} matches={}", matches.len());

        Ok(matches.into_iter().map(|m| self.shape(m)).collect())
    }

    fn shape(&self, scored: ScoredMatch) -> DiagnosisResult {
        let precautions = match self.store.precautions(&scored.name) {
            Some(precautions) => precautions.to_vec(),
            None => {
                log::warn!(
                    "Condition '{}' is in the index but not in the reference store; delete the cache to rebuild",
                    scored.name
                );
                Vec::new()
            }
        };

        DiagnosisResult {
            confidence: round_confidence(scored.score),
            disease: scored.name,
            precautions,
        }
    }

    fn load_or_build(&self, force: bool) -> Result<IndexState, DiagnosisError> {
        let _lock = BuildLock::acquire(&self.cache_dir).map_err(|source| DiagnosisError::CacheDir {
            path: self.cache_dir.clone(),
            source,
        })?;

        let provider_id = self.provider.model_id_hash();
        let dimensions = self.provider.dimensions();

        if !force {
            if let Some(index) = self.cache.load(&provider_id, dimensions) {
                log::info!(
                    "Loaded {} condition embeddings from {}",
                    index.len(),
                    self.cache.path().display()
                );
                return Ok(IndexState {
                    index,
                    origin: IndexOrigin::Cache,
                });
            }
        }

        log::info!(
            "Building semantic index for {} conditions with '{}'",
            self.store.len(),
            self.provider.name()
        );

        let index = SemanticIndex::build(&self.store, self.provider.as_ref(), self.progress.as_deref())?;

        match self.cache.store(&index, &provider_id) {
            Ok(()) => log::info!("Cached semantic index at {}", self.cache.path().display()),
            Err(e) => log::warn!(
                "Failed to cache semantic index at {}: {}",
                self.cache.path().display(),
                e
            ),
        }

        Ok(IndexState {
            index,
            origin: IndexOrigin::Built,
        })
    }
}

/// Round to 4 decimal places and clamp into [0, 1]. Non-finite scores are 0.
fn round_confidence(score: f32) -> f64 {
    if !score.is_finite() {
        return 0.0;
    }
    ((score as f64 * 10_000.0).round() / 10_000.0).clamp(0.0, 1.0)
}
