//! Semantic symptom-to-condition matching.
//!
//! This module matches free-form symptom lists against the reference
//! database by embedding similarity instead of exact token overlap.
//!
//! # Architecture
//!
//! - `embeddings`: `EmbeddingProvider` trait and the fastembed-backed model
//! - `preprocess`: Symptom normalization and text synthesis for embedding
//! - `index`: In-memory embedding matrix with cosine similarity ranking
//! - `storage`: Binary cache file persistence for the index
//! - `service`: Diagnosis facade (the only entry point callers need)

pub mod embeddings;
mod index;
mod preprocess;
mod service;
mod storage;

pub use embeddings::{provider_id_hash, EmbeddingError, EmbeddingModel, EmbeddingProvider};
pub use index::{BuildError, BuildProgress, IndexError, ScoredMatch, SemanticIndex};
pub use preprocess::{describe_condition, describe_query, normalize_symptom, normalize_symptoms};
pub use service::{DiagnosisError, DiagnosisResult, DiagnosisService, IndexOrigin};
pub use storage::{IndexCache, IndexCacheError, CACHE_FILE_NAME};

/// Default embedding model name
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";
