//! In-memory semantic index with cosine similarity ranking.
//!
//! One row per reference condition, stored row-major in a flat matrix with a
//! parallel name list. Row norms are computed once when the index is built or
//! loaded, so a query only pays for its own norm and the dot products.

use rayon::prelude::*;

use crate::reference::ReferenceStore;
use crate::semantic::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::semantic::preprocess::describe_condition;

/// Number of descriptions sent to the provider per batch during a build.
const BUILD_BATCH_SIZE: usize = 32;

/// Called after each build batch with (embedded so far, total).
pub type BuildProgress = dyn Fn(usize, usize) + Send + Sync;

/// Embedding matrix aligned 1:1 with condition names.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticIndex {
    names: Vec<String>,
    dimensions: usize,
    /// Row-major, `names.len() * dimensions` values
    matrix: Vec<f32>,
    norms: Vec<f64>,
}

/// A ranked row.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMatch {
    /// Row position in the index
    pub row: usize,
    pub name: String,
    /// Cosine similarity (0.0 for degenerate vectors)
    pub score: f32,
}

/// Errors that can occur while assembling or querying an index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Index has {names} names but {rows} rows")]
    ShapeMismatch { names: usize, rows: usize },

    #[error("Matrix has {got} values, expected {expected}")]
    MatrixSize { expected: usize, got: usize },

    #[error("Index dimensions must be greater than zero")]
    ZeroDimensions,

    #[error("Row {0} contains non-finite values")]
    NonFiniteRow(usize),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Query embedding contains non-finite values")]
    NonFiniteQuery,
}

/// Errors that abort an index build.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Embedding provider declares zero dimensions")]
    ZeroDimensions,

    #[error("Embedding failed for conditions '{first}'..'{last}': {source}")]
    Embedding {
        first: String,
        last: String,
        #[source]
        source: EmbeddingError,
    },

    #[error("Provider returned {got} embeddings for {expected} conditions")]
    CountMismatch { expected: usize, got: usize },

    #[error("Embedding for '{name}' has {got} dimensions, provider declares {expected}")]
    DimensionMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("Embedding for '{0}' contains non-finite values")]
    NonFinite(String),
}

impl SemanticIndex {
    /// Embed every record of `store` and assemble the index in store order.
    ///
    /// Any provider failure or degenerate vector aborts the whole build.
    pub fn build(
        store: &ReferenceStore,
        provider: &dyn EmbeddingProvider,
        progress: Option<&BuildProgress>,
    ) -> Result<Self, BuildError> {
        let dimensions = provider.dimensions();
        if dimensions == 0 {
            return Err(BuildError::ZeroDimensions);
        }

        let names: Vec<String> = store.names().map(str::to_string).collect();
        let texts: Vec<String> = store.iter().map(describe_condition).collect();
        let total = texts.len();

        let mut matrix = Vec::with_capacity(total * dimensions);

        for (batch_idx, batch) in texts.chunks(BUILD_BATCH_SIZE).enumerate() {
            let offset = batch_idx * BUILD_BATCH_SIZE;
            let batch_names = &names[offset..offset + batch.len()];

            let embeddings = provider
                .embed_batch(batch)
                .map_err(|source| BuildError::Embedding {
                    first: batch_names[0].clone(),
                    last: batch_names[batch_names.len() - 1].clone(),
                    source,
                })?;

            if embeddings.len() != batch.len() {
                return Err(BuildError::CountMismatch {
                    expected: batch.len(),
                    got: embeddings.len(),
                });
            }

            for (name, embedding) in batch_names.iter().zip(embeddings) {
                if embedding.len() != dimensions {
                    return Err(BuildError::DimensionMismatch {
                        name: name.clone(),
                        expected: dimensions,
                        got: embedding.len(),
                    });
                }
                if embedding.iter().any(|v| !v.is_finite()) {
                    return Err(BuildError::NonFinite(name.clone()));
                }
                matrix.extend_from_slice(&embedding);
            }

            if let Some(progress) = progress {
                progress(offset + batch.len(), total);
            }
        }

        let norms = row_norms(&matrix, dimensions);

        Ok(Self {
            names,
            dimensions,
            matrix,
            norms,
        })
    }

    /// Assemble an index from stored parts, checking its shape.
    pub fn from_parts(
        names: Vec<String>,
        dimensions: usize,
        matrix: Vec<f32>,
    ) -> Result<Self, IndexError> {
        if dimensions == 0 {
            return Err(IndexError::ZeroDimensions);
        }
        if matrix.len() % dimensions != 0 {
            return Err(IndexError::MatrixSize {
                expected: names.len() * dimensions,
                got: matrix.len(),
            });
        }
        let rows = matrix.len() / dimensions;
        if rows != names.len() {
            return Err(IndexError::ShapeMismatch {
                names: names.len(),
                rows,
            });
        }
        if let Some(pos) = matrix.iter().position(|v| !v.is_finite()) {
            return Err(IndexError::NonFiniteRow(pos / dimensions));
        }

        let norms = row_norms(&matrix, dimensions);

        Ok(Self {
            names,
            dimensions,
            matrix,
            norms,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of rows (conditions) in the index.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn row(&self, idx: usize) -> Option<&[f32]> {
        let start = idx.checked_mul(self.dimensions)?;
        self.matrix.get(start..start + self.dimensions)
    }

    pub(crate) fn matrix(&self) -> &[f32] {
        &self.matrix
    }

    /// Cosine similarity of `query` against every row, in row order.
    pub fn similarities(&self, query: &[f32]) -> Result<Vec<f32>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }
        if query.iter().any(|v| !v.is_finite()) {
            return Err(IndexError::NonFiniteQuery);
        }

        let query_norm = l2_norm(query);

        Ok(self
            .matrix
            .par_chunks_exact(self.dimensions)
            .zip(self.norms.par_iter())
            .map(|(row, &row_norm)| cosine_similarity(query, query_norm, row, row_norm))
            .collect())
    }

    /// Return the `top_k` best rows, highest score first.
    ///
    /// Equal scores keep index order so repeated queries rank identically.
    pub fn rank(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredMatch>, IndexError> {
        let scores = self.similarities(query)?;

        let mut order: Vec<usize> = (0..scores.len()).collect();
        // sort_by is stable
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
        order.truncate(top_k);

        Ok(order
            .into_iter()
            .map(|row| ScoredMatch {
                row,
                name: self.names[row].clone(),
                score: scores[row],
            })
            .collect())
    }
}

fn row_norms(matrix: &[f32], dimensions: usize) -> Vec<f64> {
    matrix.chunks_exact(dimensions).map(l2_norm).collect()
}

/// L2 norm accumulated in f64; large finite f32 values would overflow in f32.
fn l2_norm(v: &[f32]) -> f64 {
    v.iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt()
}

/// Cosine similarity with both norms precomputed; zero-norm input scores 0.
///
/// Always finite.
fn cosine_similarity(query: &[f32], query_norm: f64, row: &[f32], row_norm: f64) -> f32 {
    if query_norm < f64::from(f32::EPSILON) || row_norm < f64::from(f32::EPSILON) {
        return 0.0;
    }

    let dot_product: f64 = query
        .iter()
        .zip(row.iter())
        .map(|(&a, &b)| f64::from(a) * f64::from(b))
        .sum();
    let score = (dot_product / (query_norm * row_norm)) as f32;

    if score.is_finite() {
        score
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ConditionRecord;
    use crate::tests::support::{FaultyProvider, Fault, KeywordEmbedder};

    fn index(rows: &[(&str, [f32; 3])]) -> SemanticIndex {
        let names = rows.iter().map(|(n, _)| n.to_string()).collect();
        let matrix = rows.iter().flat_map(|(_, r)| r.iter().copied()).collect();
        SemanticIndex::from_parts(names, 3, matrix).unwrap()
    }

    fn store() -> ReferenceStore {
        ReferenceStore::new(vec![
            ConditionRecord {
                name: "Flu".to_string(),
                symptoms: vec!["fever".to_string(), "cough".to_string()],
                precautions: vec!["rest".to_string()],
            },
            ConditionRecord {
                name: "Migraine".to_string(),
                symptoms: vec!["headache".to_string(), "nausea".to_string()],
                precautions: vec![],
            },
        ])
        .unwrap()
    }

    #[test]
    fn test_rank_basic() {
        let idx = index(&[("a", [1.0, 0.0, 0.0]), ("b", [0.0, 1.0, 0.0])]);

        let results = idx.rank(&[1.0, 0.1, 0.0], 10).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "a");
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn test_rank_bounded_by_rows() {
        let idx = index(&[("a", [1.0, 0.0, 0.0]), ("b", [0.0, 1.0, 0.0])]);
        assert_eq!(idx.rank(&[1.0, 1.0, 0.0], 3).unwrap().len(), 2);
        assert_eq!(idx.rank(&[1.0, 1.0, 0.0], 1).unwrap().len(), 1);
        assert!(idx.rank(&[1.0, 1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_rank_ties_keep_index_order() {
        let idx = index(&[
            ("first", [0.0, 0.0, 1.0]),
            ("second", [1.0, 0.0, 0.0]),
            ("third", [1.0, 0.0, 0.0]),
            ("fourth", [2.0, 0.0, 0.0]),
        ]);

        let names: Vec<String> = idx
            .rank(&[1.0, 0.0, 0.0], 4)
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();

        assert_eq!(names, vec!["second", "third", "fourth", "first"]);
    }

    #[test]
    fn test_zero_norm_query_scores_zero() {
        let idx = index(&[("a", [1.0, 0.0, 0.0]), ("b", [0.0, 1.0, 0.0])]);

        let results = idx.rank(&[0.0, 0.0, 0.0], 2).unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|m| m.score == 0.0));
        assert_eq!(results[0].name, "a");
    }

    #[test]
    fn test_zero_norm_row_scores_zero() {
        let idx = index(&[("empty", [0.0, 0.0, 0.0]), ("b", [0.0, 1.0, 0.0])]);
        let scores = idx.similarities(&[0.0, 1.0, 0.0]).unwrap();
        assert_eq!(scores[0], 0.0);
        assert!((scores[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_large_finite_values_rank_correctly() {
        let idx = SemanticIndex::from_parts(
            vec!["other".to_string(), "same".to_string()],
            2,
            vec![0.0, 1.0, 3e19, 3e19],
        )
        .unwrap();

        let results = idx.rank(&[3e19, 3e19], 2).unwrap();

        assert_eq!(results[0].name, "same");
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!((results[1].score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!(results.iter().all(|m| m.score.is_finite()));
    }

    #[test]
    fn test_best_match_dominates_all_rows() {
        let idx = index(&[
            ("a", [0.3, 0.9, 0.1]),
            ("b", [0.8, 0.1, 0.5]),
            ("c", [0.2, 0.2, 0.9]),
            ("d", [-0.5, 0.4, 0.0]),
        ]);
        let query = [0.6, 0.3, 0.4];

        let best = &idx.rank(&query, 1).unwrap()[0];
        let scores = idx.similarities(&query).unwrap();

        assert!(scores.iter().all(|&s| best.score >= s));
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let idx = index(&[("a", [1.0, 0.0, 0.0])]);
        let result = idx.rank(&[1.0, 0.0], 1);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { expected: 3, got: 2 })));
    }

    #[test]
    fn test_query_non_finite_rejected() {
        let idx = index(&[("a", [1.0, 0.0, 0.0])]);
        let result = idx.rank(&[f32::NAN, 0.0, 0.0], 1);
        assert!(matches!(result, Err(IndexError::NonFiniteQuery)));
    }

    #[test]
    fn test_from_parts_shape_mismatch() {
        let result = SemanticIndex::from_parts(
            vec!["a".to_string(), "b".to_string()],
            3,
            vec![1.0, 0.0, 0.0],
        );
        assert!(matches!(result, Err(IndexError::ShapeMismatch { names: 2, rows: 1 })));
    }

    #[test]
    fn test_from_parts_ragged_matrix() {
        let result = SemanticIndex::from_parts(vec!["a".to_string()], 3, vec![1.0, 0.0]);
        assert!(matches!(result, Err(IndexError::MatrixSize { .. })));
    }

    #[test]
    fn test_from_parts_non_finite() {
        let result = SemanticIndex::from_parts(
            vec!["a".to_string(), "b".to_string()],
            2,
            vec![1.0, 0.0, f32::INFINITY, 0.0],
        );
        assert!(matches!(result, Err(IndexError::NonFiniteRow(1))));
    }

    #[test]
    fn test_build_follows_store_order() {
        let provider = KeywordEmbedder::new();
        let idx = SemanticIndex::build(&store(), &provider, None).unwrap();

        assert_eq!(idx.len(), 2);
        assert_eq!(idx.names(), &["Flu".to_string(), "Migraine".to_string()]);
        assert_eq!(idx.dimensions(), provider.dimensions());
        assert_eq!(
            idx.row(0).unwrap(),
            provider.embed("Disease: Flu. Symptoms: fever, cough.").unwrap().as_slice()
        );
    }

    #[test]
    fn test_build_is_deterministic() {
        let provider = KeywordEmbedder::new();
        let first = SemanticIndex::build(&store(), &provider, None).unwrap();
        let second = SemanticIndex::build(&store(), &provider, None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_build_reports_progress() {
        use std::sync::{Arc, Mutex};

        let provider = KeywordEmbedder::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress = move |done: usize, total: usize| sink.lock().unwrap().push((done, total));

        SemanticIndex::build(&store(), &provider, Some(&progress)).unwrap();

        assert_eq!(seen.lock().unwrap().clone(), vec![(2, 2)]);
    }

    #[test]
    fn test_build_rejects_non_finite_embedding() {
        let provider = FaultyProvider::new(Fault::NonFinite);
        let result = SemanticIndex::build(&store(), &provider, None);
        assert!(matches!(result, Err(BuildError::NonFinite(name)) if name == "Flu"));
    }

    #[test]
    fn test_build_rejects_wrong_dimensions() {
        let provider = FaultyProvider::new(Fault::WrongDimensions);
        let result = SemanticIndex::build(&store(), &provider, None);
        assert!(matches!(result, Err(BuildError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_build_wraps_provider_failure() {
        let provider = FaultyProvider::new(Fault::Error);
        let err = SemanticIndex::build(&store(), &provider, None).unwrap_err();

        assert!(matches!(err, BuildError::Embedding { .. }));
        assert!(err.to_string().contains("'Flu'..'Migraine'"));
    }
}
