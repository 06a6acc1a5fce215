//! Deterministic embedding providers for tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::reference::{ConditionRecord, ReferenceStore};
use crate::semantic::{EmbeddingError, EmbeddingProvider};

const DEFAULT_VOCABULARY: &[&str] = &[
    "fever",
    "cough",
    "headache",
    "nausea",
    "vomiting",
    "chills",
    "fatigue",
    "itching",
    "skin_rash",
    "joint_pain",
    "sneezing",
    "diarrhoea",
];

/// Counts vocabulary tokens: one dimension per vocabulary word.
///
/// Texts sharing the same vocabulary words embed to the same direction, so
/// `"Disease: Flu. Symptoms: fever, cough."` and `"Symptoms: fever, cough"`
/// have cosine similarity 1.
pub struct KeywordEmbedder {
    name: String,
    vocabulary: Vec<String>,
    embedded: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self::with_vocabulary("keyword-test", DEFAULT_VOCABULARY)
    }

    pub fn with_vocabulary(name: &str, vocabulary: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            vocabulary: vocabulary.iter().map(|w| w.to_string()).collect(),
            embedded: AtomicUsize::new(0),
        }
    }

    /// Number of texts embedded so far.
    pub fn embedded(&self) -> usize {
        self.embedded.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for KeywordEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.vocabulary.len()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embedded.fetch_add(1, Ordering::SeqCst);

        let mut vector = vec![0.0; self.vocabulary.len()];
        let lowered = text.to_lowercase();
        let tokens = lowered.split(|c: char| !(c.is_alphanumeric() || c == '_'));
        for token in tokens.filter(|t| !t.is_empty()) {
            if let Some(pos) = self.vocabulary.iter().position(|w| w == token) {
                vector[pos] += 1.0;
            }
        }
        Ok(vector)
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Fault {
    Error,
    NonFinite,
    WrongDimensions,
}

/// Provider that misbehaves in one specific way.
pub struct FaultyProvider {
    fault: Fault,
}

impl FaultyProvider {
    pub const DIMENSIONS: usize = 4;

    pub fn new(fault: Fault) -> Self {
        Self { fault }
    }
}

impl EmbeddingProvider for FaultyProvider {
    fn name(&self) -> &str {
        "faulty-test"
    }

    fn dimensions(&self) -> usize {
        Self::DIMENSIONS
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        match self.fault {
            Fault::Error => Err(EmbeddingError::EmbeddingFailed("backend offline".to_string())),
            Fault::NonFinite => Ok(vec![f32::NAN; Self::DIMENSIONS]),
            Fault::WrongDimensions => Ok(vec![1.0; Self::DIMENSIONS - 1]),
        }
    }
}

pub fn condition(name: &str, symptoms: &[&str], precautions: &[&str]) -> ConditionRecord {
    ConditionRecord {
        name: name.to_string(),
        symptoms: symptoms.iter().map(|s| s.to_string()).collect(),
        precautions: precautions.iter().map(|s| s.to_string()).collect(),
    }
}

/// A small reference database covering the default vocabulary.
pub fn sample_store() -> ReferenceStore {
    ReferenceStore::new(vec![
        condition(
            "Common Cold",
            &["cough", "sneezing", "fatigue"],
            &["drink warm fluids", "rest"],
        ),
        condition(
            "Malaria",
            &["fever", "chills", "vomiting", "headache"],
            &["consult nearest hospital", "avoid oily food", "keep mosquitos out"],
        ),
        condition(
            "Fungal infection",
            &["itching", "skin_rash"],
            &["bath twice", "use detol or neem in bathing water", "keep infected area dry"],
        ),
        condition(
            "Gastroenteritis",
            &["vomiting", "diarrhoea", "nausea"],
            &["stop eating solid food for a while", "try taking small sips of water", "rest"],
        ),
        condition(
            "Arthritis",
            &["joint_pain", "fatigue"],
            &["exercise", "use hot and cold therapy", "try acupuncture"],
        ),
    ])
    .expect("sample store is valid")
}
