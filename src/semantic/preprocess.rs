//! Text preparation for embedding generation.
//!
//! - Symptom normalization: lowercase, trim, whitespace runs become `_`
//! - Condition description: `Disease: <name>. Symptoms: <a, b>.`
//! - Query description: `Symptoms: <a, b>`

use crate::reference::ConditionRecord;

/// Separator used when joining symptom tokens into a sentence.
const SYMPTOM_SEPARATOR: &str = ", ";

/// Canonicalize one user-supplied symptom into the reference token form.
///
/// `" Joint  Ache "` becomes `"joint_ache"`. Blank input yields `""`.
pub fn normalize_symptom(raw: &str) -> String {
    raw.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Normalize every symptom, keeping order and empty results.
pub fn normalize_symptoms<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    raw.iter().map(|s| normalize_symptom(s.as_ref())).collect()
}

/// Descriptive sentence embedded for a reference record.
///
/// Symptom order is preserved so rebuilding from unchanged data produces
/// byte-identical text.
pub fn describe_condition(record: &ConditionRecord) -> String {
    format!(
        "Disease: {}. Symptoms: {}.",
        record.name,
        record.symptoms.join(SYMPTOM_SEPARATOR)
    )
}

/// Text embedded for a query made of already-normalized symptoms.
pub fn describe_query(normalized: &[String]) -> String {
    format!("Symptoms: {}", normalized.join(SYMPTOM_SEPARATOR))
}
