//! Semantic symptom-to-condition matching.
//!
//! Load a [`reference::ReferenceStore`], pick an
//! [`semantic::EmbeddingProvider`], then ask a [`semantic::DiagnosisService`]
//! for the closest conditions:
//!
//! ```no_run
//! use std::sync::Arc;
//! use symptom_match::reference::ReferenceStore;
//! use symptom_match::semantic::{DiagnosisService, EmbeddingModel};
//!
//! # fn main() -> anyhow::Result<()> {
//! let store = Arc::new(ReferenceStore::load("conditions.yaml".as_ref(), None)?);
//! let model = Arc::new(EmbeddingModel::new("all-MiniLM-L6-v2", "models".into())?);
//! let service = DiagnosisService::new(store, model, "cache");
//! service.initialize()?;
//!
//! let result = service.best_match(&["head pain", "vomiting", "joint ache"])?;
//! println!("{} ({})", result.disease, result.confidence);
//! # Ok(())
//! # }
//! ```

pub mod config;
mod lock;
pub mod reference;
pub mod semantic;
mod storage;
#[cfg(test)]
mod tests;
