//! Reference database of conditions, their symptoms and precautions.
//!
//! Records are kept in source order; that order is the row order of the
//! semantic index built from them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConditionRecord {
    pub name: String,
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub precautions: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("reference database is empty")]
    Empty,

    #[error("condition '{0}' has no symptoms")]
    NoSymptoms(String),

    #[error("condition '{0}' is defined more than once")]
    Duplicate(String),

    #[error("unsupported reference file format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Immutable, ordered set of condition records with lookup by name.
#[derive(Debug)]
pub struct ReferenceStore {
    records: Vec<ConditionRecord>,
    by_name: HashMap<String, usize>,
}

impl ReferenceStore {
    /// Validate and take ownership of `records`.
    ///
    /// Blank symptom entries are dropped; a record left without symptoms is
    /// rejected since it cannot produce a meaningful embedding.
    pub fn new(records: Vec<ConditionRecord>) -> Result<Self, ReferenceError> {
        if records.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let mut by_name = HashMap::with_capacity(records.len());
        let mut cleaned = Vec::with_capacity(records.len());

        for (idx, mut record) in records.into_iter().enumerate() {
            record.symptoms.retain(|s| !s.trim().is_empty());
            if record.symptoms.is_empty() {
                return Err(ReferenceError::NoSymptoms(record.name));
            }
            if by_name.insert(record.name.clone(), idx).is_some() {
                return Err(ReferenceError::Duplicate(record.name));
            }
            cleaned.push(record);
        }

        Ok(Self {
            records: cleaned,
            by_name,
        })
    }

    /// Load records from a file, picking the parser from the extension.
    ///
    /// `.yaml`/`.yml`/`.json` files hold a list of records. `.csv` files use
    /// the `Disease,Symptom_1,..` layout, with precautions read from
    /// `precautions` (`Disease,Precaution_1,..`) when given.
    pub fn load(path: &Path, precautions: Option<&Path>) -> Result<Self, ReferenceError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        let records = match ext.as_str() {
            "yaml" | "yml" => serde_yml::from_reader(read(path)?.as_slice())?,
            "json" => serde_json::from_slice(&read(path)?)?,
            "csv" => {
                let symptoms = read(path)?;
                let precautions = precautions.map(read).transpose()?;
                records_from_csv(&symptoms, precautions.as_deref())?
            }
            _ => return Err(ReferenceError::UnsupportedFormat(path.to_path_buf())),
        };

        let store = Self::new(records)?;
        log::info!(
            "Loaded {} conditions from {}",
            store.len(),
            path.display()
        );
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Always false for a constructed store.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ConditionRecord> {
        self.by_name.get(name).map(|&idx| &self.records[idx])
    }

    /// Precautions for a condition, or `None` if it is not in the store.
    pub fn precautions(&self, name: &str) -> Option<&[String]> {
        self.get(name).map(|r| r.precautions.as_slice())
    }

    /// Iterate records in source order.
    pub fn iter(&self) -> impl Iterator<Item = &ConditionRecord> {
        self.records.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.name.as_str())
    }
}

fn read(path: &Path) -> Result<Vec<u8>, ReferenceError> {
    std::fs::read(path).map_err(|source| ReferenceError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse the two-table CSV layout.
///
/// Rows repeating a disease are merged: symptoms are unioned in the order
/// first seen. Precautions for diseases absent from the symptom table are
/// ignored.
fn records_from_csv(
    symptoms: &[u8],
    precautions: Option<&[u8]>,
) -> Result<Vec<ConditionRecord>, ReferenceError> {
    let mut records: Vec<ConditionRecord> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for row in csv_reader(symptoms).records() {
        let row = row?;
        let Some((name, values)) = split_row(&row) else {
            continue;
        };

        let idx = *positions.entry(name.clone()).or_insert_with(|| {
            records.push(ConditionRecord {
                name,
                symptoms: Vec::new(),
                precautions: Vec::new(),
            });
            records.len() - 1
        });

        let record = &mut records[idx];
        for symptom in values {
            if !record.symptoms.contains(&symptom) {
                record.symptoms.push(symptom);
            }
        }
    }

    if let Some(precautions) = precautions {
        for row in csv_reader(precautions).records() {
            let row = row?;
            let Some((name, values)) = split_row(&row) else {
                continue;
            };
            match positions.get(&name) {
                Some(&idx) => records[idx].precautions = values,
                None => log::warn!("precautions given for unknown condition '{name}'"),
            }
        }
    }

    Ok(records)
}

fn csv_reader(data: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data)
}

/// First column is the disease name, remaining non-empty columns the values.
fn split_row(row: &csv::StringRecord) -> Option<(String, Vec<String>)> {
    let mut fields = row.iter();
    let name = fields.next()?.trim();
    if name.is_empty() {
        return None;
    }
    let values = fields
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect();
    Some((name.to_string(), values))
}
