use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::semantic::{EmbeddingModel, DEFAULT_MODEL};
use crate::storage::write_bytes_atomic;

const CONFIG_FILE_NAME: &str = "config.yaml";
/// Overrides the default base directory
pub const BASE_PATH_ENV: &str = "SYMPTOM_MATCH_BASE_PATH";

const DEFAULT_REFERENCE_PATH: &str = "conditions.yaml";
const DEFAULT_CACHE_DIR: &str = "cache";
const DEFAULT_TOP_K: usize = 1;
/// Downloaded embedding models live here, under the base directory
const MODELS_DIR: &str = "models";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("couldn't find home dir; set {BASE_PATH_ENV}")]
    NoHomeDir,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Reference database (.yaml, .yml, .json or .csv).
    /// Relative paths resolve against the base directory.
    #[serde(default = "default_reference_path")]
    pub reference_path: String,

    /// Precautions table, only read when `reference_path` is a CSV file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precautions_path: Option<String>,

    /// Directory holding the cached index and its build lock
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Embedding model name (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_model")]
    pub model: String,

    /// Number of matches returned when the caller doesn't ask for a count
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reference_path: default_reference_path(),
            precautions_path: None,
            cache_dir: default_cache_dir(),
            model: default_model(),
            top_k: default_top_k(),
            base_path: PathBuf::new(),
        }
    }
}

fn default_reference_path() -> String {
    DEFAULT_REFERENCE_PATH.to_string()
}

fn default_cache_dir() -> String {
    DEFAULT_CACHE_DIR.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

/// `$SYMPTOM_MATCH_BASE_PATH`, or `~/.local/share/symptom-match`.
pub fn base_path() -> Result<PathBuf, ConfigError> {
    if let Ok(path) = std::env::var(BASE_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }

    let home = homedir::my_home()
        .ok()
        .flatten()
        .ok_or(ConfigError::NoHomeDir)?;

    Ok(home.join(".local/share/symptom-match"))
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.top_k == 0 {
            return Err(ConfigError::Invalid(
                "top_k must be greater than 0".to_string(),
            ));
        }

        if self.reference_path.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "reference_path must not be empty".to_string(),
            ));
        }

        if !EmbeddingModel::is_supported(&self.model) {
            return Err(ConfigError::Invalid(format!(
                "unsupported embedding model '{}'",
                self.model
            )));
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, creating it with defaults if it
    /// does not exist.
    pub fn load_with(base_path: &Path) -> Result<Self, ConfigError> {
        let path = base_path.join(CONFIG_FILE_NAME);
        let io_err = |source| ConfigError::Io {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(base_path).map_err(io_err)?;

        // create new if does not exist
        if !path.exists() {
            let defaults = serde_yml::to_string(&Self::default())?;
            write_bytes_atomic(&path, defaults.as_bytes()).map_err(io_err)?;
        }

        let config_str = std::fs::read_to_string(&path).map_err(io_err)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = self.base_path.join(CONFIG_FILE_NAME);
        let config_str = serde_yml::to_string(&self)?;
        write_bytes_atomic(&path, config_str.as_bytes())
            .map_err(|source| ConfigError::Io { path, source })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn reference_path(&self) -> PathBuf {
        self.resolve(&self.reference_path)
    }

    pub fn precautions_path(&self) -> Option<PathBuf> {
        self.precautions_path.as_deref().map(|p| self.resolve(p))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.resolve(&self.cache_dir)
    }

    pub fn models_dir(&self) -> PathBuf {
        self.base_path.join(MODELS_DIR)
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }
}
