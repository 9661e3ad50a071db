//! Configuration management for QueryMind
//!
//! Loads the TOML configuration, applies `QUERYMIND_SECTION__KEY` environment
//! overrides and validates the result before anything is loaded from disk.

use crate::error::{QueryMindError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub corpus: CorpusConfig,
    pub index: IndexConfig,
    pub encoder: EncoderConfig,
    pub reader: ReaderConfig,
    pub retrieval: RetrievalConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Static corpus inputs, built upstream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// JSON array of passage strings
    pub passages_path: PathBuf,
    /// Binary vector file, one vector per passage
    pub index_path: PathBuf,
}

/// Vector index backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Exact inner-product scan
    Flat,
    /// Approximate HNSW graph
    Hnsw,
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexKind::Flat => write!(f, "flat"),
            IndexKind::Hnsw => write!(f, "hnsw"),
        }
    }
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub kind: IndexKind,
    /// HNSW M parameter (number of connections per layer)
    pub hnsw_m: usize,
    /// HNSW construction parameter (higher = better recall, slower build)
    pub hnsw_ef_construction: usize,
    /// HNSW search parameter (higher = better recall, slower search)
    pub hnsw_ef_search: usize,
}

/// How a 3-D encoder output is reduced to one vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    Cls,
    Mean,
}

/// Question encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub max_length: usize,
    pub pooling: Pooling,
    pub use_token_type_ids: bool,
    pub intra_threads: usize,
}

/// Span reader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    /// Maximum joint (question, passage) length in tokens
    pub max_length: usize,
    pub use_token_type_ids: bool,
    pub intra_threads: usize,
}

/// Request-level retrieval defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// k used when a request omits it
    pub default_k: usize,
    /// Largest k a request may ask for
    pub max_k: usize,
}

/// Socket server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    pub max_connections: usize,
    /// Number of questions allowed to run model inference at once
    pub max_concurrent_inferences: usize,
}

/// Conversation store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

/// Conversation store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_path: PathBuf,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(QueryMindError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| QueryMindError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| QueryMindError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: QUERYMIND_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        let vars: Vec<(String, String)> = std::env::vars()
            .filter(|(key, _)| key.starts_with("QUERYMIND_"))
            .collect();
        self.apply_overrides(vars);
    }

    fn apply_overrides(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix("QUERYMIND_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "CORPUS__PASSAGES_PATH" => self.corpus.passages_path = PathBuf::from(value),
            "CORPUS__INDEX_PATH" => self.corpus.index_path = PathBuf::from(value),
            "INDEX__KIND" => {
                self.index.kind = match value {
                    "flat" => IndexKind::Flat,
                    "hnsw" => IndexKind::Hnsw,
                    other => {
                        return Err(QueryMindError::InvalidConfigValue {
                            path: path.to_string(),
                            message: format!("Unknown index kind '{}'", other),
                        })
                    }
                }
            }
            "ENCODER__MODEL_PATH" => self.encoder.model_path = PathBuf::from(value),
            "ENCODER__TOKENIZER_PATH" => self.encoder.tokenizer_path = PathBuf::from(value),
            "READER__MODEL_PATH" => self.reader.model_path = PathBuf::from(value),
            "READER__TOKENIZER_PATH" => self.reader.tokenizer_path = PathBuf::from(value),
            "RETRIEVAL__DEFAULT_K" => self.retrieval.default_k = parse_usize(path, value)?,
            "SERVER__SOCKET_PATH" => self.server.socket_path = PathBuf::from(value),
            "SERVER__MAX_CONCURRENT_INFERENCES" => {
                self.server.max_concurrent_inferences = parse_usize(path, value)?
            }
            "STORAGE__DATABASE_PATH" => self.storage.database_path = PathBuf::from(value),
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Copy of this configuration with `~` expanded in every path
    pub fn with_expanded_paths(&self) -> Config {
        let mut config = self.clone();
        for path in [
            &mut config.corpus.passages_path,
            &mut config.corpus.index_path,
            &mut config.encoder.model_path,
            &mut config.encoder.tokenizer_path,
            &mut config.reader.model_path,
            &mut config.reader.tokenizer_path,
            &mut config.server.socket_path,
            &mut config.storage.database_path,
        ] {
            *path = expand_tilde(path.as_path());
        }
        config
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| QueryMindError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("querymind").join("config.toml"))
    }
}

fn parse_usize(path: &str, value: &str) -> Result<usize> {
    value.parse().map_err(|_| QueryMindError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}' as an unsigned integer", value),
    })
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.querymind");
        let models_dir = data_dir.join("models");

        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
            },
            corpus: CorpusConfig {
                passages_path: data_dir.join("passages.json"),
                index_path: data_dir.join("passage.index"),
            },
            index: IndexConfig {
                kind: IndexKind::Flat,
                hnsw_m: 16,
                hnsw_ef_construction: 200,
                hnsw_ef_search: 64,
            },
            encoder: EncoderConfig {
                model_path: models_dir.join("question_encoder.onnx"),
                tokenizer_path: models_dir.join("question_encoder_tokenizer.json"),
                max_length: 512,
                pooling: Pooling::Cls,
                use_token_type_ids: true,
                intra_threads: 2,
            },
            reader: ReaderConfig {
                model_path: models_dir.join("reader.onnx"),
                tokenizer_path: models_dir.join("reader_tokenizer.json"),
                max_length: 512,
                use_token_type_ids: true,
                intra_threads: 2,
            },
            retrieval: RetrievalConfig {
                default_k: 5,
                max_k: 100,
            },
            server: ServerConfig {
                socket_path: data_dir.join("querymind.sock"),
                max_connections: 64,
                max_concurrent_inferences: 1,
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                database_path: data_dir.join("conversations.sqlite"),
            },
        }
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
