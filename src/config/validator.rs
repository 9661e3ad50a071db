use crate::config::{Config, IndexKind};
use crate::error::{QueryMindError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_corpus(config, &mut errors);
        Self::validate_index(config, &mut errors);
        Self::validate_models(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_server(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(QueryMindError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_corpus(config: &Config, errors: &mut Vec<ValidationError>) {
        // Existence is checked at load time, after ~ expansion
        if config.corpus.passages_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "corpus.passages_path",
                "Passages path cannot be empty",
            ));
        }

        if config.corpus.index_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "corpus.index_path",
                "Index path cannot be empty",
            ));
        }
    }

    fn validate_index(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.index.kind != IndexKind::Hnsw {
            return;
        }

        if config.index.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_m",
                "HNSW M must be greater than 0",
            ));
        }

        if config.index.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if config.index.hnsw_ef_search == 0 {
            errors.push(ValidationError::new(
                "index.hnsw_ef_search",
                "HNSW ef_search must be greater than 0",
            ));
        }
    }

    fn validate_models(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.encoder.max_length < 2 {
            errors.push(ValidationError::new(
                "encoder.max_length",
                "Encoder max_length must leave room for special tokens",
            ));
        }

        // [CLS] question [SEP] context [SEP]
        if config.reader.max_length < 4 {
            errors.push(ValidationError::new(
                "reader.max_length",
                "Reader max_length must leave room for special tokens",
            ));
        }

        if config.encoder.intra_threads == 0 || config.reader.intra_threads == 0 {
            errors.push(ValidationError::new(
                "encoder.intra_threads",
                "Inference thread counts must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;
        if retrieval.default_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.default_k",
                "default_k must be at least 1",
            ));
        }

        if retrieval.max_k < retrieval.default_k {
            errors.push(ValidationError::new(
                "retrieval.max_k",
                format!(
                    "max_k ({}) must not be smaller than default_k ({})",
                    retrieval.max_k, retrieval.default_k
                ),
            ));
        }
    }

    fn validate_server(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.server.max_connections == 0 {
            errors.push(ValidationError::new(
                "server.max_connections",
                "max_connections must be greater than 0",
            ));
        }

        if config.server.max_concurrent_inferences == 0 {
            errors.push(ValidationError::new(
                "server.max_concurrent_inferences",
                "max_concurrent_inferences must be greater than 0",
            ));
        }

        if config.server.socket_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "server.socket_path",
                "Socket path cannot be empty",
            ));
        }
    }
}
