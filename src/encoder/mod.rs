/// Question encoder trait and ONNX implementation
use crate::config::{EncoderConfig, Pooling};
use crate::onnx::{select_output, BertInputs, OnnxError, OnnxModel, OutputTensor};
use std::path::Path;
use thiserror::Error;
use tokenizers::{Tokenizer, TruncationParams, TruncationStrategy};

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("Encoder initialization failed: {0}")]
    InitializationError(String),

    #[error("Tokenization failed: {0}")]
    TokenizationError(String),

    #[error(transparent)]
    Model(#[from] OnnxError),

    #[error("Unexpected encoder output: {0}")]
    UnexpectedOutput(String),
}

/// Maps a question to a single vector in the passage-vector space
///
/// Deterministic for fixed weights. Normalization for the index metric is
/// the caller's job.
pub trait QuestionEncoder: Send + Sync {
    fn encode(&self, question: &str) -> Result<Vec<f32>, EncoderError>;
}

/// DPR-style question encoder exported to ONNX
///
/// Empty or overlong questions are not rejected: the tokenizer truncates
/// deterministically to `max_length` tokens.
pub struct OnnxQuestionEncoder {
    model: OnnxModel,
    tokenizer: Tokenizer,
    pooling: Pooling,
}

impl OnnxQuestionEncoder {
    pub fn load(config: &EncoderConfig) -> Result<Self, EncoderError> {
        let tokenizer = load_tokenizer(&config.tokenizer_path, config.max_length)?;
        let model = OnnxModel::load(
            &config.model_path,
            config.intra_threads,
            config.use_token_type_ids,
        )?;

        Ok(Self {
            model,
            tokenizer,
            pooling: config.pooling,
        })
    }
}

impl QuestionEncoder for OnnxQuestionEncoder {
    fn encode(&self, question: &str) -> Result<Vec<f32>, EncoderError> {
        let encoding = self
            .tokenizer
            .encode(question, true)
            .map_err(|e| EncoderError::TokenizationError(e.to_string()))?;

        let inputs = BertInputs::from_encoding(&encoding);
        let outputs = self.model.run(&inputs)?;

        let output = select_output(&outputs, "pooler_output", 0).ok_or_else(|| {
            EncoderError::UnexpectedOutput("model produced no outputs".to_string())
        })?;

        pool(output, self.pooling)
    }
}

/// Load a tokenizer.json and pin its truncation to `max_length`
fn load_tokenizer(path: &Path, max_length: usize) -> Result<Tokenizer, EncoderError> {
    let mut tokenizer = Tokenizer::from_file(path).map_err(|e| {
        EncoderError::InitializationError(format!(
            "Cannot load tokenizer from '{}': {}",
            path.display(),
            e
        ))
    })?;

    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length,
            strategy: TruncationStrategy::LongestFirst,
            ..Default::default()
        }))
        .map_err(|e| EncoderError::InitializationError(e.to_string()))?;

    Ok(tokenizer)
}

/// Reduce a `[1, dim]` or `[1, seq, dim]` output to one vector
fn pool(output: &OutputTensor, pooling: Pooling) -> Result<Vec<f32>, EncoderError> {
    let expected: i64 = output.shape.iter().product();
    if expected < 0 || output.data.len() != expected as usize {
        return Err(EncoderError::UnexpectedOutput(format!(
            "shape {:?} does not match {} values",
            output.shape,
            output.data.len()
        )));
    }

    match output.shape.as_slice() {
        [1, dim] => Ok(output.data[..*dim as usize].to_vec()),
        [1, seq, dim] if *seq > 0 => {
            let (seq, dim) = (*seq as usize, *dim as usize);
            match pooling {
                Pooling::Cls => Ok(output.data[..dim].to_vec()),
                Pooling::Mean => {
                    let mut pooled = vec![0.0f32; dim];
                    for token in output.data.chunks_exact(dim).take(seq) {
                        for (acc, value) in pooled.iter_mut().zip(token) {
                            *acc += value;
                        }
                    }
                    for value in &mut pooled {
                        *value /= seq as f32;
                    }
                    Ok(pooled)
                }
            }
        }
        shape => Err(EncoderError::UnexpectedOutput(format!(
            "unexpected output shape: {:?}",
            shape
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(shape: Vec<i64>, data: Vec<f32>) -> OutputTensor {
        OutputTensor {
            name: "last_hidden_state".to_string(),
            shape,
            data,
        }
    }

    #[test]
    fn test_pool_pooled_output() {
        let output = tensor(vec![1, 3], vec![0.1, 0.2, 0.3]);
        assert_eq!(pool(&output, Pooling::Mean).unwrap(), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_pool_cls_and_mean() {
        let output = tensor(vec![1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(pool(&output, Pooling::Cls).unwrap(), vec![1.0, 2.0]);
        assert_eq!(pool(&output, Pooling::Mean).unwrap(), vec![2.0, 3.0]);
    }

    #[test]
    fn test_pool_rejects_batched_output() {
        let output = tensor(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        assert!(matches!(
            pool(&output, Pooling::Cls),
            Err(EncoderError::UnexpectedOutput(_))
        ));
    }

    #[test]
    #[ignore] // Requires an exported DPR question encoder and ORT_DYLIB_PATH
    fn test_encode_is_deterministic() {
        let config = crate::config::Config::default();
        let encoder = OnnxQuestionEncoder::load(&config.encoder).unwrap();

        let first = encoder.encode("who wrote hamlet?").unwrap();
        let second = encoder.encode("who wrote hamlet?").unwrap();
        assert_eq!(first, second);

        // Empty questions encode instead of failing
        assert!(encoder.encode("").is_ok());
    }
}
