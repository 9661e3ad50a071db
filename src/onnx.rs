//! ONNX Runtime session wrapper shared by the question encoder and the reader.
//!
//! Both models are BERT-style: `input_ids`, `attention_mask` and optionally
//! `token_type_ids`, batch size 1. A session is one execution resource, so
//! `run` takes it behind a mutex and concurrent callers queue on it.

use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tokenizers::Encoding;

#[derive(Error, Debug)]
pub enum OnnxError {
    #[error("Failed to load model {path}: {reason}")]
    ModelLoadFailed { path: String, reason: String },

    #[error("Inference failed: {0}")]
    InferenceFailed(String),
}

/// Token-level model inputs for a single sequence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BertInputs {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub token_type_ids: Vec<i64>,
}

impl BertInputs {
    pub fn from_encoding(encoding: &Encoding) -> Self {
        let widen = |values: &[u32]| values.iter().map(|&v| i64::from(v)).collect();
        Self {
            input_ids: widen(encoding.get_ids()),
            attention_mask: widen(encoding.get_attention_mask()),
            token_type_ids: widen(encoding.get_type_ids()),
        }
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// An owned f32 output tensor
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
    pub name: String,
    pub shape: Vec<i64>,
    pub data: Vec<f32>,
}

/// Loaded ONNX model
pub struct OnnxModel {
    session: Mutex<Session>,
    use_token_type_ids: bool,
}

impl OnnxModel {
    /// Load an ONNX model from the given path.
    pub fn load(
        model_path: &Path,
        intra_threads: usize,
        use_token_type_ids: bool,
    ) -> Result<Self, OnnxError> {
        let path_str = model_path.display().to_string();
        if !model_path.exists() {
            return Err(OnnxError::ModelLoadFailed {
                path: path_str,
                reason: "model file not found".to_string(),
            });
        }

        let session = Session::builder()
            .map_err(|e| load_failed(&path_str, e))?
            .with_intra_threads(intra_threads)
            .map_err(|e| load_failed(&path_str, e))?
            .commit_from_file(model_path)
            .map_err(|e| load_failed(&path_str, e))?;

        let model_name = model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("onnx-model");

        tracing::info!("ONNX model loaded: {} ({})", model_name, path_str);

        Ok(Self {
            session: Mutex::new(session),
            use_token_type_ids,
        })
    }

    /// Run one forward pass and copy every f32 output out of the session
    pub fn run(&self, inputs: &BertInputs) -> Result<Vec<OutputTensor>, OnnxError> {
        let shape = vec![1i64, inputs.len() as i64];
        let tensor = |values: &[i64]| {
            Tensor::from_array((shape.clone(), values.to_vec()))
                .map_err(|e| OnnxError::InferenceFailed(format!("tensor creation error: {e}")))
        };

        let ids = tensor(&inputs.input_ids)?;
        let mask = tensor(&inputs.attention_mask)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| OnnxError::InferenceFailed(format!("session lock poisoned: {e}")))?;

        let outputs = if self.use_token_type_ids {
            let types = tensor(&inputs.token_type_ids)?;
            session.run(ort::inputs![
                "input_ids" => ids,
                "attention_mask" => mask,
                "token_type_ids" => types
            ])
        } else {
            session.run(ort::inputs![
                "input_ids" => ids,
                "attention_mask" => mask
            ])
        }
        .map_err(|e| OnnxError::InferenceFailed(e.to_string()))?;

        let mut extracted = Vec::new();
        for (name, value) in outputs.iter() {
            let (shape, data) = value
                .try_extract_tensor::<f32>()
                .map_err(|e| OnnxError::InferenceFailed(format!("tensor extraction failed: {e}")))?;
            extracted.push(OutputTensor {
                name: name.to_string(),
                shape: shape.iter().copied().collect(),
                data: data.to_vec(),
            });
        }

        Ok(extracted)
    }
}

fn load_failed(path: &str, e: impl std::fmt::Display) -> OnnxError {
    OnnxError::ModelLoadFailed {
        path: path.to_string(),
        reason: e.to_string(),
    }
}

/// Pick an output by name, falling back to its position in the output list
pub fn select_output<'a>(
    outputs: &'a [OutputTensor],
    name: &str,
    position: usize,
) -> Option<&'a OutputTensor> {
    outputs
        .iter()
        .find(|o| o.name == name)
        .or_else(|| outputs.get(position))
}
