//! Deterministic stand-ins for the learned models
//!
//! A word-level tokenizer with BERT special tokens, a fixed question encoder
//! and a scorer that assigns logits by token, so full pipelines run without
//! ONNX models.

#![allow(dead_code)]

use ndarray::Array2;
use querymind::corpus::PassageStore;
use querymind::encoder::{EncoderError, QuestionEncoder};
use querymind::index::{FlatIndex, Metric, VectorIndex};
use querymind::onnx::BertInputs;
use querymind::reader::{AnswerSpan, BertSpanReader, ReaderError, SpanLogits, SpanReader, SpanScorer};
use querymind::retrieval::RetrievalReadingPipeline;
use serde_json::json;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokenizers::Tokenizer;

pub const WORDS: &[&str] = &[
    "where", "is", "paris", "in", "france", "lyon", "rome", "italy", "which", "city", "the",
    "capital", "of", "what", "?", ".",
];

/// Lowercasing, whitespace-splitting word-level tokenizer over `WORDS`
pub fn word_level_tokenizer() -> Tokenizer {
    let mut vocab = serde_json::Map::new();
    for (id, token) in ["[PAD]", "[UNK]", "[CLS]", "[SEP]"]
        .iter()
        .chain(WORDS)
        .enumerate()
    {
        vocab.insert(token.to_string(), json!(id));
    }
    let special = |id: u32, content: &str| {
        json!({
            "id": id, "content": content, "single_word": false, "lstrip": false,
            "rstrip": false, "normalized": false, "special": true
        })
    };
    let tokenizer_json = json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [
            special(0, "[PAD]"), special(1, "[UNK]"), special(2, "[CLS]"), special(3, "[SEP]")
        ],
        "normalizer": {"type": "Lowercase"},
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": {"type": "BertProcessing", "sep": ["[SEP]", 3], "cls": ["[CLS]", 2]},
        "decoder": null,
        "model": {"type": "WordLevel", "vocab": vocab, "unk_token": "[UNK]"}
    });
    Tokenizer::from_str(&tokenizer_json.to_string()).unwrap()
}

/// Returns the same vector for every question and records what it saw
pub struct FixedEncoder {
    vector: Vec<f32>,
    pub questions: Mutex<Vec<String>>,
}

impl FixedEncoder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            questions: Mutex::new(Vec::new()),
        }
    }
}

impl QuestionEncoder for FixedEncoder {
    fn encode(&self, question: &str) -> Result<Vec<f32>, EncoderError> {
        self.questions.lock().unwrap().push(question.to_string());
        Ok(self.vector.clone())
    }
}

/// Start/end logits looked up by token; unknown tokens score 0
pub struct TokenScorer {
    start: HashMap<i64, f32>,
    end: HashMap<i64, f32>,
}

impl TokenScorer {
    pub fn new(start: &[(&str, f32)], end: &[(&str, f32)]) -> Self {
        let tokenizer = word_level_tokenizer();
        let lookup = |pairs: &[(&str, f32)]| {
            pairs
                .iter()
                .map(|(word, logit)| (tokenizer.token_to_id(word).unwrap() as i64, *logit))
                .collect()
        };
        Self {
            start: lookup(start),
            end: lookup(end),
        }
    }
}

impl SpanScorer for TokenScorer {
    fn score(&self, inputs: &BertInputs) -> Result<SpanLogits, ReaderError> {
        let logits = |table: &HashMap<i64, f32>| {
            inputs
                .input_ids
                .iter()
                .map(|id| table.get(id).copied().unwrap_or(0.0))
                .collect()
        };
        Ok(SpanLogits {
            start: logits(&self.start),
            end: logits(&self.end),
        })
    }
}

pub fn bert_reader(start: &[(&str, f32)], end: &[(&str, f32)]) -> BertSpanReader<TokenScorer> {
    BertSpanReader::new(word_level_tokenizer(), TokenScorer::new(start, end), 512).unwrap()
}

/// Wraps a reader and records every passage handed to it
pub struct CountingReader<R> {
    inner: R,
    pub contexts: Mutex<Vec<String>>,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn reads(&self) -> Vec<String> {
        self.contexts.lock().unwrap().clone()
    }
}

impl<R: SpanReader> SpanReader for CountingReader<R> {
    fn extract_answer(&self, question: &str, context: &str) -> Result<AnswerSpan, ReaderError> {
        self.contexts.lock().unwrap().push(context.to_string());
        self.inner.extract_answer(question, context)
    }
}

/// Flat index over one-dimensional-ish vectors: passage `i` gets similarity
/// `similarities[i]` against the query `[1, 0]`
pub fn ranked_index(similarities: &[f32]) -> FlatIndex {
    let mut vectors = Array2::zeros((similarities.len(), 2));
    for (i, similarity) in similarities.iter().enumerate() {
        vectors[[i, 0]] = *similarity;
    }
    FlatIndex::new(vectors, Metric::InnerProduct)
}

pub fn passages(texts: &[&str]) -> Arc<PassageStore> {
    Arc::new(texts.iter().map(|t| t.to_string()).collect())
}

/// Pipeline over `texts` ranked by `similarities`, answering with `reader`
pub fn pipeline_with(
    texts: &[&str],
    similarities: &[f32],
    reader: Arc<dyn SpanReader>,
) -> RetrievalReadingPipeline {
    let index: Arc<dyn VectorIndex> = Arc::new(ranked_index(similarities));
    RetrievalReadingPipeline::new(
        passages(texts),
        index,
        Arc::new(FixedEncoder::new(vec![1.0, 0.0])),
        reader,
    )
    .unwrap()
}
