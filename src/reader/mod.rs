//! Extractive span reader
//!
//! Scores every token of a jointly encoded `(question, passage)` sequence as
//! a possible answer start and end, then decodes the best span:
//! 1. strip markup from the passage
//! 2. encode the pair, truncating only the passage side
//! 3. score start/end logits (`SpanScorer`)
//! 4. force every non-passage position to `MASKED_LOGIT`
//! 5. pick start and end independently by arg-max
//! 6. confidence = start logit + end logit
//! 7. decode `[start, end]` without special tokens
//!
//! Degenerate spans (end before start, nothing but special tokens) come back
//! as an empty answer rather than an error.

mod sanitize;

pub use sanitize::MarkupStripper;

use crate::config::ReaderConfig;
use crate::onnx::{select_output, BertInputs, OnnxError, OnnxModel, OutputTensor};
use ndarray::Array1;
use thiserror::Error;
use tokenizers::{Encoding, Tokenizer, TruncationParams, TruncationStrategy};

/// Logit assigned to positions that may not start or end an answer
pub const MASKED_LOGIT: f32 = -10000.0;

/// Sequence id of the passage segment in a pair encoding
const CONTEXT_SEQUENCE: usize = 1;

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Reader initialization failed: {0}")]
    InitializationError(String),

    #[error("Tokenization failed: {0}")]
    TokenizationError(String),

    #[error("Decoding failed: {0}")]
    DecodingError(String),

    #[error(transparent)]
    Model(#[from] OnnxError),

    #[error("Unexpected reader output: {0}")]
    UnexpectedOutput(String),
}

/// Best span found in one passage
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerSpan {
    /// Decoded answer, empty when the span is degenerate
    pub text: String,
    /// Sum of the start and end logits. Not a probability.
    pub confidence: f32,
}

impl AnswerSpan {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Extracts an answer span from a passage
pub trait SpanReader: Send + Sync {
    fn extract_answer(&self, question: &str, context: &str) -> Result<AnswerSpan, ReaderError>;
}

/// Raw per-token start and end scores
#[derive(Debug, Clone, PartialEq)]
pub struct SpanLogits {
    pub start: Vec<f32>,
    pub end: Vec<f32>,
}

/// The learned scoring function: one start and one end logit per input token
pub trait SpanScorer: Send + Sync {
    fn score(&self, inputs: &BertInputs) -> Result<SpanLogits, ReaderError>;
}

/// Question-answering head exported to ONNX (`start_logits`, `end_logits`)
pub struct OnnxSpanScorer {
    model: OnnxModel,
}

impl OnnxSpanScorer {
    pub fn new(model: OnnxModel) -> Self {
        Self { model }
    }
}

impl SpanScorer for OnnxSpanScorer {
    fn score(&self, inputs: &BertInputs) -> Result<SpanLogits, ReaderError> {
        let outputs = self.model.run(inputs)?;

        let start = select_output(&outputs, "start_logits", 0)
            .ok_or_else(|| ReaderError::UnexpectedOutput("missing start_logits".to_string()))?;
        let end = select_output(&outputs, "end_logits", 1)
            .ok_or_else(|| ReaderError::UnexpectedOutput("missing end_logits".to_string()))?;

        Ok(SpanLogits {
            start: token_logits(start, inputs.len())?,
            end: token_logits(end, inputs.len())?,
        })
    }
}

/// Flatten a `[1, seq]` logit tensor, checking it covers every input token
fn token_logits(output: &OutputTensor, seq_len: usize) -> Result<Vec<f32>, ReaderError> {
    match output.shape.as_slice() {
        [1, len] if *len as usize == seq_len && output.data.len() == seq_len => {
            Ok(output.data.clone())
        }
        shape => Err(ReaderError::UnexpectedOutput(format!(
            "{} has shape {:?}, expected [1, {}]",
            output.name, shape, seq_len
        ))),
    }
}

/// BERT-style extractive reader over a tokenizer and a span scorer
pub struct BertSpanReader<S = OnnxSpanScorer> {
    tokenizer: Tokenizer,
    /// Same tokenizer truncating longest-first, for questions that leave the
    /// passage no room
    fallback: Tokenizer,
    scorer: S,
    stripper: MarkupStripper,
}

impl BertSpanReader<OnnxSpanScorer> {
    /// Load the reader tokenizer and ONNX model named in the configuration
    pub fn load(config: &ReaderConfig) -> Result<Self, ReaderError> {
        let tokenizer = Tokenizer::from_file(&config.tokenizer_path).map_err(|e| {
            ReaderError::InitializationError(format!(
                "Cannot load tokenizer from '{}': {}",
                config.tokenizer_path.display(),
                e
            ))
        })?;
        let model = OnnxModel::load(
            &config.model_path,
            config.intra_threads,
            config.use_token_type_ids,
        )?;

        Self::new(tokenizer, OnnxSpanScorer::new(model), config.max_length)
    }
}

impl<S: SpanScorer> BertSpanReader<S> {
    /// Wrap a tokenizer and scorer. The tokenizer's truncation is replaced so
    /// that pairs are cut to `max_length` tokens from the passage side only.
    /// When the question alone is too long for that, the pair is cut
    /// longest-first instead.
    pub fn new(tokenizer: Tokenizer, scorer: S, max_length: usize) -> Result<Self, ReaderError> {
        Ok(Self {
            tokenizer: with_truncation(tokenizer.clone(), max_length, TruncationStrategy::OnlySecond)?,
            fallback: with_truncation(tokenizer, max_length, TruncationStrategy::LongestFirst)?,
            scorer,
            stripper: MarkupStripper::new()?,
        })
    }

    fn encode_pair(&self, question: &str, context: &str) -> Result<Encoding, ReaderError> {
        match self.tokenizer.encode((question, context), true) {
            Ok(encoding) => Ok(encoding),
            Err(e) => {
                tracing::debug!("Passage-only truncation failed ({}), truncating longest first", e);
                self.fallback
                    .encode((question, context), true)
                    .map_err(|e| ReaderError::TokenizationError(e.to_string()))
            }
        }
    }
}

fn with_truncation(
    mut tokenizer: Tokenizer,
    max_length: usize,
    strategy: TruncationStrategy,
) -> Result<Tokenizer, ReaderError> {
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length,
            strategy,
            ..Default::default()
        }))
        .map_err(|e| ReaderError::InitializationError(e.to_string()))?;
    Ok(tokenizer)
}

impl<S: SpanScorer> SpanReader for BertSpanReader<S> {
    fn extract_answer(&self, question: &str, context: &str) -> Result<AnswerSpan, ReaderError> {
        let context = self.stripper.strip(context);

        let encoding = self.encode_pair(question, &context)?;

        let inputs = BertInputs::from_encoding(&encoding);
        let logits = self.scorer.score(&inputs)?;
        if logits.start.len() != inputs.len() || logits.end.len() != inputs.len() {
            return Err(ReaderError::UnexpectedOutput(format!(
                "scorer returned {}/{} logits for {} tokens",
                logits.start.len(),
                logits.end.len(),
                inputs.len()
            )));
        }

        let mut start = Array1::from(logits.start);
        let mut end = Array1::from(logits.end);
        mask_non_context(&mut start, &mut end, &encoding.get_sequence_ids());

        let (Some(start_index), Some(end_index)) = (argmax(&start), argmax(&end)) else {
            return Ok(AnswerSpan {
                text: String::new(),
                confidence: 0.0,
            });
        };

        let confidence = start[start_index] + end[end_index];

        let text = if end_index < start_index {
            String::new()
        } else {
            let ids = &encoding.get_ids()[start_index..=end_index];
            self.tokenizer
                .decode(ids, true)
                .map_err(|e| ReaderError::DecodingError(e.to_string()))?
                .trim()
                .to_string()
        };

        tracing::trace!(
            "Span [{}, {}] confidence={:.4} answer='{}'",
            start_index,
            end_index,
            confidence,
            text
        );

        Ok(AnswerSpan { text, confidence })
    }
}

/// Force every position outside the passage segment (question tokens and
/// special tokens) to `MASKED_LOGIT` so arg-max can never land on them.
pub fn mask_non_context(
    start: &mut Array1<f32>,
    end: &mut Array1<f32>,
    sequence_ids: &[Option<usize>],
) {
    for (i, sequence) in sequence_ids.iter().enumerate() {
        if *sequence != Some(CONTEXT_SEQUENCE) {
            if let Some(logit) = start.get_mut(i) {
                *logit = MASKED_LOGIT;
            }
            if let Some(logit) = end.get_mut(i) {
                *logit = MASKED_LOGIT;
            }
        }
    }
}

/// Index of the first maximal value
pub fn argmax(values: &Array1<f32>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &value) in values.iter().enumerate() {
        match best {
            Some((_, top)) if value <= top => {}
            Some((_, top)) if top.is_nan() || value > top => best = Some((i, value)),
            None => best = Some((i, value)),
            _ => {}
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use serde_json::json;
    use std::collections::HashMap;
    use std::str::FromStr;

    fn word_level_tokenizer(words: &[&str]) -> Tokenizer {
        let mut vocab = serde_json::Map::new();
        for (id, token) in ["[PAD]", "[UNK]", "[CLS]", "[SEP]"]
            .iter()
            .chain(words)
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

    /// Scores tokens by id with a small per-position penalty, so an unmasked
    /// question token would beat the same token in the passage.
    struct TokenScorer {
        start: HashMap<i64, f32>,
        end: HashMap<i64, f32>,
    }

    impl TokenScorer {
        fn new(tokenizer: &Tokenizer, start: &[(&str, f32)], end: &[(&str, f32)]) -> Self {
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
                    .enumerate()
                    .map(|(pos, id)| table.get(id).copied().unwrap_or(0.0) - 0.001 * pos as f32)
                    .collect()
            };
            Ok(SpanLogits {
                start: logits(&self.start),
                end: logits(&self.end),
            })
        }
    }

    const WORDS: &[&str] = &[
        "where", "is", "paris", "in", "france", "the", "capital", "of", "what", "?", ".",
    ];

    fn reader(start: &[(&str, f32)], end: &[(&str, f32)], max_length: usize) -> BertSpanReader<TokenScorer> {
        let tokenizer = word_level_tokenizer(WORDS);
        let scorer = TokenScorer::new(&tokenizer, start, end);
        BertSpanReader::new(tokenizer, scorer, max_length).unwrap()
    }

    #[test]
    fn test_extracts_best_span() {
        let reader = reader(&[("paris", 8.0)], &[("paris", 7.0)], 512);

        let span = reader
            .extract_answer("what is the capital of france ?", "the capital of france is paris .")
            .unwrap();

        assert_eq!(span.text, "paris");
        // Start and end both at "paris" (position 14), minus the position penalty
        assert!((span.confidence - (15.0 - 2.0 * 0.014)).abs() < 1e-4);
    }

    #[test]
    fn test_question_tokens_are_masked() {
        // "paris" appears in the question first; the scorer prefers it
        let reader = reader(&[("paris", 5.0)], &[("france", 5.0)], 512);

        let span = reader
            .extract_answer("where is paris", "paris is in france")
            .unwrap();

        assert_eq!(span.text, "paris is in france");
    }

    #[test]
    fn test_end_before_start_is_empty() {
        let reader = reader(&[("france", 5.0)], &[("paris", 5.0)], 512);

        let span = reader
            .extract_answer("where is paris", "paris is in france")
            .unwrap();

        assert!(span.is_empty());
        assert!(span.confidence > 9.0);
    }

    #[test]
    fn test_markup_does_not_change_answer() {
        let reader = reader(&[("paris", 5.0)], &[("paris", 5.0)], 512);
        let question = "what is the capital of france ?";

        let tagged = reader
            .extract_answer(question, "<p>the capital of france is <b>paris</b> .</p>")
            .unwrap();
        let plain = reader
            .extract_answer(question, "the capital of france is paris .")
            .unwrap();

        assert_eq!(tagged, plain);
        assert_eq!(tagged.text, "paris");
    }

    #[test]
    fn test_truncates_passage_side_only() {
        // [CLS] where is paris [SEP] paris is [SEP] fits in 8 tokens
        let reader = reader(&[("paris", 5.0)], &[("france", 5.0), ("is", 1.0)], 8);

        let span = reader
            .extract_answer("where is paris", "paris is in france")
            .unwrap();

        assert_eq!(span.text, "paris is");
    }

    #[test]
    fn test_long_question_still_leaves_passage_tokens() {
        // 5 question tokens + 1 passage token + 3 specials exceed 8
        let reader = reader(&[("paris", 5.0)], &[("paris", 5.0)], 8);

        let span = reader
            .extract_answer("where is paris in france", "paris")
            .unwrap();

        assert_eq!(span.text, "paris");
        assert!(span.confidence > 9.0);
    }

    #[test]
    fn test_empty_passage_yields_empty_answer() {
        let reader = reader(&[("paris", 5.0)], &[("paris", 5.0)], 512);

        let span = reader.extract_answer("where is paris", "").unwrap();

        assert!(span.is_empty());
        assert!(span.confidence <= 2.0 * MASKED_LOGIT);
    }

    #[test]
    fn test_mask_non_context() {
        let mut start = array![1.0, 9.0, 2.0, 3.0, 0.5];
        let mut end = array![1.0, 9.0, 2.0, 3.0, 0.5];
        let sequence_ids = [None, Some(0), None, Some(1), None];

        mask_non_context(&mut start, &mut end, &sequence_ids);

        assert_eq!(start, array![MASKED_LOGIT, MASKED_LOGIT, MASKED_LOGIT, 3.0, MASKED_LOGIT]);
        assert_eq!(argmax(&start), Some(3));
        assert_eq!(argmax(&end), Some(3));
    }

    #[test]
    fn test_argmax_picks_first_maximum() {
        assert_eq!(argmax(&array![1.0, 4.0, 4.0, 2.0]), Some(1));
        assert_eq!(argmax(&array![f32::NAN, 1.0]), Some(1));
        assert_eq!(argmax(&Array1::<f32>::zeros(0)), None);
    }
}
