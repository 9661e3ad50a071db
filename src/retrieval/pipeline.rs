//! Retrieval-and-reading pipeline

use crate::config::{Config, IndexKind};
use crate::corpus::PassageStore;
use crate::encoder::{OnnxQuestionEncoder, QuestionEncoder};
use crate::error::{QueryMindError, Result};
use crate::index::{l2_normalize, open_index, Metric, VectorIndex};
use crate::reader::{BertSpanReader, SpanReader};
use crate::retrieval::{
    deduplicate_candidates, round_confidence, select_best, PipelineError, NO_ANSWER,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A passage selected for reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    /// Position in the passage store
    pub position: i64,
    /// Index similarity score
    pub similarity: f32,
    pub text: String,
}

/// Answer to one question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub question: String,
    pub answer: String,
    /// Rounded start+end logit sum of the winning span. Not a probability.
    pub confidence_logit: f64,
}

impl FinalAnswer {
    /// Sentinel returned when no candidate yields a usable span
    pub fn no_answer(question: &str) -> Self {
        Self {
            question: question.to_string(),
            answer: NO_ANSWER.to_string(),
            confidence_logit: 0.0,
        }
    }

    pub fn is_no_answer(&self) -> bool {
        self.answer == NO_ANSWER
    }
}

/// Sizes of the loaded corpus, reported by health checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStats {
    pub passages_count: usize,
    pub index_size: usize,
    pub index_kind: IndexKind,
}

/// Encoder → index → dedup → reader → selection
///
/// Passages and index are loaded once and only read afterwards, so one
/// pipeline is shared by every concurrent request. All per-question state
/// lives on the stack of `ask`.
#[derive(Clone)]
pub struct RetrievalReadingPipeline {
    passages: Arc<PassageStore>,
    index: Arc<dyn VectorIndex>,
    encoder: Arc<dyn QuestionEncoder>,
    reader: Arc<dyn SpanReader>,
}

impl RetrievalReadingPipeline {
    /// Assemble a pipeline from already loaded parts.
    ///
    /// Fails when the index and the passage list disagree on the number of
    /// entries.
    pub fn new(
        passages: Arc<PassageStore>,
        index: Arc<dyn VectorIndex>,
        encoder: Arc<dyn QuestionEncoder>,
        reader: Arc<dyn SpanReader>,
    ) -> Result<Self> {
        if index.len() != passages.len() {
            return Err(QueryMindError::Corpus(format!(
                "Index holds {} vectors but {} passages were loaded",
                index.len(),
                passages.len()
            )));
        }

        Ok(Self {
            passages,
            index,
            encoder,
            reader,
        })
    }

    /// Load passages, index and both models named in the configuration
    pub fn load(config: &Config) -> Result<Self> {
        let config = config.with_expanded_paths();

        let passages = PassageStore::load(&config.corpus.passages_path)?;
        let index = open_index(&config.corpus.index_path, &config.index)?;
        let encoder = OnnxQuestionEncoder::load(&config.encoder)?;
        let reader = BertSpanReader::load(&config.reader)?;

        let pipeline = Self::new(
            Arc::new(passages),
            Arc::from(index),
            Arc::new(encoder),
            Arc::new(reader),
        )?;

        tracing::info!(
            "Pipeline ready: {} passages, {} index",
            pipeline.passages.len(),
            pipeline.index.kind()
        );

        Ok(pipeline)
    }

    /// Encode, search and deduplicate: the passages `ask` would read, in
    /// reading order.
    pub fn candidates(
        &self,
        question: &str,
        k: usize,
    ) -> std::result::Result<Vec<Candidate>, PipelineError> {
        if k == 0 {
            return Err(PipelineError::InvalidQuery(
                "k must be at least 1".to_string(),
            ));
        }

        let mut query = self.encoder.encode(question)?;
        if self.index.metric() == Metric::Cosine {
            l2_normalize(&mut query);
        }

        let hits = self.index.search(&query, k)?;
        let retrieved = hits.len();

        let candidates: Vec<Candidate> = hits
            .into_iter()
            .filter_map(|hit| {
                self.passages.get(hit.position).map(|text| Candidate {
                    position: hit.position,
                    similarity: hit.score,
                    text: text.to_string(),
                })
            })
            .collect();

        let candidates = deduplicate_candidates(candidates);

        tracing::debug!(
            "Retrieved {} hits, {} distinct candidates for k={}",
            retrieved,
            candidates.len(),
            k
        );

        Ok(candidates)
    }

    /// Answer a question from the top-k passages.
    ///
    /// Always yields exactly one answer: the best span, or the
    /// "No answer found." sentinel with confidence 0.0.
    pub fn ask(&self, question: &str, k: usize) -> std::result::Result<FinalAnswer, PipelineError> {
        let candidates = self.candidates(question, k)?;

        let mut spans = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let span = self.reader.extract_answer(question, &candidate.text)?;
            tracing::trace!(
                "Candidate {} (similarity {:.4}): '{}' {:.4}",
                candidate.position,
                candidate.similarity,
                span.text,
                span.confidence
            );
            spans.push(span);
        }

        let answer = match select_best(spans) {
            Some(best) => FinalAnswer {
                question: question.to_string(),
                answer: best.text,
                confidence_logit: round_confidence(best.confidence),
            },
            None => FinalAnswer::no_answer(question),
        };

        tracing::debug!(
            "Answered from {} candidates: '{}' ({})",
            candidates.len(),
            answer.answer,
            answer.confidence_logit
        );

        Ok(answer)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            passages_count: self.passages.len(),
            index_size: self.index.len(),
            index_kind: self.index.kind(),
        }
    }
}
