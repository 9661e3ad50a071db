//! Retrieval and reading
//!
//! Question → encoder → index search → candidate dedup → span reader per
//! candidate → best-answer selection.

mod deduplication;
mod pipeline;
mod selection;

pub use deduplication::deduplicate_candidates;
pub use pipeline::{Candidate, FinalAnswer, PipelineStats, RetrievalReadingPipeline};
pub use selection::{is_placeholder, round_confidence, select_best, NO_ANSWER};

use crate::encoder::EncoderError;
use crate::index::IndexError;
use crate::reader::ReaderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Question encoding failed: {0}")]
    Encoding(#[from] EncoderError),

    #[error("Index search failed: {0}")]
    Search(#[from] IndexError),

    #[error("Answer extraction failed: {0}")]
    Reading(#[from] ReaderError),
}
