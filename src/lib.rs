//! QueryMind - Open-domain question answering
//!
//! Answers natural-language questions from a fixed passage corpus: a question
//! encoder and a prebuilt vector index retrieve candidate passages, and an
//! extractive reader picks the best answer span among them.

pub mod cli;
pub mod config;
pub mod corpus;
pub mod encoder;
pub mod error;
pub mod index;
pub mod onnx;
pub mod reader;
pub mod retrieval;
pub mod server;
pub mod storage;

pub use error::{QueryMindError, Result};
