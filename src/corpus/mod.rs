//! Passage corpus
//!
//! An immutable, position-addressed list of passage texts. Position `i` is
//! the passage whose vector sits at position `i` of the vector index.

use crate::error::{QueryMindError, Result};
use std::path::Path;

/// Ordered, read-only passage texts
#[derive(Debug, Clone, Default)]
pub struct PassageStore {
    passages: Vec<String>,
}

impl PassageStore {
    pub fn new(passages: Vec<String>) -> Self {
        Self { passages }
    }

    /// Load passages from a JSON array of strings
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read(path).map_err(|e| QueryMindError::Io {
            source: e,
            context: format!("Failed to read passages file: {:?}", path),
        })?;

        let passages: Vec<String> =
            serde_json::from_slice(&content).map_err(|e| QueryMindError::Json {
                source: e,
                context: format!("Passages file {:?} is not a JSON string array", path),
            })?;

        tracing::info!("Loaded {} passages from {:?}", passages.len(), path);

        Ok(Self { passages })
    }

    /// Bounds-checked lookup. Negative or out-of-range positions yield `None`.
    pub fn get(&self, position: i64) -> Option<&str> {
        usize::try_from(position)
            .ok()
            .and_then(|i| self.passages.get(i))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

impl FromIterator<String> for PassageStore {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
