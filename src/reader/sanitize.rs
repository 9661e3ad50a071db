//! Markup removal applied to passages before they are tokenized

use crate::reader::ReaderError;
use regex::Regex;
use std::borrow::Cow;

/// Angle-bracket tags such as `<p>`, `</b>` or `<a href="...">`
const TAG_PATTERN: &str = r"<[^>]+>";

/// Strips markup-like tags from passage text.
///
/// Runs before tokenization, so every token offset the reader later
/// decodes refers to the stripped text.
#[derive(Debug, Clone)]
pub struct MarkupStripper {
    tag: Regex,
}

impl MarkupStripper {
    pub fn new() -> Result<Self, ReaderError> {
        let tag = Regex::new(TAG_PATTERN).map_err(|e| {
            ReaderError::InitializationError(format!("Invalid markup pattern: {}", e))
        })?;
        Ok(Self { tag })
    }

    /// Remove every tag. Text without tags is returned borrowed.
    pub fn strip<'a>(&self, text: &'a str) -> Cow<'a, str> {
        self.tag.replace_all(text, "")
    }
}
