#[cfg(test)]
mod tests;

pub mod keywords;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{RagError, Result};

pub use keywords::{PartOfSpeech, extract_keywords, tag_word};

/// Granularity used when splitting raw text into tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenUnit {
    #[default]
    Word,
    Sentence,
    Document,
}

/// Whether chunks are stored as plain text or also tagged with keywords
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStrategy {
    #[default]
    FullText,
    ExtractKeywords,
}

impl ProcessingStrategy {
    #[inline]
    pub const fn extracts_keywords(self) -> bool {
        matches!(self, Self::ExtractKeywords)
    }
}

/// Configuration for token windowing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum number of tokens per chunk
    pub max_tokens: usize,
    /// Tokens shared between consecutive chunks
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_tokens: 256,
            overlap: 32,
        }
    }
}

impl ChunkingConfig {
    /// Build a config, clamping `overlap` into `[0, max_tokens - 1]`
    #[inline]
    pub fn new(max_tokens: usize, overlap: usize) -> Result<Self> {
        if max_tokens == 0 {
            return Err(RagError::InvalidInput(
                "max_tokens must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            max_tokens,
            overlap: overlap.min(max_tokens - 1),
        })
    }

    /// Overlap actually applied when windowing. Deserialized configs may
    /// carry an out-of-range value, so the clamp is repeated here.
    #[inline]
    pub fn effective_overlap(&self) -> usize {
        self.overlap.min(self.max_tokens.saturating_sub(1))
    }

    /// Number of tokens the window advances by
    #[inline]
    pub fn step(&self) -> usize {
        self.max_tokens.max(1) - self.effective_overlap()
    }
}

/// Split `text` into lowercased tokens at the requested granularity.
///
/// Leading and trailing whitespace and punctuation are trimmed from every
/// token and empty tokens are dropped, so empty input yields no tokens.
#[inline]
pub fn tokenize(text: &str, unit: TokenUnit) -> Vec<String> {
    let raw: Vec<&str> = match unit {
        TokenUnit::Word => text
            .split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '\u{2019}'))
            .collect(),
        TokenUnit::Sentence => split_sentences(text),
        TokenUnit::Document => vec![text],
    };

    raw.into_iter()
        .filter_map(normalize_token)
        .collect::<Vec<_>>()
}

fn normalize_token(token: &str) -> Option<String> {
    let trimmed = token.trim_matches(|c: char| !c.is_alphanumeric());
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Split on sentence terminators followed by whitespace, and on blank lines
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        let next = chars.peek().map(|&(_, n)| n);
        let terminator = matches!(c, '.' | '!' | '?' | '\u{3002}')
            && next.is_none_or(char::is_whitespace);
        let paragraph_break = c == '\n' && next == Some('\n');

        if terminator || paragraph_break {
            let end = idx + c.len_utf8();
            if let Some(sentence) = text.get(start..end) {
                sentences.push(sentence);
            }
            start = end;
        }
    }

    if let Some(rest) = text.get(start..) {
        sentences.push(rest);
    }

    sentences
}

/// Group tokens into overlapping windows joined by single spaces.
///
/// A sequence that fits in one window is returned whole. Otherwise the window
/// advances by `max_tokens - overlap` and stops as soon as it reaches the end
/// of the sequence, so the tail is never dropped and no empty chunk is emitted.
#[inline]
pub fn chunk_tokens<S: AsRef<str>>(tokens: &[S], config: &ChunkingConfig) -> Vec<String> {
    if tokens.is_empty() {
        return Vec::new();
    }

    let max_tokens = config.max_tokens.max(1);
    if tokens.len() <= max_tokens {
        return vec![tokens.iter().map(AsRef::as_ref).join(" ")];
    }

    let step = config.step();
    let mut chunks = Vec::with_capacity(tokens.len().div_ceil(step));
    let mut start = 0;

    loop {
        let end = (start + max_tokens).min(tokens.len());
        let window = tokens.get(start..end).unwrap_or_default();
        chunks.push(window.iter().map(AsRef::as_ref).join(" "));

        if end == tokens.len() {
            break;
        }
        start += step;
    }

    debug!(
        "Chunked {} tokens into {} chunks (max {}, overlap {})",
        tokens.len(),
        chunks.len(),
        max_tokens,
        config.effective_overlap()
    );

    chunks
}

/// Tokenize and window a text in one go
#[inline]
pub fn chunk_text(text: &str, unit: TokenUnit, config: &ChunkingConfig) -> Vec<String> {
    chunk_tokens(&tokenize(text, unit), config)
}
