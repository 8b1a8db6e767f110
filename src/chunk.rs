//! Deterministic sentence-bounded chunking of normalized text.
//!
//! Chunking accumulates whole sentences (Unicode sentence boundaries) into
//! chunks no larger than the configured character budget, carrying a
//! sentence-aligned overlap into each successor chunk so neighbouring
//! chunks share context. A single sentence larger than the budget is
//! hard-split at character boundaries with the same overlap stepping.
//!
//! Chunking the same text twice with the same configuration yields
//! identical chunk boundaries and ordering; only the generated chunk ids
//! differ between runs.

use unicode_segmentation::UnicodeSegmentation;

use crate::config::ChunkerConfig;
use crate::types::Chunk;

/// Splits normalized text into ordered, bounded, overlapping chunks.
#[derive(Clone, Debug, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    #[must_use]
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunks `text` into ordered [`Chunk`]s attributed to `source_url`.
    ///
    /// Empty or whitespace-only input yields zero chunks.
    #[must_use]
    pub fn chunk(&self, source_url: &str, text: &str) -> Vec<Chunk> {
        let max_chars = self.config.max_chars.max(1);
        let overlap_chars = self.config.overlap_chars.min(max_chars - 1);

        if text.trim().is_empty() {
            return Vec::new();
        }

        let sentences: Vec<&str> = text
            .split_sentence_bounds()
            .filter(|sentence| !sentence.trim().is_empty())
            .collect();

        let mut pieces: Vec<String> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_len = 0usize;

        for sentence in sentences {
            let sentence_len = sentence.chars().count();

            if sentence_len > max_chars {
                emit(&mut pieces, &mut current, &mut current_len);
                pieces.extend(hard_split(sentence, max_chars, overlap_chars));
                continue;
            }

            if current_len + sentence_len > max_chars && !current.is_empty() {
                let tail = overlap_tail(&current, overlap_chars);
                emit(&mut pieces, &mut current, &mut current_len);
                current_len = tail.iter().map(|s| s.chars().count()).sum();
                current = tail;
            }

            current.push(sentence.to_string());
            current_len += sentence_len;
        }
        emit(&mut pieces, &mut current, &mut current_len);

        pieces
            .into_iter()
            .enumerate()
            .map(|(index, piece)| Chunk::new(source_url, index, piece))
            .collect()
    }
}

fn emit(pieces: &mut Vec<String>, current: &mut Vec<String>, current_len: &mut usize) {
    if !current.is_empty() {
        let text = current.concat().trim().to_string();
        if !text.is_empty() {
            pieces.push(text);
        }
        current.clear();
    }
    *current_len = 0;
}

/// Sentences carried from the end of an emitted chunk into its successor.
///
/// Whole trailing sentences are taken while they fit the overlap budget;
/// when even the last sentence is larger than the budget, its trailing
/// characters are taken instead.
fn overlap_tail(current: &[String], overlap_chars: usize) -> Vec<String> {
    if overlap_chars == 0 {
        return Vec::new();
    }
    let mut tail: Vec<String> = Vec::new();
    let mut total = 0usize;
    for sentence in current.iter().rev() {
        let len = sentence.chars().count();
        if total + len > overlap_chars {
            break;
        }
        total += len;
        tail.push(sentence.clone());
    }
    tail.reverse();
    if tail.is_empty() {
        if let Some(last) = current.last() {
            let chars: Vec<char> = last.chars().collect();
            let start = chars.len().saturating_sub(overlap_chars);
            return vec![chars[start..].iter().collect()];
        }
    }
    tail
}

/// Splits an oversized sentence into fixed windows stepping by
/// `max_chars - overlap_chars`.
fn hard_split(sentence: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let chars: Vec<char> = sentence.chars().collect();
    let step = (max_chars - overlap_chars).max(1);
    let mut windows = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let end = (start + max_chars).min(chars.len());
        let window: String = chars[start..end].iter().collect::<String>().trim().to_string();
        if !window.is_empty() {
            windows.push(window);
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    windows
}
