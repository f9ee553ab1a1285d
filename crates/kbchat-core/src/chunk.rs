//! Boundary-aware text chunker with overlap.
//!
//! Splits extracted document text into [`Chunk`]s no longer than
//! `max_chars` bytes. Each cut is placed at the best boundary inside the
//! window, in order of preference:
//!
//! 1. a paragraph break (`\n\n`),
//! 2. a line break or sentence end (`.`, `!`, `?` followed by whitespace),
//! 3. a space,
//! 4. a hard cut at `max_chars` (snapped to a UTF-8 char boundary).
//!
//! Consecutive chunks share up to `overlap_chars` bytes so a fact that
//! straddles a cut is retrievable from either side. Every chunk is an exact
//! slice of the input, so [`reassemble`] recovers the original text.
//!
//! Chunk IDs are UUIDv5 values derived from the document ID and the
//! sequence index, so re-chunking the same text yields the same IDs.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::ChunkError;
use crate::models::Chunk;

/// Approximate chars-per-token ratio used to turn token budgets into bytes.
pub const CHARS_PER_TOKEN: usize = 4;

/// Chunk size limits, in bytes of UTF-8 text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl ChunkParams {
    pub fn from_tokens(max_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            max_chars: max_tokens * CHARS_PER_TOKEN,
            overlap_chars: overlap_tokens * CHARS_PER_TOKEN,
        }
    }

    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.max_chars == 0 {
            return Err(ChunkError::InvalidParams("max_chars must be > 0".into()));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(ChunkError::InvalidParams(format!(
                "overlap ({}) must be smaller than max_chars ({})",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

/// Split `text` into overlapping chunks with contiguous indices from 0.
///
/// Whitespace-only input is rejected with [`ChunkError::EmptyInput`].
pub fn chunk_text(
    document_id: &str,
    text: &str,
    params: ChunkParams,
) -> Result<Vec<Chunk>, ChunkError> {
    params.validate()?;
    if text.trim().is_empty() {
        return Err(ChunkError::EmptyInput);
    }

    let len = text.len();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        if len - start <= params.max_chars {
            chunks.push(make_chunk(document_id, chunks.len(), text, start, len));
            break;
        }

        let mut window_end = floor_char_boundary(text, start + params.max_chars);
        if window_end <= start {
            // max_chars is narrower than a single character
            window_end = ceil_char_boundary(text, start + 1);
        }

        // The cut must leave room for the overlap so the next chunk advances.
        let min_cut = start + params.overlap_chars + 1;
        let end = find_cut(text, start, window_end, min_cut);
        chunks.push(make_chunk(document_id, chunks.len(), text, start, end));

        start = next_start(text, start, end, params.overlap_chars);
    }

    Ok(chunks)
}

/// Rebuild the chunked text by dropping each chunk's overlap with its predecessor.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    let mut prev_end = 0usize;
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            out.push_str(&chunk.text);
        } else {
            let overlap = prev_end.saturating_sub(chunk.start).min(chunk.text.len());
            out.push_str(&chunk.text[overlap..]);
        }
        prev_end = chunk.end;
    }
    out
}

fn find_cut(text: &str, start: usize, window_end: usize, min_cut: usize) -> usize {
    let window = &text[start..window_end];
    let accept = |rel: usize| {
        let abs = start + rel;
        (abs >= min_cut && abs <= window_end).then_some(abs)
    };

    if let Some(cut) = window.rfind("\n\n").and_then(|p| accept(p + 2)) {
        return cut;
    }

    if let Some(cut) = last_sentence_cut(window).and_then(accept) {
        return cut;
    }

    if let Some(cut) = window.rfind(' ').and_then(|p| accept(p + 1)) {
        return cut;
    }

    window_end
}

/// Offset just past the last line break or sentence-ending punctuation + whitespace.
fn last_sentence_cut(window: &str) -> Option<usize> {
    let mut following: Option<char> = None;
    for (i, c) in window.char_indices().rev() {
        if c == '\n' {
            return Some(i + 1);
        }
        if matches!(c, '.' | '!' | '?') {
            if let Some(next) = following {
                if next.is_whitespace() {
                    return Some(i + c.len_utf8() + next.len_utf8());
                }
            }
        }
        following = Some(c);
    }
    None
}

fn next_start(text: &str, start: usize, end: usize, overlap: usize) -> usize {
    if overlap == 0 {
        return end;
    }
    let mut next = floor_char_boundary(text, end.saturating_sub(overlap));
    // Begin the overlap on a word boundary when one is available.
    if let Some((p, ws)) = text[next..end].char_indices().find(|(_, c)| c.is_whitespace()) {
        let candidate = next + p + ws.len_utf8();
        if candidate < end {
            next = candidate;
        }
    }
    if next <= start {
        end
    } else {
        next
    }
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// Deterministic chunk ID for a document position.
pub fn chunk_id(document_id: &str, index: u32) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}:{}", document_id, index).as_bytes(),
    )
    .to_string()
}

fn make_chunk(document_id: &str, index: usize, text: &str, start: usize, end: usize) -> Chunk {
    let slice = &text[start..end];
    let mut hasher = Sha256::new();
    hasher.update(slice.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    let index = index as u32;

    Chunk {
        id: chunk_id(document_id, index),
        document_id: document_id.to_string(),
        sequence_index: index,
        text: slice.to_string(),
        start,
        end,
        hash,
    }
}
