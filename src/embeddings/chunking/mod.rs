
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{RagError, Result};

/// Break points in priority order. When none fits inside a window the split
/// falls back to an arbitrary character position.
const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// A window of a document's text ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// The chunk text, a contiguous substring of the source text
    pub content: String,
    /// Zero-based position of this chunk within its document
    pub chunk_index: usize,
    /// Byte offset where the chunk starts in the source text
    pub start: usize,
    /// Byte offset one past the chunk's last byte in the source text
    pub end: usize,
}

/// Configuration for text chunking, measured in characters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum number of characters per chunk
    pub chunk_size: usize,
    /// Number of characters repeated between consecutive chunks
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkingConfig {
    #[inline]
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        let config = Self {
            chunk_size,
            chunk_overlap,
        };
        config.validate()?;
        Ok(config)
    }

    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::InvalidConfiguration(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::InvalidConfiguration(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Split `text` into overlapping windows of at most `chunk_size` characters
#[inline]
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>> {
    let config = ChunkingConfig::new(chunk_size, overlap)?;
    Ok(chunk_text(text, &config)?
        .into_iter()
        .map(|chunk| chunk.content)
        .collect())
}

/// Split `text` into overlapping windows, keeping each window's position in the source.
///
/// Every window holds at most `chunk_size` characters and consecutive windows share
/// exactly `chunk_overlap` characters. A window ends right after the last paragraph
/// break that fits, else the last line break, else the last space, else at the size
/// limit. A break is only taken if it leaves the next window starting past the
/// current one.
#[inline]
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Result<Vec<TextChunk>> {
    config.validate()?;

    if text.is_empty() {
        return Ok(Vec::new());
    }

    // Byte offset of every character boundary, including the end of the text
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = boundaries.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        if char_count - start <= config.chunk_size {
            chunks.push(make_chunk(text, &boundaries, start, char_count, chunks.len()));
            break;
        }

        let end = find_break(text, &boundaries, start, config);
        chunks.push(make_chunk(text, &boundaries, start, end, chunks.len()));
        start = end - config.chunk_overlap;
    }

    debug!(
        "Split {} characters into {} chunks (size {}, overlap {})",
        char_count,
        chunks.len(),
        config.chunk_size,
        config.chunk_overlap
    );

    Ok(chunks)
}

/// Find the character index at which the window starting at `start` should end
fn find_break(text: &str, boundaries: &[usize], start: usize, config: &ChunkingConfig) -> usize {
    let limit = start + config.chunk_size;
    let window_start = boundaries[start];
    let window = &text[window_start..boundaries[limit]];
    let earliest_end = boundaries[start + config.chunk_overlap + 1];

    for separator in SEPARATORS {
        let Some(position) = window.rfind(separator) else {
            continue;
        };
        let end_byte = window_start + position + separator.len();
        if end_byte < earliest_end {
            continue;
        }
        if let Ok(end) = boundaries.binary_search(&end_byte) {
            return end;
        }
    }

    limit
}

fn make_chunk(
    text: &str,
    boundaries: &[usize],
    start: usize,
    end: usize,
    chunk_index: usize,
) -> TextChunk {
    let (start_byte, end_byte) = (boundaries[start], boundaries[end]);
    TextChunk {
        content: text[start_byte..end_byte].to_string(),
        chunk_index,
        start: start_byte,
        end: end_byte,
    }
}
