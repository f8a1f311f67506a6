//! Outbound text chunking
//!
//! Splits a message into pieces that each fit a single characteristic write.
//! The send separator is appended before splitting, and chunk boundaries only
//! ever fall between characters, so every chunk is valid UTF-8 on its own.

use smallvec::SmallVec;

use crate::errors::{Result, ValidationError};

/// Chunks of one outbound message (most messages fit a handful of writes)
pub type Chunks = SmallVec<[String; 4]>;

/// Splits outbound messages into transport-sized chunks
#[derive(Debug, Clone)]
pub struct ChunkSplitter {
    max_len: usize,
    separator: char,
}

impl ChunkSplitter {
    /// Create a splitter writing at most `max_len` bytes per chunk
    pub fn new(max_len: usize, separator: char) -> Result<Self> {
        if max_len == 0 {
            return Err(ValidationError::ChunkLength.into());
        }
        Ok(Self { max_len, separator })
    }

    /// Maximum bytes per chunk
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Separator appended to every message
    pub fn separator(&self) -> char {
        self.separator
    }

    /// Append the separator and split the result into chunks
    ///
    /// Every chunk is at most `max_len` bytes, except when a single character
    /// is wider than `max_len`; such a character is written as a chunk of its
    /// own rather than being cut.
    pub fn split(&self, message: &str) -> Chunks {
        let mut framed = String::with_capacity(message.len() + self.separator.len_utf8());
        framed.push_str(message);
        framed.push(self.separator);

        let mut chunks = Chunks::new();
        let mut start = 0;
        let mut end = 0;

        for (offset, ch) in framed.char_indices() {
            let next = offset + ch.len_utf8();
            if next - start > self.max_len && end > start {
                chunks.push(framed[start..end].to_string());
                start = end;
            }
            end = next;
        }

        if end > start {
            chunks.push(framed[start..end].to_string());
        }

        chunks
    }
}
