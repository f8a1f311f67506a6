//! Inbound text reassembly
//!
//! Notifications arrive in transport-sized pieces that do not line up with
//! message boundaries. The buffer accumulates characters until the receive
//! separator shows up and then hands the completed message out.
//!
//! The buffer does no logging of its own. Conditions worth reporting are
//! queued as [`ReassemblyNotice`]s for the owner to drain.

use core::fmt;

use smallvec::SmallVec;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Characters buffered without a separator before the message is discarded
pub const MAX_BUFFERED_CHARS: usize = 16 * 1024;

/// Messages completed by a single feed
pub type Messages = SmallVec<[String; 2]>;

// ----------------------------------------------------------------------------
// Notices
// ----------------------------------------------------------------------------

/// Something the buffer had to repair or drop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyNotice {
    /// Bytes that were not valid UTF-8, replaced with U+FFFD
    InvalidUtf8(Vec<u8>),
    /// A message outgrew the buffer; everything up to its separator is dropped
    Overflow { limit: usize },
}

impl fmt::Display for ReassemblyNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUtf8(bytes) => write!(
                f,
                "Invalid UTF-8 sequence in notification: {}",
                hex::encode(bytes)
            ),
            Self::Overflow { limit } => write!(
                f,
                "Receive buffer exceeded {} characters without a separator, discarding message",
                limit
            ),
        }
    }
}

// ----------------------------------------------------------------------------
// Reassembly Buffer
// ----------------------------------------------------------------------------

/// Accumulates inbound text until a separator delimits a complete message
#[derive(Debug, Clone)]
pub struct ReassemblyBuffer {
    separator: char,
    buffer: String,
    buffered_chars: usize,
    /// Set after an overflow until the separator ending that message
    discarding: bool,
    /// Trailing bytes of a UTF-8 sequence split across notifications
    partial: Vec<u8>,
    notices: Vec<ReassemblyNotice>,
}

impl ReassemblyBuffer {
    /// Create an empty buffer delimited by `separator`
    pub fn new(separator: char) -> Self {
        Self {
            separator,
            buffer: String::new(),
            buffered_chars: 0,
            discarding: false,
            partial: Vec::new(),
            notices: Vec::new(),
        }
    }

    /// Current separator
    pub fn separator(&self) -> char {
        self.separator
    }

    /// Change the separator; text already buffered is kept
    pub fn set_separator(&mut self, separator: char) {
        self.separator = separator;
    }

    /// Text received since the last separator
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.partial.is_empty() && !self.discarding
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.buffered_chars = 0;
        self.discarding = false;
        self.partial.clear();
    }

    /// Notices queued since the last call
    pub fn take_notices(&mut self) -> Vec<ReassemblyNotice> {
        core::mem::take(&mut self.notices)
    }

    /// Feed decoded text, returning every message it completes
    ///
    /// Empty messages (two separators in a row) are skipped. A message longer
    /// than [`MAX_BUFFERED_CHARS`] is never delivered, not even in part.
    pub fn feed(&mut self, chunk: &str) -> Messages {
        let mut messages = Messages::new();

        for c in chunk.chars() {
            if c == self.separator {
                let message = core::mem::take(&mut self.buffer);
                self.buffered_chars = 0;
                if !core::mem::take(&mut self.discarding) && !message.is_empty() {
                    messages.push(message);
                }
                continue;
            }

            if self.discarding {
                continue;
            }

            if self.buffered_chars >= MAX_BUFFERED_CHARS {
                self.notices.push(ReassemblyNotice::Overflow {
                    limit: MAX_BUFFERED_CHARS,
                });
                self.buffer = String::new();
                self.buffered_chars = 0;
                self.discarding = true;
                continue;
            }

            self.buffer.push(c);
            self.buffered_chars += 1;
        }

        messages
    }

    /// Feed raw notification bytes
    ///
    /// A UTF-8 sequence cut at the end of `bytes` is held back until the next
    /// call completes it. Invalid sequences are replaced with U+FFFD.
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Messages {
        let mut input = core::mem::take(&mut self.partial);
        input.extend_from_slice(bytes);

        let mut text = String::with_capacity(input.len());
        let mut rest = input.as_slice();

        loop {
            match core::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(err) => {
                    let (valid, tail) = rest.split_at(err.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            self.notices
                                .push(ReassemblyNotice::InvalidUtf8(tail[..len].to_vec()));
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[len..];
                        }
                        None => {
                            rest = tail;
                            break;
                        }
                    }
                }
            }
        }

        self.partial = rest.to_vec();
        self.feed(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_characters_one_at_a_time() {
        let mut buffer = ReassemblyBuffer::new('\n');
        assert!(buffer.feed("h").is_empty());
        assert!(buffer.feed("i").is_empty());
        let messages = buffer.feed("\n");

        assert_eq!(messages.as_slice(), ["hi"]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.pending(), "");
    }

    #[test]
    fn test_several_messages_in_one_chunk() {
        let mut buffer = ReassemblyBuffer::new('\n');
        let messages = buffer.feed("one\ntwo\nthr");
        assert_eq!(messages.as_slice(), ["one", "two"]);
        assert_eq!(buffer.pending(), "thr");

        let messages = buffer.feed("ee\n");
        assert_eq!(messages.as_slice(), ["three"]);
    }

    #[test]
    fn test_empty_messages_are_skipped() {
        let mut buffer = ReassemblyBuffer::new('\n');
        let messages = buffer.feed("\n\nok\n\n");
        assert_eq!(messages.as_slice(), ["ok"]);
    }

    #[test]
    fn test_custom_separator() {
        let mut buffer = ReassemblyBuffer::new(';');
        let messages = buffer.feed("a\nb;c");
        assert_eq!(messages.as_slice(), ["a\nb"]);
        assert_eq!(buffer.pending(), "c");
    }

    #[test]
    fn test_clear_drops_fragment() {
        let mut buffer = ReassemblyBuffer::new('\n');
        buffer.feed("stale");
        buffer.clear();
        let messages = buffer.feed("fresh\n");
        assert_eq!(messages.as_slice(), ["fresh"]);
    }

    #[test]
    fn test_utf8_sequence_split_across_notifications() {
        let mut buffer = ReassemblyBuffer::new('\n');
        let bytes = "pivo 🍺\n".as_bytes();
        // Cut inside the four-byte emoji
        let (head, tail) = bytes.split_at(7);

        assert!(buffer.feed_bytes(head).is_empty());
        assert!(!buffer.is_empty());
        let messages = buffer.feed_bytes(tail);
        assert_eq!(messages.as_slice(), ["pivo 🍺"]);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut buffer = ReassemblyBuffer::new('\n');
        let messages = buffer.feed_bytes(&[b'a', 0xFF, b'b', b'\n']);
        assert_eq!(messages.as_slice(), ["a\u{FFFD}b"]);
        assert_eq!(
            buffer.take_notices(),
            vec![ReassemblyNotice::InvalidUtf8(vec![0xFF])]
        );
        assert!(buffer.take_notices().is_empty());
    }

    #[test]
    fn test_message_at_limit_is_delivered() {
        let mut buffer = ReassemblyBuffer::new('\n');
        let message = "x".repeat(MAX_BUFFERED_CHARS);
        let messages = buffer.feed(&format!("{}\n", message));
        assert_eq!(messages.as_slice(), [message]);
        assert!(buffer.take_notices().is_empty());
    }

    #[test]
    fn test_oversized_message_is_discarded_whole() {
        let mut buffer = ReassemblyBuffer::new('\n');
        let oversized = "x".repeat(MAX_BUFFERED_CHARS + 5);

        // Arrives in small pieces, as it would over the air
        let mut delivered = Vec::new();
        for piece in oversized.as_bytes().chunks(19) {
            let piece = core::str::from_utf8(piece).unwrap();
            delivered.extend(buffer.feed(piece));
        }
        delivered.extend(buffer.feed("\nnext\n"));

        assert_eq!(delivered, vec!["next".to_string()]);
        assert_eq!(
            buffer.take_notices(),
            vec![ReassemblyNotice::Overflow {
                limit: MAX_BUFFERED_CHARS
            }]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_clear_ends_discarding() {
        let mut buffer = ReassemblyBuffer::new('\n');
        buffer.feed(&"x".repeat(MAX_BUFFERED_CHARS + 1));
        assert!(!buffer.is_empty());

        buffer.clear();
        let messages = buffer.feed("fresh\n");
        assert_eq!(messages.as_slice(), ["fresh"]);
    }
}
