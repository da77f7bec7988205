//! Split functions: the tokenization boundary between terminal bytes and
//! `Output` events
//!
//! A [`Splitter`] is applied repeatedly to the unconsumed part of the byte
//! stream. It either returns a token together with the number of bytes it
//! consumed, or consumes nothing and returns no token to ask for more input.
//! Once the stream has ended (`at_eof`), any unterminated remainder forms one
//! final token.

use regex::bytes::Regex;
use std::fmt;

use crate::{SplitConfigError, TokenizeError};

/// Result of one split step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split<'a> {
    /// Bytes consumed from the front of the buffer
    pub advance: usize,
    /// Token extracted, if any
    pub token: Option<&'a [u8]>,
}

impl<'a> Split<'a> {
    /// Consume nothing and wait for more input
    pub fn need_more() -> Self {
        Self {
            advance: 0,
            token: None,
        }
    }

    pub fn token(advance: usize, token: &'a [u8]) -> Self {
        Self {
            advance,
            token: Some(token),
        }
    }
}

/// Tokenizer applied to a task's output stream.
///
/// Implementations must be pure functions of their configuration and input so
/// that one instance can be shared across respawns and tasks.
pub trait Splitter: Send + Sync {
    fn split<'a>(&self, data: &'a [u8], at_eof: bool) -> Result<Split<'a>, TokenizeError>;
}

/// Newline-delimited tokens with a trailing `\r` removed
#[derive(Debug, Clone, Copy, Default)]
pub struct Lines;

impl Splitter for Lines {
    fn split<'a>(&self, data: &'a [u8], at_eof: bool) -> Result<Split<'a>, TokenizeError> {
        if at_eof && data.is_empty() {
            return Ok(Split::need_more());
        }
        if let Some(i) = data.iter().position(|&b| b == b'\n') {
            return Ok(Split::token(i + 1, drop_cr(&data[..i])));
        }
        if at_eof {
            return Ok(Split::token(data.len(), drop_cr(data)));
        }
        Ok(Split::need_more())
    }
}

fn drop_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Split on any byte of a fixed delimiter set.
///
/// The token is the run before the earliest delimiter; the delimiter itself
/// is consumed but not included.
#[derive(Clone)]
pub struct Delimiters {
    table: [bool; 256],
}

impl Delimiters {
    pub fn new(bytes: &[u8]) -> Result<Self, SplitConfigError> {
        if bytes.is_empty() {
            return Err(SplitConfigError::EmptyDelimiters);
        }
        let mut table = [false; 256];
        for &b in bytes {
            table[b as usize] = true;
        }
        Ok(Self { table })
    }

    pub fn contains(&self, byte: u8) -> bool {
        self.table[byte as usize]
    }
}

impl fmt::Debug for Delimiters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes: Vec<u8> = (0..=255u8).filter(|&b| self.contains(b)).collect();
        f.debug_struct("Delimiters")
            .field("bytes", &bytes.escape_ascii().to_string())
            .finish()
    }
}

impl Splitter for Delimiters {
    fn split<'a>(&self, data: &'a [u8], at_eof: bool) -> Result<Split<'a>, TokenizeError> {
        if at_eof && data.is_empty() {
            return Ok(Split::need_more());
        }
        if let Some(i) = data.iter().position(|&b| self.contains(b)) {
            return Ok(Split::token(i + 1, &data[..i]));
        }
        if at_eof {
            return Ok(Split::token(data.len(), data));
        }
        Ok(Split::need_more())
    }
}

/// Split on a regular-expression delimiter.
///
/// The first match found in the buffer is cut immediately, even when it ends
/// at the end of the buffer and more input could extend it: a pattern like
/// `\r\n|\n|\r` may therefore yield an empty token when `\r` and `\n` arrive
/// in separate reads. Holding the match back would delay every line by a
/// full read. Alternatives are tried in pattern order (leftmost-first), so
/// list longer delimiters first.
#[derive(Debug, Clone)]
pub struct RegexDelimiter {
    pattern: Regex,
}

impl RegexDelimiter {
    /// Compile `pattern`. Patterns that can match the empty string are
    /// rejected since they would never consume input.
    pub fn new(pattern: &str) -> Result<Self, SplitConfigError> {
        let regex = Regex::new(pattern)?;
        if regex.is_match(b"") {
            return Err(SplitConfigError::EmptyMatch(pattern.to_string()));
        }
        Ok(Self { pattern: regex })
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

impl Splitter for RegexDelimiter {
    fn split<'a>(&self, data: &'a [u8], at_eof: bool) -> Result<Split<'a>, TokenizeError> {
        if at_eof && data.is_empty() {
            return Ok(Split::need_more());
        }
        if let Some(m) = self.pattern.find(data) {
            return Ok(Split::token(m.end(), &data[..m.start()]));
        }
        if at_eof {
            return Ok(Split::token(data.len(), data));
        }
        Ok(Split::need_more())
    }
}
