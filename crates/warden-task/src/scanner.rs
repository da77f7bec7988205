//! Buffered tokenizer driving a [`Splitter`] over a byte source

use std::io::{self, Read};
use std::sync::Arc;

use crate::{Splitter, TokenizeError};

/// Largest token a scanner will buffer before giving up
pub const DEFAULT_MAX_TOKEN_SIZE: usize = 64 * 1024;

const INITIAL_BUFFER_SIZE: usize = 4096;

/// Reads from `R` and yields tokens as cut by a [`Splitter`].
///
/// Unconsumed bytes are kept at the front of an internal buffer that grows
/// up to the configured maximum token size.
pub struct Scanner<R> {
    reader: R,
    splitter: Arc<dyn Splitter>,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    max_token_size: usize,
    eof: bool,
    done: bool,
}

impl<R: Read> Scanner<R> {
    pub fn new(reader: R, splitter: Arc<dyn Splitter>) -> Self {
        Self::with_max_token_size(reader, splitter, DEFAULT_MAX_TOKEN_SIZE)
    }

    pub fn with_max_token_size(reader: R, splitter: Arc<dyn Splitter>, max: usize) -> Self {
        let max = max.max(1);
        Self {
            reader,
            splitter,
            buf: vec![0; INITIAL_BUFFER_SIZE.min(max)],
            start: 0,
            end: 0,
            max_token_size: max,
            eof: false,
            done: false,
        }
    }

    /// Next token, `Ok(None)` once the input is exhausted.
    ///
    /// After an error or the end of input the scanner stays finished.
    pub fn next_token(&mut self) -> Result<Option<Vec<u8>>, TokenizeError> {
        if self.done {
            return Ok(None);
        }
        match self.advance() {
            Ok(None) => {
                self.done = true;
                Ok(None)
            }
            Ok(token) => Ok(token),
            Err(e) => {
                self.done = true;
                Err(e)
            }
        }
    }

    fn advance(&mut self) -> Result<Option<Vec<u8>>, TokenizeError> {
        loop {
            if self.end > self.start || self.eof {
                let data = &self.buf[self.start..self.end];
                let available = data.len();
                let split = self.splitter.split(data, self.eof)?;

                if split.advance > available {
                    return Err(TokenizeError::AdvanceTooFar {
                        advance: split.advance,
                        available,
                    });
                }

                if let Some(token) = split.token {
                    if split.advance == 0 {
                        return Err(TokenizeError::NoProgress { remaining: available });
                    }
                    let token = token.to_vec();
                    self.start += split.advance;
                    return Ok(Some(token));
                }

                self.start += split.advance;

                if self.eof {
                    if self.start < self.end && split.advance == 0 {
                        return Err(TokenizeError::NoProgress {
                            remaining: self.end - self.start,
                        });
                    }
                    if self.start == self.end {
                        return Ok(None);
                    }
                    continue;
                }
            }

            self.fill()?;
        }
    }

    /// Make room and read more input, setting `eof` when the source is drained
    fn fill(&mut self) -> Result<(), TokenizeError> {
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }

        if self.end == self.buf.len() {
            if self.buf.len() >= self.max_token_size {
                return Err(TokenizeError::TooLong {
                    max: self.max_token_size,
                });
            }
            let size = (self.buf.len() * 2).min(self.max_token_size);
            self.buf.resize(size, 0);
        }

        loop {
            match self.reader.read(&mut self.buf[self.end..]) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.end += n;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TokenizeError::Read(e)),
            }
        }
    }
}

impl<R: Read> Iterator for Scanner<R> {
    type Item = Result<Vec<u8>, TokenizeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Delimiters, Lines, Split};

    /// Hands out one byte per read
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.split_first() {
                Some((&b, rest)) if !buf.is_empty() => {
                    buf[0] = b;
                    self.0 = rest;
                    Ok(1)
                }
                _ => Ok(0),
            }
        }
    }

    fn collect(scanner: Scanner<impl Read>) -> Vec<String> {
        scanner
            .map(|t| String::from_utf8(t.unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn lines_from_slice() {
        let scanner = Scanner::new(&b"one\ntwo\r\n\nthree"[..], Arc::new(Lines));
        assert_eq!(collect(scanner), ["one", "two", "", "three"]);
    }

    #[test]
    fn tokens_survive_one_byte_reads() {
        let delims = Arc::new(Delimiters::new(b",;").unwrap());
        let scanner = Scanner::new(Trickle(b"alpha,beta;gamma"), delims);
        assert_eq!(collect(scanner), ["alpha", "beta", "gamma"]);
    }

    #[test]
    fn empty_input_yields_nothing() {
        let mut scanner = Scanner::new(&b""[..], Arc::new(Lines));
        assert!(scanner.next_token().unwrap().is_none());
        assert!(scanner.next_token().unwrap().is_none());
    }

    #[test]
    fn buffer_grows_for_long_tokens() {
        let line = "x".repeat(10_000);
        let input = format!("{}\nshort\n", line);
        let scanner = Scanner::new(input.as_bytes(), Arc::new(Lines));
        assert_eq!(collect(scanner), [line.as_str(), "short"]);
    }

    #[test]
    fn token_too_long() {
        let input = vec![b'a'; 64];
        let mut scanner = Scanner::with_max_token_size(&input[..], Arc::new(Lines), 16);
        assert!(matches!(
            scanner.next_token(),
            Err(TokenizeError::TooLong { max: 16 })
        ));
        // Finished after an error
        assert!(scanner.next_token().unwrap().is_none());
    }

    struct NoProgress;

    impl Splitter for NoProgress {
        fn split<'a>(&self, data: &'a [u8], _at_eof: bool) -> Result<Split<'a>, TokenizeError> {
            Ok(Split::token(0, &data[..0]))
        }
    }

    #[test]
    fn token_without_progress_is_an_error() {
        let mut scanner = Scanner::new(&b"abc"[..], Arc::new(NoProgress));
        assert!(matches!(
            scanner.next_token(),
            Err(TokenizeError::NoProgress { remaining: 3 })
        ));
    }

    struct NeverCuts;

    impl Splitter for NeverCuts {
        fn split<'a>(&self, _data: &'a [u8], _at_eof: bool) -> Result<Split<'a>, TokenizeError> {
            Ok(Split::need_more())
        }
    }

    #[test]
    fn leftover_at_eof_is_an_error() {
        let mut scanner = Scanner::new(&b"abc"[..], Arc::new(NeverCuts));
        assert!(matches!(
            scanner.next_token(),
            Err(TokenizeError::NoProgress { remaining: 3 })
        ));
    }

    struct Overshoot;

    impl Splitter for Overshoot {
        fn split<'a>(&self, data: &'a [u8], _at_eof: bool) -> Result<Split<'a>, TokenizeError> {
            Ok(Split::token(data.len() + 1, data))
        }
    }

    #[test]
    fn advance_past_buffer_is_an_error() {
        let mut scanner = Scanner::new(&b"abc"[..], Arc::new(Overshoot));
        assert!(matches!(
            scanner.next_token(),
            Err(TokenizeError::AdvanceTooFar {
                advance: 4,
                available: 3
            })
        ));
    }

    struct Failing;

    impl Splitter for Failing {
        fn split<'a>(&self, _data: &'a [u8], _at_eof: bool) -> Result<Split<'a>, TokenizeError> {
            Err(TokenizeError::Split("bad input".into()))
        }
    }

    #[test]
    fn splitter_errors_propagate() {
        let mut scanner = Scanner::new(&b"abc"[..], Arc::new(Failing));
        assert!(matches!(scanner.next_token(), Err(TokenizeError::Split(_))));
    }
}
