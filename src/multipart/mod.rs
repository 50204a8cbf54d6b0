// SPDX-License-Identifier: MIT

//! RFC 7578 multipart/form-data tokenizer
//!
//! [`MultipartReader`] walks a `multipart/form-data` body incrementally. It
//! never holds more than one read chunk plus one delimiter of body data, so a
//! multi-gigabyte upload is tokenized in constant memory.
//!
//! # Example
//! ```rust
//! use formdrop::multipart::{extract_boundary, MultipartConfig, MultipartReader};
//! use std::io::Cursor;
//!
//! # fn main() -> Result<(), formdrop::error::MultipartError> {
//! let body = b"--XyZ\r\n\
//!     Content-Disposition: form-data; name=\"greeting\"\r\n\
//!     \r\n\
//!     hello\r\n\
//!     --XyZ--\r\n";
//! let boundary = extract_boundary("multipart/form-data; boundary=XyZ")?;
//! let mut reader = MultipartReader::new(Cursor::new(&body[..]), &boundary, MultipartConfig::default())?;
//!
//! while let Some(part) = reader.next_part()? {
//!     let mut value = Vec::new();
//!     let mut chunk = [0u8; 64];
//!     loop {
//!         let n = reader.read_body(&mut chunk)?;
//!         if n == 0 {
//!             break;
//!         }
//!         value.extend_from_slice(&chunk[..n]);
//!     }
//!     assert_eq!(part.field_name(), "greeting");
//!     assert_eq!(value, b"hello");
//! }
//! # Ok(())
//! # }
//! ```

pub mod headers;

pub use headers::{ContentDisposition, PartHeaders};

use crate::error::MultipartError;
use log::trace;
use std::io::{ErrorKind, Read};

const DEFAULT_MAX_HEADERS_SIZE: usize = 8 * 1024; // 8KB for part headers
const DEFAULT_READ_CHUNK_SIZE: usize = 16 * 1024;
const MIN_BOUNDARY_LENGTH: usize = 1;
const MAX_BOUNDARY_LENGTH: usize = 70; // RFC 2046 limit
const MAX_BOUNDARY_LINE_PADDING: usize = 1024;

/// Tokenizer configuration
#[derive(Debug, Clone)]
pub struct MultipartConfig {
    /// Maximum size for one part's header block
    pub max_headers_size: usize,
    /// Maximum number of header lines per part (None = unbounded)
    pub max_header_pairs: Option<usize>,
    /// Bytes requested from the underlying reader per read call
    pub read_chunk_size: usize,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            max_headers_size: DEFAULT_MAX_HEADERS_SIZE,
            max_header_pairs: None,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

/// Check whether a Content-Type value announces multipart/form-data.
pub fn is_multipart(content_type: &str) -> bool {
    content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("multipart/form-data")
}

/// Extract the boundary parameter from a Content-Type header.
pub fn extract_boundary(content_type: &str) -> Result<String, MultipartError> {
    if !is_multipart(content_type) {
        return Err(MultipartError::malformed_boundary(format!(
            "Unsupported content type: {content_type}"
        )));
    }

    for param in content_type.split(';').skip(1) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("boundary") {
            // Boundary value keeps its original case
            let boundary = value.trim().trim_matches('"');
            validate_boundary(boundary)?;
            return Ok(boundary.to_string());
        }
    }

    Err(MultipartError::malformed_boundary("Boundary not found"))
}

/// Validate the boundary string against RFC 2046
pub fn validate_boundary(boundary: &str) -> Result<(), MultipartError> {
    if boundary.len() < MIN_BOUNDARY_LENGTH {
        return Err(MultipartError::malformed_boundary("Boundary not found"));
    }

    if boundary.len() > MAX_BOUNDARY_LENGTH {
        return Err(MultipartError::malformed_boundary("Boundary too long"));
    }

    if !boundary
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "'()+_,-./:=? ".contains(c))
        || boundary.ends_with(' ')
    {
        return Err(MultipartError::malformed_boundary(
            "Boundary contains invalid characters",
        ));
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Preamble,
    Delimiter,
    Headers,
    Body,
    Finished,
}

/// Incremental multipart tokenizer over any `Read`.
///
/// Call [`next_part`](Self::next_part) to advance to a part's headers and
/// [`read_body`](Self::read_body) to stream that part's body. Unread body
/// bytes are skipped on the next `next_part` call.
#[derive(Debug)]
pub struct MultipartReader<R> {
    reader: R,
    /// `\r\n--boundary`
    delimiter: Vec<u8>,
    buffer: Vec<u8>,
    pos: usize,
    state: State,
    reader_exhausted: bool,
    config: MultipartConfig,
    parts_read: usize,
}

impl<R: Read> MultipartReader<R> {
    pub fn new(reader: R, boundary: &str, config: MultipartConfig) -> Result<Self, MultipartError> {
        validate_boundary(boundary)?;

        let mut delimiter = Vec::with_capacity(boundary.len() + 4);
        delimiter.extend_from_slice(b"\r\n--");
        delimiter.extend_from_slice(boundary.as_bytes());

        Ok(Self {
            reader,
            delimiter,
            // The body may open with the delimiter directly; seed the line break
            buffer: b"\r\n".to_vec(),
            pos: 0,
            state: State::Preamble,
            reader_exhausted: false,
            config,
            parts_read: 0,
        })
    }

    /// Number of parts whose headers have been returned so far.
    pub fn parts_read(&self) -> usize {
        self.parts_read
    }

    /// True once the closing delimiter has been consumed.
    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// Advance to the next part and return its headers, `None` after the closing delimiter.
    pub fn next_part(&mut self) -> Result<Option<PartHeaders>, MultipartError> {
        match self.state {
            State::Finished => return Ok(None),
            State::Preamble => self.skip_preamble()?,
            State::Body => {
                let skipped = self.drain_body()?;
                if skipped > 0 {
                    trace!("Skipped {skipped} unread body bytes");
                }
            }
            State::Delimiter | State::Headers => {}
        }

        if self.state == State::Delimiter && !self.consume_delimiter_line()? {
            return Ok(None);
        }

        let headers = self.read_headers()?;
        self.parts_read += 1;
        Ok(Some(headers))
    }

    /// Read from the current part's body. Returns `Ok(0)` at the end of the part.
    pub fn read_body(&mut self, out: &mut [u8]) -> Result<usize, MultipartError> {
        if self.state != State::Body || out.is_empty() {
            return Ok(0);
        }

        let keep = self.delimiter.len() - 1;
        loop {
            let available = self.buffer.len() - self.pos;

            if let Some(idx) = find_bytes(&self.buffer[self.pos..], &self.delimiter) {
                if idx == 0 {
                    self.pos += self.delimiter.len();
                    self.state = State::Delimiter;
                    return Ok(0);
                }
                return Ok(self.copy_out(idx, out));
            }

            // Bytes that cannot be the start of a delimiter are safe to hand out
            let safe = available.saturating_sub(keep);
            if safe > 0 {
                return Ok(self.copy_out(safe, out));
            }

            if !self.fill_buffer()? {
                return Err(MultipartError::UnexpectedEnd);
            }
        }
    }

    /// Discard the remainder of the current part's body, returning the byte count.
    pub fn drain_body(&mut self) -> Result<u64, MultipartError> {
        let mut scratch = [0u8; 8192];
        let mut total = 0u64;
        loop {
            let n = self.read_body(&mut scratch)?;
            if n == 0 {
                return Ok(total);
            }
            total += n as u64;
        }
    }

    fn copy_out(&mut self, limit: usize, out: &mut [u8]) -> usize {
        let n = limit.min(out.len());
        out[..n].copy_from_slice(&self.buffer[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    /// Fill internal buffer with more data from reader
    fn fill_buffer(&mut self) -> Result<bool, MultipartError> {
        if self.reader_exhausted {
            return Ok(false);
        }

        if self.pos > 0 {
            self.buffer.drain(..self.pos);
            self.pos = 0;
        }

        let start = self.buffer.len();
        self.buffer.resize(start + self.config.read_chunk_size, 0);

        loop {
            match self.reader.read(&mut self.buffer[start..]) {
                Ok(0) => {
                    self.buffer.truncate(start);
                    self.reader_exhausted = true;
                    return Ok(false);
                }
                Ok(n) => {
                    self.buffer.truncate(start + n);
                    return Ok(true);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buffer.truncate(start);
                    return Err(map_read_error(e));
                }
            }
        }
    }

    fn skip_preamble(&mut self) -> Result<(), MultipartError> {
        let keep = self.delimiter.len() - 1;
        loop {
            if let Some(idx) = find_bytes(&self.buffer[self.pos..], &self.delimiter) {
                self.pos += idx + self.delimiter.len();
                self.state = State::Delimiter;
                return Ok(());
            }

            let available = self.buffer.len() - self.pos;
            if available > keep {
                self.pos = self.buffer.len() - keep;
            }

            if !self.fill_buffer()? {
                return Err(MultipartError::UnexpectedEnd);
            }
        }
    }

    /// Consume what follows a delimiter: `--` closes the body, otherwise
    /// optional padding and a line break lead into the next part's headers.
    fn consume_delimiter_line(&mut self) -> Result<bool, MultipartError> {
        while self.buffer.len() - self.pos < 2 {
            if !self.fill_buffer()? {
                return Err(MultipartError::UnexpectedEnd);
            }
        }

        if self.buffer[self.pos..].starts_with(b"--") {
            self.pos += 2;
            self.state = State::Finished;
            return Ok(false);
        }

        loop {
            let line = &self.buffer[self.pos..];
            if let Some(idx) = line.iter().position(|&b| b == b'\n') {
                let padding = &line[..idx];
                let padding = padding.strip_suffix(b"\r").unwrap_or(padding);
                if !padding.iter().all(|&b| b == b' ' || b == b'\t') {
                    return Err(MultipartError::invalid_header(
                        "Unexpected data after boundary",
                    ));
                }
                self.pos += idx + 1;
                self.state = State::Headers;
                return Ok(true);
            }

            if line.len() > MAX_BOUNDARY_LINE_PADDING {
                return Err(MultipartError::invalid_header(
                    "Unexpected data after boundary",
                ));
            }

            if !self.fill_buffer()? {
                return Err(MultipartError::UnexpectedEnd);
            }
        }
    }

    fn read_headers(&mut self) -> Result<PartHeaders, MultipartError> {
        loop {
            let pending = &self.buffer[self.pos..];

            // A part without headers starts with the blank line itself
            if pending.starts_with(b"\r\n") {
                self.pos += 2;
                self.state = State::Body;
                return PartHeaders::parse(b"", &self.config);
            }

            if pending.len() >= 2 {
                if let Some(idx) = find_bytes(pending, b"\r\n\r\n") {
                    let block = pending[..idx].to_vec();
                    self.pos += idx + 4;
                    self.state = State::Body;
                    return PartHeaders::parse(&block, &self.config);
                }
            }

            if pending.len() > self.config.max_headers_size + 4 {
                return Err(MultipartError::invalid_header("Part headers too large"));
            }

            if !self.fill_buffer()? {
                return Err(MultipartError::UnexpectedEnd);
            }
        }
    }
}

/// Lost connections read as a truncated body.
fn map_read_error(err: std::io::Error) -> MultipartError {
    match err.kind() {
        ErrorKind::UnexpectedEof
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe => MultipartError::UnexpectedEnd,
        _ => MultipartError::Io(err),
    }
}

/// Binary pattern search - find needle in haystack
fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }

    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
