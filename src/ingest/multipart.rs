//! Incremental splitter for `multipart/x-mixed-replace` MJPEG responses.
//!
//! Bytes are pushed as they arrive from the socket; complete payloads are
//! pulled with `next_part`. The splitter:
//! - checks the HTTP status line and picks up the boundary from `Content-Type`
//! - honours a part's `Content-Length` when present
//! - otherwise ends the payload at the next boundary delimiter
//! - discards parts larger than `MAX_JPEG_BYTES`, declared or not, and
//!   resynchronizes on the next delimiter

use crate::error::ProtocolError;

/// Largest payload accepted from a single part.
pub const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

/// Largest response head or part header block.
pub const MAX_HEADER_BYTES: usize = 8192;

const HEADER_END: &[u8] = b"\r\n\r\n";

/// One unit extracted from the body.
#[derive(Debug, PartialEq, Eq)]
pub enum Part {
    /// A complete payload, expected to hold one JPEG image.
    Payload(Vec<u8>),
    /// A part that was skipped because it exceeded `MAX_JPEG_BYTES`.
    Oversized { bytes: usize },
}

#[derive(Debug)]
enum State {
    ResponseHead,
    Seek,
    PartHeaders,
    Body { content_length: Option<usize> },
    Discard { dropped: usize },
}

#[derive(Debug)]
pub struct MultipartSplitter {
    buffer: Vec<u8>,
    state: State,
    fallback_boundary: String,
    delimiter: Vec<u8>,
    /// Offset already scanned for the delimiter in the current state.
    scanned: usize,
}

impl MultipartSplitter {
    /// Expects an HTTP response head before the body. `fallback_boundary` is
    /// used when the response does not declare one.
    pub fn new(fallback_boundary: &str) -> Self {
        Self {
            buffer: Vec::with_capacity(64 * 1024),
            state: State::ResponseHead,
            fallback_boundary: fallback_boundary.to_string(),
            delimiter: delimiter_for(fallback_boundary),
            scanned: 0,
        }
    }

    /// Splits a bare multipart body with no HTTP response head.
    pub fn body_only(boundary: &str) -> Self {
        let mut splitter = Self::new(boundary);
        splitter.state = State::Seek;
        splitter
    }

    /// The delimiter currently being searched for, including the leading dashes.
    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Returns the next complete part, or `None` when more bytes are needed.
    pub fn next_part(&mut self) -> Result<Option<Part>, ProtocolError> {
        loop {
            match self.state {
                State::ResponseHead => {
                    let Some(end) = find(&self.buffer, HEADER_END, 0) else {
                        if self.buffer.len() > MAX_HEADER_BYTES {
                            return Err(ProtocolError::HeaderTooLarge(MAX_HEADER_BYTES));
                        }
                        return Ok(None);
                    };
                    let head = String::from_utf8_lossy(&self.buffer[..end]).into_owned();
                    let boundary = parse_response_head(&head)?;
                    if let Some(boundary) = boundary {
                        self.delimiter = delimiter_for(&boundary);
                    } else {
                        log::debug!(
                            "MultipartSplitter: no boundary declared, using {:?}",
                            self.fallback_boundary
                        );
                    }
                    self.consume(end + HEADER_END.len());
                    self.state = State::Seek;
                }
                State::Seek => {
                    match find(&self.buffer, &self.delimiter, self.scanned) {
                        Some(pos) => {
                            self.consume(pos + self.delimiter.len());
                            self.state = State::PartHeaders;
                        }
                        None => {
                            self.keep_tail();
                            return Ok(None);
                        }
                    }
                }
                State::PartHeaders => {
                    let Some(end) = find(&self.buffer, HEADER_END, 0) else {
                        if self.buffer.len() > MAX_HEADER_BYTES {
                            log::warn!("MultipartSplitter: part header too large, resyncing");
                            self.state = State::Seek;
                            continue;
                        }
                        return Ok(None);
                    };
                    // "--boundary--" closes the body; anything after it is ignored.
                    if self.buffer.starts_with(b"--") {
                        self.consume(2);
                        self.state = State::Seek;
                        continue;
                    }
                    let headers = String::from_utf8_lossy(&self.buffer[..end]).into_owned();
                    let content_length = parse_content_length(&headers);
                    self.consume(end + HEADER_END.len());
                    // Oversized parts are dropped up to the next delimiter,
                    // whatever length they declare.
                    self.state = match content_length {
                        Some(len) if len > MAX_JPEG_BYTES => State::Discard { dropped: 0 },
                        other => State::Body {
                            content_length: other,
                        },
                    };
                }
                State::Body {
                    content_length: Some(len),
                } => {
                    if self.buffer.len() < len {
                        return Ok(None);
                    }
                    let payload: Vec<u8> = self.buffer.drain(..len).collect();
                    self.state = State::Seek;
                    self.scanned = 0;
                    return Ok(Some(Part::Payload(payload)));
                }
                State::Body {
                    content_length: None,
                } => match find(&self.buffer, &self.delimiter, self.scanned) {
                    Some(pos) => {
                        let mut payload: Vec<u8> = self.buffer.drain(..pos).collect();
                        if payload.ends_with(b"\r\n") {
                            payload.truncate(payload.len() - 2);
                        }
                        // The delimiter stays in the buffer for `Seek`.
                        self.state = State::Seek;
                        self.scanned = 0;
                        return Ok(Some(Part::Payload(payload)));
                    }
                    None => {
                        if self.buffer.len() > MAX_JPEG_BYTES + self.delimiter.len() {
                            self.state = State::Discard { dropped: 0 };
                            continue;
                        }
                        self.scanned = self.buffer.len().saturating_sub(self.delimiter.len());
                        return Ok(None);
                    }
                },
                State::Discard { dropped } => {
                    match find(&self.buffer, &self.delimiter, self.scanned) {
                        Some(pos) => {
                            self.consume(pos);
                            self.state = State::Seek;
                            return Ok(Some(Part::Oversized {
                                bytes: dropped + pos,
                            }));
                        }
                        None => {
                            let before = self.buffer.len();
                            self.keep_tail();
                            self.state = State::Discard {
                                dropped: dropped + (before - self.buffer.len()),
                            };
                            return Ok(None);
                        }
                    }
                }
            }
        }
    }

    fn consume(&mut self, len: usize) {
        self.buffer.drain(..len);
        self.scanned = 0;
    }

    /// Drops everything except a tail that could hold a split delimiter.
    fn keep_tail(&mut self) {
        let keep = self.delimiter.len().saturating_sub(1).min(self.buffer.len());
        let drain_len = self.buffer.len() - keep;
        self.buffer.drain(..drain_len);
        self.scanned = 0;
    }
}

/// Validates the status line and returns the declared boundary, if any.
fn parse_response_head(head: &str) -> Result<Option<String>, ProtocolError> {
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let mut fields = status_line.split_whitespace();
    let version = fields.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(ProtocolError::StatusLine(status_line.to_string()));
    }
    let status: u16 = fields
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| ProtocolError::StatusLine(status_line.to_string()))?;
    if status != 200 {
        return Err(ProtocolError::Status(status));
    }

    Ok(lines
        .filter_map(|line| header_value(line, "content-type"))
        .find_map(parse_boundary))
}

fn parse_content_length(headers: &str) -> Option<usize> {
    headers
        .split("\r\n")
        .filter_map(|line| header_value(line, "content-length"))
        .find_map(|value| value.parse().ok())
}

fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (key, value) = line.split_once(':')?;
    key.trim()
        .eq_ignore_ascii_case(name)
        .then(|| value.trim())
}

fn parse_boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.to_ascii_lowercase().starts_with("multipart/") {
        return None;
    }
    params.find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"').to_string())
            .filter(|boundary| !boundary.is_empty())
    })
}

/// Some servers declare the boundary with its leading dashes already in place.
fn delimiter_for(boundary: &str) -> Vec<u8> {
    if boundary.starts_with("--") {
        boundary.as_bytes().to_vec()
    } else {
        format!("--{}", boundary).into_bytes()
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() || from > haystack.len() - needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}
