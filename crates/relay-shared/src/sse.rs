//! Incremental decoder for `text/event-stream` bodies.
//!
//! Network chunks can split lines (and multi-byte characters) anywhere, so
//! bytes are buffered until a full line is available. Only `data:` fields are
//! surfaced; comments and other fields are skipped.

use thiserror::Error;

const MAX_PENDING_LINE_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SseDecodeError {
    #[error("event stream line is not valid UTF-8")]
    InvalidUtf8,
    #[error("event stream line exceeds {} bytes", MAX_PENDING_LINE_BYTES)]
    LineTooLong,
}

#[derive(Debug, Default)]
pub struct SseEventDecoder {
    pending: Vec<u8>,
    // `pending[..scanned]` holds no newline.
    scanned: usize,
    data_lines: Vec<String>,
}

impl SseEventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, SseDecodeError> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut line_start = 0;
        let mut search_from = self.scanned;
        while let Some(offset) = self.pending[search_from..]
            .iter()
            .position(|byte| *byte == b'\n')
        {
            let newline_at = search_from + offset;
            let line = decode_line(&self.pending[line_start..newline_at])?;
            if let Some(data) = self.accept_line(&line) {
                events.push(data);
            }
            line_start = newline_at + 1;
            search_from = line_start;
        }

        self.pending.drain(..line_start);
        self.scanned = self.pending.len();

        if self.pending.len() > MAX_PENDING_LINE_BYTES {
            return Err(SseDecodeError::LineTooLong);
        }

        Ok(events)
    }

    pub fn finish(&mut self) -> Result<Option<String>, SseDecodeError> {
        if !self.pending.is_empty() {
            let line = decode_line(&self.pending)?;
            self.pending.clear();
            self.scanned = 0;
            if let Some(data) = self.accept_line(&line) {
                return Ok(Some(data));
            }
        }

        Ok(self.dispatch())
    }

    fn accept_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data_lines.push(value.to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.data_lines).join("\n"))
    }
}

fn decode_line(raw: &[u8]) -> Result<String, SseDecodeError> {
    let line = std::str::from_utf8(raw).map_err(|_| SseDecodeError::InvalidUtf8)?;
    Ok(line.strip_suffix('\r').unwrap_or(line).to_owned())
}
