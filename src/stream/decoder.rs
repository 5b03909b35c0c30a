//! NDJSON line framing for a long-lived response body.
//!
//! The decoder works on raw bytes: a line is complete once its `\n` has been
//! received, regardless of how the bytes were split across network chunks.

use anyhow::{anyhow, Result};

/// Default ceiling for a single unterminated line.
pub const DEFAULT_MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Result of splitting one chunk against the retained tail.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodedChunk {
    /// Complete, non-blank lines in arrival order (without terminators).
    pub lines: Vec<String>,
    /// Unterminated remainder to retain for the next call.
    pub tail: Vec<u8>,
}

/// Split `tail ++ chunk` on line boundaries.
pub fn decode_chunk(tail: &[u8], chunk: &[u8]) -> DecodedChunk {
    let mut buffer = Vec::with_capacity(tail.len() + chunk.len());
    buffer.extend_from_slice(tail);
    buffer.extend_from_slice(chunk);

    let mut lines = Vec::new();
    let mut start = 0;
    while let Some(pos) = buffer[start..].iter().position(|b| *b == b'\n') {
        let end = start + pos;
        if let Some(line) = line_from_bytes(&buffer[start..end]) {
            lines.push(line);
        }
        start = end + 1;
    }
    buffer.drain(..start);
    DecodedChunk {
        lines,
        tail: buffer,
    }
}

fn line_from_bytes(raw: &[u8]) -> Option<String> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    match std::str::from_utf8(raw) {
        Ok(text) if text.trim().is_empty() => None,
        Ok(text) => Some(text.to_string()),
        Err(e) => {
            log::warn!("skipping non-utf8 stream line ({} bytes): {}", raw.len(), e);
            None
        }
    }
}

/// Stateful decoder retaining the incomplete tail between chunks.
#[derive(Debug)]
pub struct LineDecoder {
    tail: Vec<u8>,
    max_line_bytes: usize,
}

impl LineDecoder {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            tail: Vec::new(),
            max_line_bytes,
        }
    }

    /// Feed one chunk and collect the lines it completes.
    ///
    /// Complete lines are always returned; call `check_limit` afterwards to
    /// find out whether the retained tail has grown too long.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let decoded = decode_chunk(&self.tail, chunk);
        self.tail = decoded.tail;
        decoded.lines
    }

    /// Fails when the retained tail exceeds the configured line limit.
    pub fn check_limit(&self) -> Result<()> {
        if self.tail.len() > self.max_line_bytes {
            return Err(anyhow!(
                "stream line exceeded {} bytes without a terminator",
                self.max_line_bytes
            ));
        }
        Ok(())
    }

    /// Flush the retained tail at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.tail);
        line_from_bytes(&tail)
    }

    pub fn pending_bytes(&self) -> usize {
        self.tail.len()
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_BYTES)
    }
}
