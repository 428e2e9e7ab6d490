//! Incremental `text/event-stream` decoder
//!
//! Chunks arrive from the HTTP body in arbitrary sizes, so a line (or a UTF-8
//! sequence) may be split between two chunks. Bytes are buffered until a full
//! line is available.

use bytes::{Buf, BytesMut};
use tracing::trace;

use super::SseFrame;
use crate::types::{AppError, AppResult};

/// Most bytes a single unfinished event may occupy before the stream is dropped
pub const MAX_EVENT_BYTES: usize = 1 << 20;

#[derive(Debug)]
pub struct SseDecoder {
    buffer: BytesMut,
    /// Bytes of `buffer` already known to hold no line terminator
    scanned: usize,
    data_lines: Vec<String>,
    data_len: usize,
    max_event_bytes: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_EVENT_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_event_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scanned: 0,
            data_lines: Vec::new(),
            data_len: 0,
            max_event_bytes,
        }
    }

    /// Feed a chunk and return every frame it completes.
    ///
    /// Fails with a transport error once the unfinished event grows past the
    /// decoder's limit; the stream should be dropped at that point.
    pub fn feed(&mut self, chunk: &[u8]) -> AppResult<Vec<SseFrame>> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let line = self.buffer.split_to(self.scanned + pos);
            self.buffer.advance(1);
            self.scanned = 0;

            let mut line = String::from_utf8_lossy(&line).into_owned();
            if line.ends_with('\r') {
                line.pop();
            }

            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        self.scanned = self.buffer.len();

        let pending = self.buffer.len() + self.data_len;
        if pending > self.max_event_bytes {
            return Err(AppError::Transport(format!(
                "event stream line exceeds {} bytes",
                self.max_event_bytes
            )));
        }
        Ok(frames)
    }

    /// Bytes or data lines still waiting for their terminator
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty() || !self.data_lines.is_empty()
    }

    /// Drop anything left over at end of stream. An event without its closing
    /// blank line is incomplete and is never dispatched.
    pub fn finish(&mut self) {
        if self.has_pending() {
            trace!("Discarding incomplete event at end of stream");
        }
        self.buffer.clear();
        self.scanned = 0;
        self.data_lines.clear();
        self.data_len = 0;
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            if self.data_lines.is_empty() {
                return None;
            }
            let data = self.data_lines.join("\n");
            self.data_lines.clear();
            self.data_len = 0;
            return Some(SseFrame::Data(data));
        }

        if let Some(comment) = line.strip_prefix(':') {
            return Some(SseFrame::Comment(comment.trim_start().to_string()));
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => {
                self.data_len += value.len();
                self.data_lines.push(value.to_string());
            }
            // event / id / retry carry nothing the status client uses
            other => trace!("Ignoring SSE field {:?}", other),
        }
        None
    }
}
