// Newline framing for the inbound serial byte stream

use super::error::{LinkError, Result};

/// Upper bound on a buffered partial line. A peer that sends this many bytes
/// without a newline is not speaking the line protocol.
pub const MAX_LINE_LEN: usize = 1024;

/// Buffers input and emits a line for every `\n` encountered.
/// The terminator (and a preceding `\r`, if any) is stripped.
pub struct LineFramer {
    buffer: Vec<u8>,
    max_len: usize,
    /// Length of the last discarded partial line, until taken
    overflow: Option<usize>,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFramer {
    pub fn new() -> Self {
        Self::with_max_len(MAX_LINE_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(max_len.min(MAX_LINE_LEN)),
            max_len,
            overflow: None,
        }
    }

    /// Append a chunk and return every line it completes.
    ///
    /// Partial lines persist across calls. If the unterminated remainder
    /// exceeds the maximum length it is discarded; lines completed by the
    /// same chunk are still returned. See [`LineFramer::take_overflow`].
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let mut line = &self.buffer[start..end];
            if let [head @ .., b'\r'] = line {
                line = head;
            }
            lines.push(String::from_utf8_lossy(line).into_owned());
            start = end + 1;
        }
        self.buffer.drain(..start);

        if self.buffer.len() > self.max_len {
            self.overflow = Some(self.buffer.len());
            self.buffer.clear();
        }

        lines
    }

    /// Framing error for a partial line discarded since the last call
    pub fn take_overflow(&mut self) -> Result<()> {
        match self.overflow.take() {
            Some(len) => Err(LinkError::Framing { len }),
            None => Ok(()),
        }
    }

    /// Bytes of the current partial line
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.overflow = None;
    }
}
