// Test doubles for the link layer

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::error::{LinkError, Result};
use super::transport::LineWriter;

/// Records every written line; can be told to fail
#[derive(Default)]
pub(crate) struct RecordingWriter {
    lines: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingWriter {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }
}

impl LineWriter for RecordingWriter {
    fn write_line(&self, line: &str) -> Result<()> {
        // attempts are recorded even when they fail, to check ordering
        self.lines.lock().unwrap().push(line.to_string());
        if self.fail.load(Ordering::Relaxed) {
            return Err(LinkError::Closed);
        }
        Ok(())
    }
}
