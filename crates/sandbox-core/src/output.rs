//! Labeled, line-buffered capture of a child's merged stdout and stderr.

use std::io;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Receives every complete line a command prints.
pub trait LineSink: Send + Sync {
    fn line(&self, label: &str, line: &str);
}

/// Forwards captured lines to the log as `"<label> | <line>"`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LineSink for TracingSink {
    fn line(&self, label: &str, line: &str) {
        info!(target: "sandbox::output", "{} | {}", label, line);
    }
}

/// Keeps captured lines in memory.
#[derive(Debug, Default)]
pub struct BufferSink {
    lines: Mutex<Vec<(String, String)>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All `(label, line)` pairs received so far, in order.
    pub fn lines(&self) -> Vec<(String, String)> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Just the line texts, in order.
    pub fn texts(&self) -> Vec<String> {
        self.lines().into_iter().map(|(_, line)| line).collect()
    }
}

impl LineSink for BufferSink {
    fn line(&self, label: &str, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((label.to_string(), line.to_string()));
        }
    }
}

/// Splits a byte stream into lines and hands each one to a [`LineSink`].
///
/// Bytes after the last newline stay buffered until [`OutputCapture::finish`]
/// (or drop) signals end of stream. Both output streams of a command are
/// written into the same capture, so their bytes may interleave inside a line.
pub struct OutputCapture {
    label: String,
    buffer: Vec<u8>,
    sink: Arc<dyn LineSink>,
}

impl OutputCapture {
    pub fn new(label: impl Into<String>, sink: Arc<dyn LineSink>) -> Self {
        Self {
            label: label.into(),
            buffer: Vec::new(),
            sink,
        }
    }

    /// Emit whatever partial line is still buffered.
    pub fn finish(&mut self) {
        self.emit_lines();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.sink.line(&self.label, &String::from_utf8_lossy(&rest));
        }
    }

    fn emit_lines(&mut self) {
        let Some(last_newline) = self.buffer.iter().rposition(|&b| b == b'\n') else {
            return;
        };

        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);
        for line in complete[..last_newline].split(|&b| b == b'\n') {
            self.sink.line(&self.label, &String::from_utf8_lossy(line));
        }
    }
}

impl io::Write for OutputCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.emit_lines();
        Ok(buf.len())
    }

    // Partial lines are only emitted at end of stream.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for OutputCapture {
    fn drop(&mut self) {
        self.finish();
    }
}
