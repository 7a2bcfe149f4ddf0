//! Console adapters - pluggable standard streams for VM execution
//!
//! The VM never touches the host's stdio directly; everything flows through
//! a `Console`, so an embedder (a debugger UI, a test) can substitute its
//! own sinks and sources for the duration of a run.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use parking_lot::Mutex;

/// Receives output text chunks
pub trait OutputSink: Send + Sync {
    /// Display a chunk of text (no newline is implied)
    fn write_text(&self, text: &str);
}

/// Produces input lines
pub trait InputSource: Send + Sync {
    /// Read the next line of input; may block
    fn read_line(&self) -> io::Result<String>;
}

/// The triple of streams a VM runs against
#[derive(Clone)]
pub struct Console {
    /// Standard output sink
    pub out: Arc<dyn OutputSink>,
    /// Standard error sink
    pub err: Arc<dyn OutputSink>,
    /// Standard input source
    pub input: Arc<dyn InputSource>,
}

impl Console {
    /// A console forwarding to the host process streams
    #[must_use]
    pub fn host() -> Self {
        Self {
            out: Arc::new(HostStdout),
            err: Arc::new(HostStderr),
            input: Arc::new(HostStdin),
        }
    }

    /// Write a line to the error sink
    pub fn error_line(&self, text: &str) {
        self.err.write_text(text);
        self.err.write_text("\n");
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::host()
    }
}

/// Forwards to the host process stdout
pub struct HostStdout;

impl OutputSink for HostStdout {
    fn write_text(&self, text: &str) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }
}

/// Forwards to the host process stderr
pub struct HostStderr;

impl OutputSink for HostStderr {
    fn write_text(&self, text: &str) {
        let mut stderr = io::stderr().lock();
        let _ = stderr.write_all(text.as_bytes());
        let _ = stderr.flush();
    }
}

/// Reads lines from the host process stdin
pub struct HostStdin;

impl InputSource for HostStdin {
    fn read_line(&self) -> io::Result<String> {
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line)
    }
}

/// An in-memory sink that accumulates everything written to it
///
/// Useful for tests and for UIs that render output themselves.
#[derive(Default)]
pub struct BufferSink {
    buffer: Mutex<String>,
}

impl BufferSink {
    /// Create an empty buffer sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far
    #[must_use]
    pub fn contents(&self) -> String {
        self.buffer.lock().clone()
    }
}

impl OutputSink for BufferSink {
    fn write_text(&self, text: &str) {
        self.buffer.lock().push_str(text);
    }
}

/// An input source that serves lines from a fixed script
#[derive(Default)]
pub struct ScriptedInput {
    lines: Mutex<Vec<String>>,
}

impl ScriptedInput {
    /// Create a source that will serve the given lines in order
    #[must_use]
    pub fn new(lines: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut queued: Vec<String> = lines.into_iter().map(Into::into).collect();
        queued.reverse();
        Self {
            lines: Mutex::new(queued),
        }
    }
}

impl InputSource for ScriptedInput {
    fn read_line(&self) -> io::Result<String> {
        self.lines
            .lock()
            .pop()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "input exhausted"))
    }
}
