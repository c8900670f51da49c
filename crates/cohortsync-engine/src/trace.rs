//! Human-readable progress output.
//!
//! Separate from `tracing` logs: these lines are what an operator sees when
//! running a sync by hand, and they can be silenced without touching log
//! filters.

use std::io::Write;
use std::sync::{Arc, Mutex};

/// Last line written by [`TextTrace`].
pub const FINISHED_LINE: &str = "Cohort sync finished";

/// Sink for progress lines.
pub trait ProgressTrace: Send + Sync {
    /// Emit one line, indented by `depth`.
    fn output(&self, message: &str, depth: usize);

    /// Mark the end of the run.
    fn finished(&self);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTrace;

impl ProgressTrace for NullTrace {
    fn output(&self, _message: &str, _depth: usize) {}

    fn finished(&self) {}
}

/// Writes lines to stdout, two spaces per depth level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextTrace;

impl TextTrace {
    fn format(message: &str, depth: usize) -> String {
        format!("{}{}", "  ".repeat(depth), message)
    }

    fn write_finished<W: Write>(out: &mut W) -> std::io::Result<()> {
        writeln!(out, "{FINISHED_LINE}")?;
        out.flush()
    }
}

impl ProgressTrace for TextTrace {
    fn output(&self, message: &str, depth: usize) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}", Self::format(message, depth));
    }

    fn finished(&self) {
        let _ = Self::write_finished(&mut std::io::stdout().lock());
    }
}

/// Keeps lines in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryTrace {
    lines: Arc<Mutex<Vec<String>>>,
    finished: Arc<Mutex<bool>>,
}

impl MemoryTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captured lines, indentation included.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Whether any captured line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }

    pub fn is_finished(&self) -> bool {
        self.finished.lock().map(|f| *f).unwrap_or(false)
    }
}

impl ProgressTrace for MemoryTrace {
    fn output(&self, message: &str, depth: usize) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(TextTrace::format(message, depth));
        }
    }

    fn finished(&self) {
        if let Ok(mut finished) = self.finished.lock() {
            *finished = true;
        }
    }
}
