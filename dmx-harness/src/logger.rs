//! Logging abstraction for testable output.
//!
//! Harness events are single-line `event key=value ...` records written
//! through the [`Logger`] trait, so tests can assert on what a run logged
//! without touching global state.

use std::fmt::{self, Write as _};
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Verbosity level for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Always shown.
    Normal,
    /// Shown with `-v`.
    Verbose,
    /// Shown with `-vv`.
    Debug,
}

impl Verbosity {
    /// Create verbosity from a CLI flag count.
    pub fn from_count(count: u8) -> Self {
        match count {
            0 => Verbosity::Normal,
            1 => Verbosity::Verbose,
            _ => Verbosity::Debug,
        }
    }
}

/// Sink for harness log lines.
///
/// Workers log concurrently, so implementations must be thread-safe.
pub trait Logger: Send + Sync {
    fn log(&self, level: Verbosity, message: &str);

    /// Log a structured event: `name key=value key=value`.
    fn event(&self, level: Verbosity, name: &str, fields: &[(&str, &dyn fmt::Display)]) {
        self.log(level, &format_event(name, fields));
    }

    fn info(&self, message: &str) {
        self.log(Verbosity::Normal, message);
    }

    fn verbose(&self, message: &str) {
        self.log(Verbosity::Verbose, message);
    }

    fn debug(&self, message: &str) {
        self.log(Verbosity::Debug, message);
    }
}

/// Render an event line. Values containing whitespace or quotes are quoted.
pub fn format_event(name: &str, fields: &[(&str, &dyn fmt::Display)]) -> String {
    let mut line = String::from(name);
    for (key, value) in fields {
        let value = value.to_string();
        let _ = if value.is_empty()
            || value.chars().any(|c| c.is_whitespace() || c == '"' || c == '=')
        {
            write!(line, " {}={:?}", key, value)
        } else {
            write!(line, " {}={}", key, value)
        };
    }
    line
}

/// Logger that writes to stderr.
#[derive(Debug)]
pub struct StderrLogger {
    level: Verbosity,
}

impl StderrLogger {
    pub fn new(level: Verbosity) -> Self {
        Self { level }
    }
}

impl Logger for StderrLogger {
    fn log(&self, level: Verbosity, message: &str) {
        if level <= self.level {
            let _ = writeln!(std::io::stderr().lock(), "{}", message);
        }
    }
}

/// A captured log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: Verbosity,
    pub message: String,
}

/// Logger that captures every entry regardless of level.
#[derive(Debug, Clone, Default)]
pub struct MockLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl MockLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.message).collect()
    }

    /// Check if any message contains the given substring.
    pub fn contains(&self, substring: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.message.contains(substring))
    }
}

impl Logger for MockLogger {
    fn log(&self, level: Verbosity, message: &str) {
        self.entries.lock().unwrap().push(LogEntry {
            level,
            message: message.to_string(),
        });
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _level: Verbosity, _message: &str) {}
}
