//! Operator display.
//!
//! Remote lines are echoed here (already masked) together with short
//! diagnostic markers when a signal is recognized. Markers are for people
//! watching the run, not a machine-readable contract.

use std::sync::{Arc, Mutex};

/// Destination for echoed remote output and diagnostic markers.
pub trait Console: Send + Sync {
    /// Show one line of remote output.
    fn line(&self, line: &str);

    /// Show a diagnostic marker.
    fn marker(&self, text: &str);
}

/// Writes to the process's stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn line(&self, line: &str) {
        println!("{}", line);
    }

    fn marker(&self, text: &str) {
        println!("\n[mnpilot] {}", text);
    }
}

/// Keeps everything in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct CaptureConsole {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CaptureConsole {
    /// Create an empty capture.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything shown so far, markers prefixed with `[mnpilot] `.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Everything shown so far joined with newlines.
    pub fn transcript(&self) -> String {
        self.entries().join("\n")
    }

    fn push(&self, entry: String) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

impl Console for CaptureConsole {
    fn line(&self, line: &str) {
        self.push(line.to_string());
    }

    fn marker(&self, text: &str) {
        self.push(format!("[mnpilot] {}", text));
    }
}
