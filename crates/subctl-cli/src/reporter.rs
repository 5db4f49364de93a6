//! Terminal rendering of operation progress

use std::io::Write;
use std::sync::Mutex;

use subctl_common::reporter::Reporter;

const START: &str = "•";
const SUCCESS: &str = "✓";
const WARNING: &str = "⚠";
const FAILURE: &str = "✗";

/// Reporter printing one status line per event
pub struct CliReporter<W: Write + Send> {
    out: Mutex<W>,
}

impl CliReporter<std::io::Stdout> {
    /// Report to standard output
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> CliReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn line(&self, marker: &str, message: &str) {
        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        // A closed terminal is not worth failing the operation over
        let _ = writeln!(out, " {} {}", marker, message);
        let _ = out.flush();
    }
}

impl<W: Write + Send> Reporter for CliReporter<W> {
    fn start(&self, message: &str) {
        self.line(START, &format!("{}...", message));
    }

    fn success(&self, message: &str) {
        self.line(SUCCESS, message);
    }

    fn warning(&self, message: &str) {
        self.line(WARNING, message);
    }

    fn failure(&self, message: &str) {
        self.line(FAILURE, message);
    }

    fn end(&self) {}
}
