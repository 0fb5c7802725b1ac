//! # Diagnostics Sink
//!
//! Where recoverable program errors go. The engine never returns these to the
//! caller as failures; it reports them here with a tag naming the offending
//! instruction and continues with a neutral result.

use parking_lot::Mutex;
use serde::Serialize;

/// Receiver of engine diagnostics.
pub trait Diagnostics: Send + Sync {
    fn log_error(&self, tag: &str, message: &str);
    fn log_warning(&self, tag: &str, message: &str);
}

/// Forwards diagnostics to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn log_error(&self, tag: &str, message: &str) {
        tracing::error!(tag, "{}", message);
    }

    fn log_warning(&self, tag: &str, message: &str) {
        tracing::warn!(tag, "{}", message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Warning,
    Error,
}

/// One recorded diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub tag: String,
    pub message: String,
}

/// Keeps every diagnostic in memory, for tests and embedders that surface
/// them in their own UI.
#[derive(Debug, Default)]
pub struct CollectingDiagnostics {
    entries: Mutex<Vec<Diagnostic>>,
}

impl CollectingDiagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    #[must_use]
    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries.lock().clone()
    }

    /// Recorded errors only.
    #[must_use]
    pub fn errors(&self) -> Vec<Diagnostic> {
        self.entries
            .lock()
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    fn record(&self, severity: Severity, tag: &str, message: &str) {
        self.entries.lock().push(Diagnostic {
            severity,
            tag: tag.to_string(),
            message: message.to_string(),
        });
    }
}

impl Diagnostics for CollectingDiagnostics {
    fn log_error(&self, tag: &str, message: &str) {
        self.record(Severity::Error, tag, message);
    }

    fn log_warning(&self, tag: &str, message: &str) {
        self.record(Severity::Warning, tag, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_sink_keeps_order_and_severity() {
        let sink = CollectingDiagnostics::new();
        sink.log_warning("Add", "first");
        sink.log_error("GetAt", "second");

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].severity, Severity::Warning);
        assert_eq!(sink.errors().len(), 1);
        assert_eq!(sink.errors()[0].tag, "GetAt");

        sink.clear();
        assert!(sink.entries().is_empty());
    }
}
