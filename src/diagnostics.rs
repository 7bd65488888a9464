//! Compilation diagnostics.
//!
//! Passes and the tracer report through a shared [`DiagnosticSink`]
//! rather than printing or failing on the spot. The driver inspects the
//! sink once per phase: any error-severity event fails the whole
//! compilation with no output written.

use std::fmt;

/// How serious an event is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Progress and statistics.
    Info,
    /// Suspicious input or a disabled optimization; compilation
    /// continues.
    Warning,
    /// The output would be wrong; compilation must fail.
    Error,
}

/// One reported event.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Event severity.
    pub severity: Severity,
    /// Human-readable description naming the affected item.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{tag}: {}", self.message)
    }
}

/// Append-only event store, shared across worker threads.
///
/// Events below `min_severity` are dropped at the door. Insertion order
/// is preserved within a thread; the driver reports events in collected
/// order after each phase, so messages stay deterministic for a
/// single-threaded trace and near-deterministic otherwise.
#[derive(Debug)]
pub struct DiagnosticSink {
    events: boxcar::Vec<Diagnostic>,
    min_severity: Severity,
}

impl Default for DiagnosticSink {
    fn default() -> Self {
        Self::new(Severity::Warning)
    }
}

impl DiagnosticSink {
    /// A sink keeping events at or above `min_severity`.
    #[must_use]
    pub fn new(min_severity: Severity) -> Self {
        Self {
            events: boxcar::Vec::new(),
            min_severity,
        }
    }

    /// Reports an event.
    pub fn report(&self, severity: Severity, message: impl Into<String>) {
        if severity < self.min_severity {
            return;
        }
        self.events.push(Diagnostic {
            severity,
            message: message.into(),
        });
    }

    /// Reports at info severity.
    pub fn info(&self, message: impl Into<String>) {
        self.report(Severity::Info, message);
    }

    /// Reports at warning severity.
    pub fn warning(&self, message: impl Into<String>) {
        self.report(Severity::Warning, message);
    }

    /// Reports at error severity.
    pub fn error(&self, message: impl Into<String>) {
        self.report(Severity::Error, message);
    }

    /// Whether any error-severity event was reported.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.events
            .iter()
            .any(|(_, d)| d.severity == Severity::Error)
    }

    /// All collected events, in collection order.
    #[must_use]
    pub fn events(&self) -> Vec<Diagnostic> {
        self.events.iter().map(|(_, d)| d.clone()).collect()
    }

    /// Number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// True when nothing was reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_gating() {
        let sink = DiagnosticSink::new(Severity::Warning);
        sink.info("dropped");
        sink.warning("kept");
        assert_eq!(sink.len(), 1);
        assert!(!sink.has_errors());
    }

    #[test]
    fn test_errors_are_detected() {
        let sink = DiagnosticSink::default();
        sink.error("missing definition for kept class");
        assert!(sink.has_errors());
        assert_eq!(sink.events()[0].to_string(), "error: missing definition for kept class");
    }
}
