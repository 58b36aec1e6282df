//! Diagnostic module - Error and warning reporting infrastructure.
//!
//! Types for creating, formatting, and collecting compiler diagnostics.
//! The lowering core reports user errors through these; internal invariant
//! violations panic instead (they are compiler bugs, not user mistakes).
//!
//! # Examples
//!
//! ```
//! use opalc_util::diagnostic::{Diagnostic, Handler};
//! use opalc_util::span::Span;
//!
//! let handler = Handler::new();
//! handler.emit(Diagnostic::error("unexpected token", Span::DUMMY));
//!
//! assert!(handler.has_errors());
//! ```

use crate::span::Span;
use std::cell::RefCell;
use std::fmt;

/// Diagnostic severity level
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    /// An error that prevents compilation
    Error,
    /// A warning that doesn't prevent compilation
    Warning,
    /// Additional information about a diagnostic
    Note,
    /// A suggestion for fixing an issue
    Help,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Error => write!(f, "error"),
            Level::Warning => write!(f, "warning"),
            Level::Note => write!(f, "note"),
            Level::Help => write!(f, "help"),
        }
    }
}

/// A diagnostic message with severity and location
#[derive(Clone, Debug)]
pub struct Diagnostic {
    /// Diagnostic severity level
    pub level: Level,
    /// Main diagnostic message
    pub message: String,
    /// Source location
    pub span: Span,
    /// Additional notes for context
    pub notes: Vec<String>,
    /// Help suggestions for fixing the issue
    pub helps: Vec<String>,
}

impl Diagnostic {
    /// Create a new diagnostic
    pub fn new(level: Level, message: impl Into<String>, span: Span) -> Self {
        Self {
            level,
            message: message.into(),
            span,
            notes: Vec::new(),
            helps: Vec::new(),
        }
    }

    /// Create an error diagnostic
    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self::new(Level::Error, message, span)
    }

    /// Create a warning diagnostic
    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self::new(Level::Warning, message, span)
    }

    /// Attach a note
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Attach a help suggestion
    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.helps.push(help.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ({}:{})",
            self.level, self.message, self.span.line, self.span.column
        )
    }
}

/// Collects diagnostics emitted during a compilation phase
///
/// Single-threaded by design; each worker owns its own handler and the driver
/// merges afterwards.
pub struct Handler {
    diagnostics: RefCell<Vec<Diagnostic>>,
}

impl Handler {
    /// Create new handler
    pub fn new() -> Self {
        Self {
            diagnostics: RefCell::new(Vec::new()),
        }
    }

    /// Record a diagnostic
    pub fn emit(&self, diag: Diagnostic) {
        self.diagnostics.borrow_mut().push(diag);
    }

    /// Returns true if any error-level diagnostic was emitted
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .borrow()
            .iter()
            .any(|d| d.level == Level::Error)
    }

    /// Number of recorded diagnostics
    pub fn count(&self) -> usize {
        self.diagnostics.borrow().len()
    }

    /// Drain all recorded diagnostics
    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.diagnostics.borrow_mut())
    }
}

impl Default for Handler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_collects() {
        let handler = Handler::new();
        assert!(!handler.has_errors());

        handler.emit(Diagnostic::warning("unused", Span::DUMMY));
        assert!(!handler.has_errors());

        handler.emit(Diagnostic::error("bad cast", Span::DUMMY));
        assert!(handler.has_errors());
        assert_eq!(handler.count(), 2);
    }

    #[test]
    fn test_diagnostic_builder_chain() {
        let d = Diagnostic::error("field not found", Span::DUMMY)
            .note("struct `S` has fields `a`, `b`")
            .help("did you mean `a`?");
        assert_eq!(d.notes.len(), 1);
        assert_eq!(d.helps.len(), 1);
    }

    #[test]
    fn test_display() {
        let d = Diagnostic::error("boom", Span::new(0, 1, 3, 7));
        assert_eq!(format!("{}", d), "error: boom (3:7)");
    }
}
