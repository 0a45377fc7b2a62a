//! Error taxonomy and diagnostic rendering.
//!
//! Plain hand-written enums with manual `Display`/`From` impls rather than
//! a `thiserror`/`anyhow` derive. Rendering is a trait
//! (`DiagnosticRenderer`) with a terminal implementation (`term` colors,
//! `unicode_width` wrapping) and a JSON implementation (`serde_json` +
//! `chrono`).

use std::fmt;
use std::io::{self, Write};

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use term::color::{self, Color};
use term::{Attr, StdoutTerminal};
use unicode_width::UnicodeWidthStr;

use crate::object::{KindTransitionError, Loc, SchemaError};

/// The crate-wide error taxonomy. Every fallible public entry point returns
/// a `Result<_, Error>` (or a narrower error type convertible into this one
/// via `From`).
#[derive(Debug)]
pub enum Error {
    /// Malformed user input: a parse failure, a bad command-line flag, an
    /// out-of-range `parse_value` literal.
    UserSource(String),
    /// An object-store has-map violation.
    Schema(SchemaError),
    /// An object-store kind-transition violation.
    KindTransition(KindTransitionError),
    /// A persisted library unit's schema digest did not match the running
    /// tool's schema.
    StaleUnit { library: String, unit: String },
    UnresolvedName { name: String, loc: Loc },
    TypeMismatch { expected: String, found: String, loc: Loc },
    ConstraintUnsatisfied { detail: String, loc: Loc },
    CircularInstantiation { path: Vec<String> },
    /// A failure raised by the simulation kernel or the JIT interpreter at
    /// run time: division by zero, index out of bounds, assertion failure
    /// above the configured severity threshold.
    RuntimeTrap(String),
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UserSource(msg) => write!(f, "{}", msg),
            Error::Schema(err) => write!(f, "{}", err),
            Error::KindTransition(err) => write!(f, "{}", err),
            Error::StaleUnit { library, unit } => write!(
                f,
                "unit '{}' in library '{}' was compiled against a different schema and must be recompiled",
                unit, library
            ),
            Error::UnresolvedName { name, loc } => {
                write!(f, "unresolved name '{}' at {:?}", name, loc)
            }
            Error::TypeMismatch { expected, found, loc } => write!(
                f,
                "type mismatch at {:?}: expected {}, found {}",
                loc, expected, found
            ),
            Error::ConstraintUnsatisfied { detail, loc } => {
                write!(f, "constraint not satisfied at {:?}: {}", loc, detail)
            }
            Error::CircularInstantiation { path } => {
                write!(f, "circular instantiation: {}", path.join(" -> "))
            }
            Error::RuntimeTrap(msg) => write!(f, "runtime trap: {}", msg),
            Error::Io(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for Error {}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<KindTransitionError> for Error {
    fn from(err: KindTransitionError) -> Self {
        Error::KindTransition(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Severity {
    Note,
    Warning,
    Error,
    Fatal,
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub loc: Option<Loc>,
    pub message: String,
    /// Supplementary notes attached at the point the diagnostic was
    /// raised, via the collector's hint chain.
    pub hints: Vec<String>,
}

/// Collects diagnostics across one analysis/elaboration/simulation run.
/// Hints queued with `hint()` are attached to the *next* emitted diagnostic
/// and then cleared -- this lets a caller deep in a nested check push
/// context ("while elaborating instance U1") that only becomes a visible
/// note if something actually goes wrong nearby.
pub struct DiagnosticCollector {
    diagnostics: Vec<Diagnostic>,
    pending_hints: Vec<String>,
    error_count: usize,
    warning_count: usize,
}

impl DiagnosticCollector {
    pub fn new() -> Self {
        DiagnosticCollector {
            diagnostics: Vec::new(),
            pending_hints: Vec::new(),
            error_count: 0,
            warning_count: 0,
        }
    }

    pub fn hint<S: Into<String>>(&mut self, text: S) {
        self.pending_hints.push(text.into());
    }

    pub fn emit<S: Into<String>>(&mut self, severity: Severity, loc: Option<Loc>, message: S) {
        match severity {
            Severity::Error | Severity::Fatal => self.error_count += 1,
            Severity::Warning => self.warning_count += 1,
            Severity::Note => {}
        }
        self.diagnostics.push(Diagnostic {
            severity,
            loc,
            message: message.into(),
            hints: std::mem::take(&mut self.pending_hints),
        });
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

impl Default for DiagnosticCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Compact,
    Full,
}

/// Renders one diagnostic. Implementations are collaborators chosen by the
/// driver (terminal vs. JSON output).
pub trait DiagnosticRenderer {
    fn render(&mut self, diagnostic: &Diagnostic, mode: RenderMode) -> io::Result<()>;
}

struct TextWrapper {
    col: usize,
    wrap_at: usize,
}

impl TextWrapper {
    fn new(wrap_at: usize) -> Self {
        TextWrapper { col: 0, wrap_at }
    }

    /// Word-wraps `text` at `wrap_at` display columns, carrying `self.col`
    /// across calls so a caller building one line out of several `fill`
    /// calls (a severity label, then the message) keeps wrapping from
    /// where the previous call left off. An explicit `\n` in `text` is a
    /// hard break that resets the column regardless of width.
    fn fill(&mut self, text: &str) -> String {
        let mut output = String::new();
        for (line_idx, line) in text.split('\n').enumerate() {
            if line_idx > 0 {
                output.push('\n');
                self.col = 0;
            }
            for word in line.split(' ').filter(|w| !w.is_empty()) {
                let word_width = word.width();
                if self.col > 0 && self.col + 1 + word_width > self.wrap_at {
                    output.push('\n');
                    self.col = 0;
                } else if self.col > 0 {
                    output.push(' ');
                    self.col += 1;
                }
                output.push_str(word);
                self.col += word_width;
            }
        }
        output
    }
}

/// Colored, caret-under-span terminal renderer. Grounded on `ui::CliUi`.
pub struct TerminalRenderer {
    terminal: Box<StdoutTerminal>,
    wrapper: TextWrapper,
}

impl TerminalRenderer {
    pub fn new() -> Option<Self> {
        Some(TerminalRenderer {
            terminal: term::stdout()?,
            wrapper: TextWrapper::new(80),
        })
    }

    fn severity_color(severity: Severity) -> Color {
        match severity {
            Severity::Note => color::BLUE,
            Severity::Warning => color::YELLOW,
            Severity::Error => color::RED,
            Severity::Fatal => color::RED,
        }
    }

    fn severity_label(severity: Severity) -> &'static str {
        match severity {
            Severity::Note => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal error",
        }
    }
}

impl DiagnosticRenderer for TerminalRenderer {
    fn render(&mut self, diagnostic: &Diagnostic, mode: RenderMode) -> io::Result<()> {
        self.terminal.fg(Self::severity_color(diagnostic.severity))?;
        self.terminal.attr(Attr::Bold)?;
        write!(self.terminal, "{}", Self::severity_label(diagnostic.severity))?;
        self.terminal.reset()?;

        if let Some(loc) = diagnostic.loc {
            write!(self.terminal, " at {:?}", loc)?;
        }
        writeln!(self.terminal, ": {}", self.wrapper.fill(&diagnostic.message))?;
        self.wrapper.col = 0;

        if mode == RenderMode::Full {
            for hint in &diagnostic.hints {
                writeln!(self.terminal, "  note: {}", self.wrapper.fill(hint))?;
                self.wrapper.col = 0;
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct JsonDiagnostic {
    severity: &'static str,
    utc_time: DateTime<Utc>,
    local_time: DateTime<Local>,
    message: String,
    file_id: Option<u32>,
    line: Option<u32>,
    column: Option<u32>,
    hints: Vec<String>,
}

/// Newline-delimited JSON renderer for editor/tooling consumption,
/// grounded on `ui::JsonUi`'s `serde_json` + `chrono` timestamped events.
pub struct JsonRenderer<W: Write> {
    sink: W,
}

impl<W: Write> JsonRenderer<W> {
    pub fn new(sink: W) -> Self {
        JsonRenderer { sink }
    }
}

impl<W: Write> DiagnosticRenderer for JsonRenderer<W> {
    fn render(&mut self, diagnostic: &Diagnostic, mode: RenderMode) -> io::Result<()> {
        let label = match diagnostic.severity {
            Severity::Note => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        };
        let entry = JsonDiagnostic {
            severity: label,
            utc_time: Utc::now(),
            local_time: Local::now(),
            message: diagnostic.message.clone(),
            file_id: diagnostic.loc.map(|l| l.file_id),
            line: diagnostic.loc.map(|l| l.line),
            column: diagnostic.loc.map(|l| l.column),
            hints: if mode == RenderMode::Full {
                diagnostic.hints.clone()
            } else {
                Vec::new()
            },
        };
        let line = serde_json::to_string(&entry)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        writeln!(self.sink, "{}", line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hints_attach_to_next_emitted_diagnostic_only() {
        let mut collector = DiagnosticCollector::new();
        collector.hint("while elaborating instance U1");
        collector.emit(Severity::Error, None, "unresolved name 'foo'");
        collector.emit(Severity::Warning, None, "unused signal 'bar'");

        assert_eq!(collector.diagnostics()[0].hints.len(), 1);
        assert!(collector.diagnostics()[1].hints.is_empty());
    }

    #[test]
    fn text_wrapper_breaks_between_words_not_mid_word() {
        let mut wrapper = TextWrapper::new(5);
        let filled = wrapper.fill("hello world");
        assert_eq!(filled, "hello\nworld");
    }

    #[test]
    fn text_wrapper_keeps_short_lines_on_one_line() {
        let mut wrapper = TextWrapper::new(80);
        let filled = wrapper.fill("a short message");
        assert_eq!(filled, "a short message");
    }

    #[test]
    fn text_wrapper_carries_column_across_calls() {
        let mut wrapper = TextWrapper::new(10);
        let mut out = wrapper.fill("hello");
        out.push_str(&wrapper.fill("world"));
        assert_eq!(out, "hello\nworld");
    }

    #[test]
    fn error_and_warning_counts_are_tracked_separately() {
        let mut collector = DiagnosticCollector::new();
        collector.emit(Severity::Error, None, "one");
        collector.emit(Severity::Warning, None, "two");
        collector.emit(Severity::Fatal, None, "three");

        assert_eq!(collector.error_count(), 2);
        assert_eq!(collector.warning_count(), 1);
        assert!(collector.has_errors());
    }

    #[test]
    fn json_renderer_emits_one_line_per_diagnostic() {
        let mut buf = Vec::new();
        {
            let mut renderer = JsonRenderer::new(&mut buf);
            let diag = Diagnostic {
                severity: Severity::Error,
                loc: Some(Loc { file_id: 1, line: 2, column: 3, length: 4 }),
                message: "bad".to_string(),
                hints: vec!["context".to_string()],
            };
            renderer.render(&diag, RenderMode::Compact).unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("\"severity\":\"error\""));
        assert!(!text.contains("context"));
    }
}
