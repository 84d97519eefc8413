//! Diagnostics for the Bismut compiler
//!
//! Every stage of the pipeline reports through a shared [`Diagnostics`]
//! sink instead of aborting on first failure. A stage that cannot make
//! further progress pushes its diagnostic and returns [`Fatal`]; the
//! driver consults the sink's error count before moving to the next
//! stage. The `analyze` subcommand serializes the whole sink as JSON.

use serde::Serialize;
use std::fmt;
use std::rc::Rc;

/// A position in Bismut source: interned file path plus 1-based line/column.
///
/// File paths are shared `Rc<str>` so the many clones taken by tokens and
/// AST nodes stay cheap. Positions survive every stage and are embedded in
/// the emitted C so runtime panics report source-level locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pos {
    pub file: Rc<str>,
    pub line: u32,
    pub col: u32,
}

impl Pos {
    pub fn new(file: Rc<str>, line: u32, col: u32) -> Self {
        Pos { file, line, col }
    }

    /// A position for synthesized nodes that have no source counterpart.
    pub fn builtin() -> Self {
        Pos {
            file: Rc::from("<builtin>"),
            line: 0,
            col: 0,
        }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// A single diagnostic with source position and span (in characters).
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub file: String,
    pub line: u32,
    pub col: u32,
    pub span: u32,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}: {}",
            self.file, self.line, self.col, self.severity, self.message
        )
    }
}

/// Marker returned by a stage that has already reported its failure.
///
/// Carries no payload: the diagnostic lives in the sink. Replaces the
/// exception-based control flow of the original compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fatal;

/// Aggregating diagnostic sink shared by all pipeline stages.
#[derive(Debug, Default)]
pub struct Diagnostics {
    diagnostics: Vec<Diagnostic>,
    errors: usize,
    warnings: usize,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    fn push(&mut self, severity: Severity, pos: &Pos, span: u32, message: String) {
        match severity {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
            Severity::Note => {}
        }
        self.diagnostics.push(Diagnostic {
            severity,
            file: pos.file.to_string(),
            line: pos.line,
            col: pos.col,
            span,
            message,
        });
    }

    pub fn error(&mut self, pos: &Pos, span: u32, message: impl Into<String>) {
        self.push(Severity::Error, pos, span, message.into());
    }

    pub fn warning(&mut self, pos: &Pos, span: u32, message: impl Into<String>) {
        self.push(Severity::Warning, pos, span, message.into());
    }

    pub fn note(&mut self, pos: &Pos, span: u32, message: impl Into<String>) {
        self.push(Severity::Note, pos, span, message.into());
    }

    /// Report an error and return the [`Fatal`] marker in one step, so a
    /// stage can write `return Err(diags.fatal(&pos, 1, "..."))`.
    #[must_use]
    pub fn fatal(&mut self, pos: &Pos, span: u32, message: impl Into<String>) -> Fatal {
        self.error(pos, span, message);
        Fatal
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn warning_count(&self) -> usize {
        self.warnings
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Print all diagnostics as `file:line:col: severity: message` lines.
    /// With `quiet`, warnings and notes are suppressed.
    pub fn print_human(&self, quiet: bool) {
        for d in &self.diagnostics {
            if quiet && d.severity != Severity::Error {
                continue;
            }
            eprintln!("{}", d);
        }
    }

    /// Build the JSON report for the `analyze` subcommand.
    pub fn report(&self, file: &str) -> AnalysisReport<'_> {
        AnalysisReport {
            success: !self.has_errors(),
            file: file.to_string(),
            error_count: self.errors,
            warning_count: self.warnings,
            diagnostics: &self.diagnostics,
        }
    }
}

/// JSON shape consumed by IDE tooling. Field names and severity spelling
/// are part of the external interface; do not rename.
#[derive(Debug, Serialize)]
pub struct AnalysisReport<'a> {
    pub success: bool,
    pub file: String,
    pub error_count: usize,
    pub warning_count: usize,
    pub diagnostics: &'a [Diagnostic],
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(line: u32, col: u32) -> Pos {
        Pos::new(Rc::from("test.mut"), line, col)
    }

    #[test]
    fn test_counts() {
        let mut diags = Diagnostics::new();
        diags.error(&pos(1, 1), 1, "bad");
        diags.warning(&pos(2, 5), 3, "iffy");
        diags.note(&pos(2, 5), 3, "see here");
        assert!(diags.has_errors());
        assert_eq!(diags.error_count(), 1);
        assert_eq!(diags.warning_count(), 1);
        assert_eq!(diags.diagnostics().len(), 3);
    }

    #[test]
    fn test_human_format() {
        let mut diags = Diagnostics::new();
        diags.error(&pos(3, 7), 2, "unexpected token");
        let rendered = diags.diagnostics()[0].to_string();
        assert_eq!(rendered, "test.mut:3:7: error: unexpected token");
    }

    #[test]
    fn test_quiet_still_counts_warnings() {
        let mut diags = Diagnostics::new();
        diags.warning(&pos(1, 1), 1, "heads up");
        // -q suppresses the printout, not the count or the JSON.
        assert_eq!(diags.warning_count(), 1);
        assert!(!diags.has_errors());
    }

    #[test]
    fn test_json_report_shape() {
        let mut diags = Diagnostics::new();
        diags.error(&pos(1, 2), 1, "boom");
        let json = serde_json::to_value(diags.report("test.mut")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["file"], "test.mut");
        assert_eq!(json["error_count"], 1);
        assert_eq!(json["warning_count"], 0);
        assert_eq!(json["diagnostics"][0]["severity"], "error");
        assert_eq!(json["diagnostics"][0]["line"], 1);
        assert_eq!(json["diagnostics"][0]["col"], 2);
        assert_eq!(json["diagnostics"][0]["span"], 1);
        assert_eq!(json["diagnostics"][0]["message"], "boom");
    }

    #[test]
    fn test_json_success_when_only_warnings() {
        let mut diags = Diagnostics::new();
        diags.warning(&pos(4, 1), 2, "cycle");
        let json = serde_json::to_value(diags.report("test.mut")).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["warning_count"], 1);
    }

    #[test]
    fn test_fatal_reports() {
        let mut diags = Diagnostics::new();
        let _f: Fatal = diags.fatal(&pos(9, 1), 1, "stage dead");
        assert_eq!(diags.error_count(), 1);
    }

    #[test]
    fn test_builtin_pos() {
        let p = Pos::builtin();
        assert_eq!(p.to_string(), "<builtin>:0:0");
    }
}
