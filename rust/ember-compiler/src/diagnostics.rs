//! Rendering of lowering failures with source snippets and colors.
//!
//! Every lowering failure is an internal compiler error: the diagnostic
//! points at the expression being lowered but never blames the program.

use crate::{CompileError, LowerError};

/// Severity level for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    InternalError,
    Note,
}

/// A rendered diagnostic with source context
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Option<String>,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<usize>,
    pub col: Option<usize>,
    pub source_line: Option<String>,
    pub underline: Option<String>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    fn label(&self) -> &'static str {
        match self.severity {
            Severity::InternalError => "internal compiler error",
            Severity::Note => "note",
        }
    }

    /// Render with ANSI colors for terminal
    pub fn render_ansi(&self) -> String {
        let label = match self.severity {
            Severity::InternalError => red(self.label()),
            Severity::Note => cyan(self.label()),
        };
        let mut out = match &self.code {
            Some(code) => format!("{}[{}]: ", label, bold(code)),
            None => format!("{}: ", label),
        };
        out.push_str(&bold(&self.message));
        out.push('\n');

        if let Some(location) = self.location() {
            out.push_str(&format!("  {} {}\n", cyan("-->"), location));
        }
        if let (Some(line_num), Some(text), Some(underline)) = (self.line, &self.source_line, &self.underline) {
            out.push_str(&format!("   {}\n", cyan("|")));
            out.push_str(&format!("{:>3} {} {}\n", cyan(&line_num.to_string()), cyan("|"), text));
            out.push_str(&format!("   {} {}\n", cyan("|"), red(underline)));
        }
        for note in &self.notes {
            out.push_str(&format!("   {} {}: {}\n", cyan("="), cyan("note"), note));
        }
        out
    }

    /// Render without colors (for logs, tests)
    pub fn render_plain(&self) -> String {
        let mut out = match &self.code {
            Some(code) => format!("{}[{}]: ", self.label(), code),
            None => format!("{}: ", self.label()),
        };
        out.push_str(&self.message);
        out.push('\n');

        if let Some(location) = self.location() {
            out.push_str(&format!("  --> {}\n", location));
        }
        if let (Some(line_num), Some(text), Some(underline)) = (self.line, &self.source_line, &self.underline) {
            out.push_str("   |\n");
            out.push_str(&format!("{:>3} | {}\n", line_num, text));
            out.push_str(&format!("   | {}\n", underline));
        }
        for note in &self.notes {
            out.push_str(&format!("   = note: {}\n", note));
        }
        out
    }

    fn location(&self) -> Option<String> {
        match (&self.file, self.line, self.col) {
            (Some(file), Some(line), Some(col)) => Some(format!("{}:{}:{}", file, line, col)),
            (Some(file), Some(line), None) => Some(format!("{}:{}", file, line)),
            (Some(file), None, _) => Some(file.clone()),
            _ => None,
        }
    }
}

// ANSI color helpers
fn red(s: &str) -> String {
    format!("\x1b[31m{}\x1b[0m", s)
}

fn cyan(s: &str) -> String {
    format!("\x1b[36m{}\x1b[0m", s)
}

fn bold(s: &str) -> String {
    format!("\x1b[1m{}\x1b[0m", s)
}

fn get_source_line(source: &str, line: usize) -> Option<String> {
    source.lines().nth(line.saturating_sub(1)).map(|s| s.to_string())
}

fn make_underline(col: usize, len: usize) -> String {
    format!("{}{}", " ".repeat(col.saturating_sub(1)), "^".repeat(len.max(1)))
}

/// Builds the diagnostic for a lowering failure inside `function`.
pub fn format_lower_error(error: &LowerError, function: &str, source: &str, filename: &str) -> Diagnostic {
    let span = error.span().filter(|s| s.line > 0);
    let (line, col, source_line, underline) = match span {
        Some(s) => {
            let text = get_source_line(source, s.line);
            let len = s.end.saturating_sub(s.start);
            let underline = text.as_ref().map(|_| make_underline(s.col, len));
            (Some(s.line), Some(s.col), text, underline)
        }
        None => (None, None, None, None),
    };
    let mut notes = vec![format!("while lowering function '{}'", function)];
    match error {
        LowerError::NoRule { .. } | LowerError::StackMismatch { .. } => {
            notes.push("the dispatch tables are incomplete for this carrier combination".to_string())
        }
        LowerError::MissingWellKnownType { .. } => {
            notes.push("enable `call_sites_available` or avoid dynamic calls".to_string())
        }
        _ => {}
    }
    Diagnostic {
        severity: Severity::InternalError,
        code: Some(error.code().to_string()),
        message: error.to_string(),
        file: Some(filename.to_string()),
        line,
        col,
        source_line,
        underline,
        notes,
    }
}

/// Format a compile error into diagnostics, one per underlying failure.
pub fn format_compile_error(error: &CompileError, source: &str, filename: &str) -> Vec<Diagnostic> {
    match error {
        CompileError::Lower { function, error } => vec![format_lower_error(error, function, source, filename)],
        CompileError::Config(message) => vec![Diagnostic {
            severity: Severity::InternalError,
            code: None,
            message: format!("invalid codegen options: {}", message),
            file: Some(filename.to_string()),
            line: None,
            col: None,
            source_line: None,
            underline: None,
            notes: Vec::new(),
        }],
        CompileError::Multiple(errors) => errors
            .iter()
            .flat_map(|e| format_compile_error(e, source, filename))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::Span;
    use crate::compiler::carrier::CarrierType;

    #[test]
    fn test_get_source_line() {
        let source = "line 1\nline 2\nline 3\n";
        assert_eq!(get_source_line(source, 1), Some("line 1".to_string()));
        assert_eq!(get_source_line(source, 3), Some("line 3".to_string()));
        assert_eq!(get_source_line(source, 4), None);
    }

    #[test]
    fn test_make_underline() {
        assert_eq!(make_underline(1, 3), "^^^");
        assert_eq!(make_underline(5, 2), "    ^^");
        assert_eq!(make_underline(3, 0), "  ^");
    }

    #[test]
    fn test_no_rule_points_at_expression() {
        let source = "<?php\n$x = $a <=> $b;\n";
        let err = LowerError::NoRule {
            op: "<=>".to_string(),
            left: CarrierType::Context,
            right: CarrierType::Void,
            span: Span::new(11, 20, 2, 6),
        };
        let diag = format_lower_error(&err, "main", source, "test.php");
        let plain = diag.render_plain();
        assert!(plain.starts_with("internal compiler error[ICE001]"));
        assert!(plain.contains("--> test.php:2:6"));
        assert!(plain.contains("$x = $a <=> $b;"));
        assert!(plain.contains("     ^^^^^^^^^"));
        assert!(plain.contains("while lowering function 'main'"));
    }

    #[test]
    fn test_missing_type_has_no_snippet() {
        let err = LowerError::MissingWellKnownType {
            name: "CallSite".to_string(),
        };
        let diag = format_lower_error(&err, "main", "", "test.php");
        assert_eq!(diag.line, None);
        assert!(diag.render_plain().contains("ICE004"));
    }

    #[test]
    fn test_multiple_errors_flatten() {
        let err = CompileError::Multiple(vec![
            CompileError::Config("bad".to_string()),
            CompileError::Lower {
                function: "f".to_string(),
                error: LowerError::NotImplemented {
                    what: "x".to_string(),
                    span: Span::dummy(),
                },
            },
        ]);
        assert_eq!(format_compile_error(&err, "", "a.php").len(), 2);
    }

    #[test]
    fn test_ansi_render_has_colors() {
        let err = LowerError::InvalidAccess {
            what: "load on a list() target".to_string(),
            span: Span::new(0, 4, 1, 1),
        };
        let diag = format_lower_error(&err, "main", "list", "a.php");
        assert!(diag.render_ansi().contains("\x1b[31m"));
    }
}
