use crate::span::Span;

/// A compiler diagnostic (error or warning).
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Diagnostic {
    pub fn error(message: String, span: Span) -> Self {
        Self {
            severity: Severity::Error,
            message,
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn warning(message: String, span: Span) -> Self {
        Self {
            severity: Severity::Warning,
            message,
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    /// An error attributed to a specific IR operation.
    ///
    /// Mirrors `error` but prefixes the operation mnemonic, so pass
    /// failures always name the offending operation even when the span
    /// is a dummy (synthesized operations).
    pub fn op_error(op_name: &str, message: String, span: Span) -> Self {
        Self::error(format!("'{}' op {}", op_name, message), span)
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    /// Render the diagnostic to stderr using ariadne.
    pub fn render(&self, filename: &str, source: &str) {
        use ariadne::{Color, Label, Report, ReportKind, Source};

        let kind = match self.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
        };

        let color = match self.severity {
            Severity::Error => Color::Red,
            Severity::Warning => Color::Yellow,
        };

        let mut report = Report::build(kind, filename, self.span.start as usize)
            .with_message(&self.message)
            .with_label(
                Label::new((filename, self.span.start as usize..self.span.end as usize))
                    .with_message(&self.message)
                    .with_color(color),
            );

        for note in &self.notes {
            report = report.with_note(note);
        }

        if let Some(help) = &self.help {
            report = report.with_help(help);
        }

        report
            .finish()
            .eprint((filename, Source::from(source)))
            .unwrap();
    }
}

/// Render a list of diagnostics.
pub fn render_diagnostics(diagnostics: &[Diagnostic], filename: &str, source: &str) {
    for diag in diagnostics {
        diag.render(filename, source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let span = Span::new(0, 10, 15);
        let d = Diagnostic::error("type mismatch".to_string(), span);
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.message, "type mismatch");
        assert_eq!(d.span.start, 10);
        assert_eq!(d.span.end, 15);
        assert!(d.notes.is_empty());
        assert!(d.help.is_none());
    }

    #[test]
    fn test_op_error_names_operation() {
        let d = Diagnostic::op_error(
            "combine",
            "expected the result and operand sizes to match".to_string(),
            Span::dummy(),
        );
        assert_eq!(
            d.message,
            "'combine' op expected the result and operand sizes to match"
        );
    }

    #[test]
    fn test_with_note() {
        let d = Diagnostic::error("error".to_string(), Span::dummy())
            .with_note("expected field<ijk, f64>".to_string())
            .with_note("found temp<ijk, f64>".to_string());
        assert_eq!(d.notes.len(), 2);
        assert_eq!(d.notes[0], "expected field<ijk, f64>");
        assert_eq!(d.notes[1], "found temp<ijk, f64>");
    }

    #[test]
    fn test_chained_builders() {
        let d = Diagnostic::warning("hint".to_string(), Span::new(0, 0, 5))
            .with_note("note 1".to_string())
            .with_help("help text".to_string())
            .with_note("note 2".to_string());
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(d.notes.len(), 2);
        assert!(d.help.is_some());
    }

    #[test]
    fn test_render_does_not_panic() {
        let source = "func @main(%f : field<ijk, f64>) program {\n  ret\n}\n";
        let d = Diagnostic::error(
            "failed to find stencil assert for input field".to_string(),
            Span::new(0, 12, 14),
        )
        .with_note("every field argument needs an assert declaring its bounds".to_string());
        // Render to stderr, just verify it doesn't panic
        d.render("main.stn", source);
    }

    #[test]
    fn test_render_diagnostics_multiple() {
        let source = "func @a() program { ret }\nfunc @b() program { ret }\n";
        let diagnostics = vec![
            Diagnostic::warning("unused routine a".to_string(), Span::new(0, 6, 8)),
            Diagnostic::warning("unused routine b".to_string(), Span::new(0, 32, 34)),
        ];
        render_diagnostics(&diagnostics, "main.stn", source);
    }
}
