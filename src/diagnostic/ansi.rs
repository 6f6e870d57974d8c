use super::{Diagnostic, SourceMap};

pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn paint(&self, code: &str, s: &str) -> String {
        if self.use_color { format!("\x1b[{code}m{s}\x1b[0m") } else { s.to_string() }
    }

    fn bold(&self, s: &str) -> String {
        self.paint("1", s)
    }

    fn bold_red(&self, s: &str) -> String {
        self.paint("1;31", s)
    }

    fn cyan(&self, s: &str) -> String {
        self.paint("36", s)
    }

    fn dim(&self, s: &str) -> String {
        self.paint("2", s)
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();

        // "error[QUILL-C004]: message"
        let head = match d.code {
            Some(code) => format!("error[{code}]"),
            None => "error".to_string(),
        };
        out.push_str(&format!("{}: {}\n", self.bold_red(&head), self.bold(&d.message)));

        match (&d.label, &d.source) {
            (Some(label), Some(source)) => {
                let map = SourceMap::new(source);
                let (line, col) = map.lookup(label.span.start);
                let text = map.line_text(line);

                out.push_str(&format!("  {} line {line}:{col}\n", self.cyan("-->")));

                let gutter = line.to_string().len();
                let pad = " ".repeat(gutter);
                let pipe = self.cyan("|");
                out.push_str(&format!("{pad} {pipe}\n"));
                out.push_str(&format!("{} {pipe} {text}\n", self.cyan(&format!("{line:>gutter$}"))));

                // Carets stop at the end of the line for spans that cross it.
                let room = text.len().saturating_sub(col - 1).max(1);
                let width = label.span.end.saturating_sub(label.span.start).clamp(1, room);
                let carets = self.bold_red(&"^".repeat(width));
                let indent = " ".repeat(col - 1);
                if label.message.is_empty() {
                    out.push_str(&format!("{pad} {pipe} {indent}{carets}\n"));
                } else {
                    out.push_str(&format!("{pad} {pipe} {indent}{carets} {}\n", self.bold_red(&label.message)));
                }
                out.push_str(&format!("{pad} {pipe}\n"));
            }
            _ => {
                if let Some(line) = d.line {
                    out.push_str(&format!("  {} line {line}\n", self.cyan("-->")));
                }
            }
        }

        for note in &d.notes {
            out.push_str(&format!("  {} note: {note}\n", self.dim("=")));
        }
        if let Some(suggestion) = &d.suggestion {
            out.push_str(&format!("  {} help: {suggestion}\n", self.dim("=")));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Span;

    const SOURCE: &str = "{\n  @a = b;\n}";

    fn diag() -> Diagnostic {
        Diagnostic::error("identifier 'b' is not defined")
            .with_code("QUILL-C004")
            .with_span(Span { start: 9, end: 10 }, "here")
            .with_line(2)
            .with_source(SOURCE)
            .with_note("QUILL-C004: undefined identifier")
            .with_suggestion("declare it first: '@b = ...;'")
    }

    fn plain(d: &Diagnostic) -> String {
        AnsiRenderer { use_color: false }.render(d)
    }

    #[test]
    fn header_carries_code() {
        let out = plain(&diag());
        assert!(out.starts_with("error[QUILL-C004]: identifier 'b' is not defined\n"), "got:\n{out}");
    }

    #[test]
    fn snippet_points_at_span() {
        let out = plain(&diag());
        assert!(out.contains("--> line 2:8"), "got:\n{out}");
        assert!(out.contains("2 |   @a = b;"), "got:\n{out}");
        assert!(out.contains("  |        ^ here"), "got:\n{out}");
    }

    #[test]
    fn notes_and_help() {
        let out = plain(&diag());
        assert!(out.contains("= note: QUILL-C004"), "got:\n{out}");
        assert!(out.contains("= help: declare it first"), "got:\n{out}");
    }

    #[test]
    fn line_only_without_source() {
        let out = plain(&Diagnostic::error("value buffer overflow").with_line(7));
        assert!(out.contains("--> line 7\n"), "got:\n{out}");
        assert!(!out.contains('|'));
        assert!(!out.contains("error["));
    }

    #[test]
    fn color_toggle() {
        let colored = AnsiRenderer { use_color: true }.render(&diag());
        assert!(colored.contains("\x1b["));
        assert!(!plain(&diag()).contains("\x1b["));
    }
}
