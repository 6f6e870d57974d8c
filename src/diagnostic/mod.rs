pub mod ansi;
pub mod json;
pub mod registry;
mod source_map;

pub use source_map::SourceMap;

use crate::error::{Error, ErrorKind};
use crate::lexer::Span;

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

/// A reportable error, ready to be rendered for a terminal or as JSON.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<&'static str>,
    pub message: String,
    pub label: Option<Label>,
    /// Line to report when there is no span to point at.
    pub line: Option<usize>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            code: None,
            message: message.into(),
            label: None,
            line: None,
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.label = Some(Label { span, message: label.into() });
        self
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

fn suggestion(kind: &ErrorKind) -> Option<String> {
    Some(match kind {
        ErrorKind::UndefinedIdentifier { name } => format!("declare it first: '@{name} = ...;'"),
        ErrorKind::PredefinedAssign { name } => format!("shadow it in a block: '@{name} = {name};'"),
        ErrorKind::RedefinedIdentifier { .. } => "assign to the existing variable instead".to_string(),
        ErrorKind::ReferenceMove => "strings and objects cannot be copied between variables".to_string(),
        ErrorKind::BytecodeOverflow => "raise --code-size".to_string(),
        ErrorKind::ValueOverflow => "raise --slots".to_string(),
        _ => return None,
    })
}

impl From<&Error> for Diagnostic {
    fn from(e: &Error) -> Self {
        let mut d = Diagnostic::error(e.kind.to_string()).with_code(e.code());
        if let Some(span) = e.span {
            d = d.with_span(span, "here");
        }
        if let Some(line) = e.line {
            d = d.with_line(line);
        }
        if let Some(hint) = suggestion(&e.kind) {
            d = d.with_suggestion(hint);
        }
        if let Some(entry) = registry::lookup(e.code()) {
            d = d.with_note(format!("{}: {}", entry.code, entry.short));
        }
        d
    }
}
