use super::{Diagnostic, SourceMap};

/// One-line JSON object for tooling.
pub fn render(d: &Diagnostic) -> String {
    let mut obj = serde_json::json!({
        "severity": "error",
        "message": d.message,
        "notes": d.notes,
    });

    if let Some(code) = d.code {
        obj["code"] = serde_json::Value::from(code);
    }

    if let Some(label) = &d.label {
        let mut span = serde_json::json!({
            "start": label.span.start,
            "end": label.span.end,
            "message": label.message,
        });
        if let Some(source) = &d.source {
            let (line, col) = SourceMap::new(source).lookup(label.span.start);
            span["line"] = serde_json::Value::from(line);
            span["col"] = serde_json::Value::from(col);
        }
        obj["span"] = span;
    }

    if let Some(line) = d.line {
        obj["line"] = serde_json::Value::from(line);
    }

    if let Some(s) = &d.suggestion {
        obj["suggestion"] = serde_json::Value::String(s.clone());
    }

    serde_json::to_string(&obj)
        .unwrap_or_else(|_| r#"{"severity":"error","message":"internal error serializing diagnostic"}"#.to_string())
}
