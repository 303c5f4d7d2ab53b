/// Opportunistic parsing of stderr lines into structured failure reports.
///
/// The runner serializes uncaught errors as one JSON line carrying the error
/// kind, message, and stack frames with captured locals. Anything that does
/// not parse cleanly is displayed as plain text; that fallback is the
/// contract, not an error path.
use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StructuredFailure {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(rename = "stack_trace")]
    pub frames: Vec<StackFrame>,
}

/// One call frame, outermost to innermost.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StackFrame {
    pub filename: String,
    pub lineno: u32,
    pub name: String,
    pub line: String,
    pub end_lineno: u32,
    pub colno: u32,
    pub end_colno: u32,
    #[serde(default)]
    pub locals: BTreeMap<String, Value>,
}

impl StructuredFailure {
    /// Parse a stderr line. `None` means plain-text display.
    pub fn parse(line: &str) -> Option<Self> {
        serde_json::from_str::<StructuredFailure>(line)
            .ok()
            .filter(|failure| !failure.kind.is_empty())
    }

    pub fn headline(&self) -> String {
        format!("{}: {}", self.kind, self.message)
    }

    /// The innermost (last) frame renders expanded; outer frames collapsed.
    pub fn expanded_by_default(&self, index: usize) -> bool {
        index + 1 == self.frames.len()
    }
}

impl StackFrame {
    /// Module-level frames display as "Globals" rather than `<module>`.
    pub fn display_name(&self) -> String {
        self.name.replace("<module>", "Globals")
    }

    /// The offending source line with a caret underline across the failing span.
    pub fn caret_line(&self) -> String {
        let width = self.end_colno.saturating_sub(self.colno).max(1) as usize;
        format!(
            "{:>4} | {}\n{}{}",
            self.lineno,
            self.line,
            " ".repeat(7 + self.colno as usize),
            "^".repeat(width),
        )
    }
}

/// Project a captured local value to its display string.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::String(text) => format!("\"{text}\""),
        Value::Object(fields) => match fields.get("type").and_then(Value::as_str) {
            Some(kind) => format!("{kind} Object (See in Debugger)"),
            None => value.to_string(),
        },
        other => other.to_string(),
    }
}
