//! Suggestion records returned by the backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Documentation attached to a suggestion.
///
/// Backends send either a bare HTML string or an LSP-style markup object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Documentation {
    Plain(String),
    Markup { kind: String, value: String },
}

impl Documentation {
    pub fn text(&self) -> &str {
        match self {
            Documentation::Plain(text) => text,
            Documentation::Markup { value, .. } => value,
        }
    }

    /// Whether the text is already Markdown and should not be run through
    /// the HTML converter.
    pub fn is_markdown(&self) -> bool {
        matches!(self, Documentation::Markup { kind, .. } if kind == "markdown")
    }

    pub fn is_empty(&self) -> bool {
        self.text().trim().is_empty()
    }
}

/// One backend suggestion record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub insert: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub documentation: Option<Documentation>,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub return_type: Option<String>,
    /// Cross-reference path, e.g. `String#upcase`
    #[serde(default)]
    pub path: Option<String>,
    /// `path:line:column`
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub params: Vec<String>,
}

impl Suggestion {
    /// Text to insert; the label when the backend sent none.
    pub fn insert_text(&self) -> &str {
        self.insert.as_deref().unwrap_or(&self.label)
    }

    pub fn documentation_text(&self) -> Option<&str> {
        self.documentation
            .as_ref()
            .filter(|doc| !doc.is_empty())
            .map(Documentation::text)
    }
}

/// Parse a suggestion response.
///
/// Accepts the `{status, suggestions | message}` envelope or a bare array.
/// Records that fail to deserialize are skipped rather than failing the
/// whole response.
pub(crate) fn parse_suggestions(result: &Value) -> Result<Vec<Suggestion>, String> {
    let records = match result {
        Value::Null => return Ok(Vec::new()),
        Value::Array(records) => records,
        Value::Object(envelope) => {
            if let Some(status) = envelope.get("status").and_then(Value::as_str)
                && status != "ok"
            {
                let message = envelope
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("backend returned an error");
                return Err(message.to_string());
            }
            match envelope.get("suggestions") {
                Some(Value::Array(records)) => records,
                Some(Value::Null) | None => return Ok(Vec::new()),
                Some(other) => return Err(format!("unexpected suggestions payload: {}", other)),
            }
        }
        other => return Err(format!("unexpected suggestion response: {}", other)),
    };

    Ok(records
        .iter()
        .filter_map(|record| match serde_json::from_value(record.clone()) {
            Ok(suggestion) => Some(suggestion),
            Err(e) => {
                log::debug!(
                    target: "solargraph_bridge::bridge",
                    "Skipping malformed suggestion {}: {}",
                    record,
                    e
                );
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_ok_envelope() {
        let result = json!({
            "status": "ok",
            "suggestions": [
                { "label": "upcase", "kind": "Method", "insert": "upcase", "path": "String#upcase",
                  "arguments": [], "return_type": "String", "documentation": "<p>Up</p>" }
            ]
        });
        let suggestions = parse_suggestions(&result).unwrap();

        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].path.as_deref(), Some("String#upcase"));
        assert_eq!(
            suggestions[0].documentation,
            Some(Documentation::Plain("<p>Up</p>".to_string()))
        );
    }

    #[test]
    fn error_envelope_reports_message() {
        let result = json!({ "status": "err", "message": "parse failure" });
        assert_eq!(parse_suggestions(&result).unwrap_err(), "parse failure");
    }

    #[test]
    fn bare_array_and_null_are_accepted() {
        let suggestions = parse_suggestions(&json!([{ "label": "x" }])).unwrap();
        assert_eq!(suggestions[0].label, "x");
        assert!(parse_suggestions(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn markup_documentation_is_recognised() {
        let record = json!({ "label": "x", "documentation": { "kind": "markdown", "value": "**x**" } });
        let suggestion: Suggestion = serde_json::from_value(record).unwrap();
        let doc = suggestion.documentation.unwrap();

        assert!(doc.is_markdown());
        assert_eq!(doc.text(), "**x**");
    }

    #[test]
    fn malformed_records_are_skipped() {
        let result = json!([{ "label": 3 }, { "label": "ok" }]);
        let suggestions = parse_suggestions(&result).unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].label, "ok");
    }

    #[test]
    fn blank_documentation_counts_as_missing() {
        let suggestion = Suggestion {
            documentation: Some(Documentation::Plain("  ".to_string())),
            ..Default::default()
        };
        assert_eq!(suggestion.documentation_text(), None);
    }
}
