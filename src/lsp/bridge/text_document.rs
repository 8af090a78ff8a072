//! Language features served through the bridge.
//!
//! Each submodule adds one family of operations to `ProtocolBridge`. Backend
//! documentation is converted to Markdown and link-rewritten exactly once,
//! here at the bridge boundary.

mod completion;
mod definition;
mod hover;
mod page;
mod signature_help;

use std::collections::HashSet;
use std::path::Path;

use tower_lsp_server::ls_types::{MarkupContent, MarkupKind};

use super::ProtocolBridge;
use super::protocol::{PositionParams, Suggestion};
use crate::lsp::format::html_to_markdown;

pub use completion::{completion_kind, replacement_range};
pub use definition::DefinitionLocation;

impl ProtocolBridge {
    /// Position params filled in with this bridge's workspace and snippet setting.
    pub fn position_params(
        &self,
        text: impl Into<String>,
        line: u32,
        column: u32,
        filename: impl AsRef<Path>,
    ) -> PositionParams {
        let workspace = self.config.workspace_for(filename.as_ref()).map(Path::to_path_buf);
        PositionParams::new(text, line, column, filename)
            .with_workspace(workspace)
            .with_snippets(self.config.with_snippets)
    }
}

/// Keep the first suggestion for each cross-reference path, in backend order.
///
/// Suggestions without a path are all kept.
fn dedupe_by_path(suggestions: Vec<Suggestion>) -> Vec<Suggestion> {
    let mut seen = HashSet::new();
    suggestions
        .into_iter()
        .filter(|suggestion| match &suggestion.path {
            Some(path) => seen.insert(path.clone()),
            None => true,
        })
        .collect()
}

/// Documentation body of one suggestion as Markdown, params list included.
///
/// Links are left untouched; callers rewrite the assembled text once.
fn render_documentation(suggestion: &Suggestion) -> Option<String> {
    let mut html = String::new();
    let mut markdown = None;

    match &suggestion.documentation {
        Some(doc) if doc.is_markdown() => markdown = Some(doc.text().trim().to_string()),
        Some(doc) => html.push_str(doc.text()),
        None => {}
    }
    if !suggestion.params.is_empty() {
        html.push_str("<p>Params:<br/>");
        for param in &suggestion.params {
            html.push_str("- ");
            html.push_str(param);
            html.push_str("<br/>");
        }
        html.push_str("</p>");
    }

    let converted = html_to_markdown(&html);
    let text = match markdown {
        Some(markdown) if converted.is_empty() => markdown,
        Some(markdown) => format!("{}\n\n{}", markdown, converted),
        None => converted,
    };
    (!text.trim().is_empty()).then_some(text)
}

fn markdown(value: String) -> MarkupContent {
    MarkupContent {
        kind: MarkupKind::Markdown,
        value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::bridge::protocol::Documentation;

    fn suggestion(path: &str, doc: &str) -> Suggestion {
        Suggestion {
            label: path.to_string(),
            path: Some(path.to_string()),
            documentation: Some(Documentation::Plain(doc.to_string())),
            ..Default::default()
        }
    }

    #[test]
    fn dedupe_keeps_first_per_path_in_order() {
        let deduped = dedupe_by_path(vec![
            suggestion("String#upcase", "a"),
            suggestion("String#downcase", "b"),
            suggestion("String#upcase", "c"),
            Suggestion::default(),
            Suggestion::default(),
        ]);

        let paths: Vec<_> = deduped.iter().map(|s| s.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                Some("String#upcase".to_string()),
                Some("String#downcase".to_string()),
                None,
                None
            ]
        );
    }

    #[test]
    fn render_documentation_appends_params() {
        let mut s = suggestion("Array#push", "<p>Append.</p>");
        s.params = vec!["obj [Object]".to_string()];

        let rendered = render_documentation(&s).unwrap();
        assert!(rendered.starts_with("Append."), "{rendered}");
        assert!(rendered.contains("Params:"), "{rendered}");
        assert!(rendered.contains("- obj [Object]"), "{rendered}");
    }

    #[test]
    fn render_documentation_keeps_markdown_as_is() {
        let s = Suggestion {
            documentation: Some(Documentation::Markup {
                kind: "markdown".to_string(),
                value: "**bold** <not html>".to_string(),
            }),
            ..Default::default()
        };
        assert_eq!(render_documentation(&s).unwrap(), "**bold** <not html>");
    }

    #[test]
    fn render_documentation_without_content_is_none() {
        assert_eq!(render_documentation(&Suggestion::default()), None);
    }
}
