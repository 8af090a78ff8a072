//! Hover documentation.

use tower_lsp_server::ls_types::{Hover, HoverContents};

use super::super::ProtocolBridge;
use super::super::protocol::{self, PositionParams, Suggestion, parse_suggestions};
use super::{dedupe_by_path, markdown, render_documentation};
use crate::error::{BridgeError, BridgeResult};
use crate::lsp::rewriter::rewrite;
use crate::lsp::virtual_uri::VirtualDocumentUri;

/// One hover section: a link to the symbol's page, then its documentation.
fn hover_section(suggestion: &Suggestion) -> Option<String> {
    let heading = match &suggestion.path {
        Some(path) => format!("[{}]({})", path, VirtualDocumentUri::document(path)),
        None if !suggestion.label.is_empty() => format!("**{}**", suggestion.label),
        None => String::new(),
    };
    let body = render_documentation(suggestion);

    match (heading.is_empty(), body) {
        (true, None) => None,
        (true, Some(body)) => Some(body),
        (false, None) => Some(heading),
        (false, Some(body)) => Some(format!("{}\n\n{}", heading, body)),
    }
}

/// Markdown for all suggestions, one section per cross-reference path.
fn hover_text(suggestions: Vec<Suggestion>) -> Option<String> {
    let sections: Vec<String> = dedupe_by_path(suggestions)
        .iter()
        .filter_map(hover_section)
        .collect();
    (!sections.is_empty()).then(|| rewrite(&sections.join("\n\n")).into_owned())
}

impl ProtocolBridge {
    /// Hover documentation at the cursor; `None` when the backend knows nothing.
    pub async fn hover(&self, params: &PositionParams) -> BridgeResult<Option<Hover>> {
        let result = self.request(protocol::HOVER, params.to_value()).await?;
        let suggestions = parse_suggestions(&result)
            .map_err(|message| BridgeError::request_failed(protocol::HOVER, message))?;

        Ok(hover_text(suggestions).map(|text| Hover {
            contents: HoverContents::Markup(markdown(text)),
            range: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::bridge::protocol::Documentation;
    use crate::lsp::test_helpers::{FakeBackend, Reply, test_config};
    use serde_json::json;

    fn documented(path: &str, doc: &str) -> Suggestion {
        Suggestion {
            label: path.rsplit(['#', '.']).next().unwrap_or(path).to_string(),
            path: Some(path.to_string()),
            documentation: Some(Documentation::Plain(doc.to_string())),
            ..Default::default()
        }
    }

    #[test]
    fn each_path_is_documented_once_in_backend_order() {
        let text = hover_text(vec![
            documented("String#upcase", "<p>Upcase doc.</p>"),
            documented("String#downcase", "<p>Downcase doc.</p>"),
            documented("String#upcase", "<p>Upcase doc.</p>"),
            documented("String#upcase", "<p>Upcase doc.</p>"),
        ])
        .unwrap();

        assert_eq!(text.matches("Upcase doc.").count(), 1);
        assert_eq!(text.matches("Downcase doc.").count(), 1);
        assert!(text.find("Upcase doc.").unwrap() < text.find("Downcase doc.").unwrap());
    }

    #[test]
    fn path_links_are_rewritten_to_commands() {
        let text = hover_text(vec![documented("String#upcase", "Returns a copy.")]).unwrap();

        assert!(
            text.starts_with(
                "[String#upcase](command:solargraph._openDocumentUrl?\
                 %22solargraph:/document?query=String%2523upcase%22)"
            ),
            "{text}"
        );
        assert!(text.ends_with("Returns a copy."));
    }

    #[test]
    fn undocumented_label_still_renders() {
        let text = hover_text(vec![Suggestion {
            label: "foo".to_string(),
            ..Default::default()
        }]);
        assert_eq!(text.as_deref(), Some("**foo**"));
    }

    #[test]
    fn nothing_to_show_is_none() {
        assert_eq!(hover_text(vec![]), None);
        assert_eq!(hover_text(vec![Suggestion::default()]), None);
    }

    #[tokio::test]
    async fn hover_round_trip() {
        let (transport, _backend) = FakeBackend::spawn(|method, _| match method {
            "hover" => Some(Reply::Result(json!({
                "status": "ok",
                "suggestions": [
                    { "label": "upcase", "path": "String#upcase", "documentation": "<p>Up.</p>" }
                ]
            }))),
            _ => None,
        });
        let (bridge, _events) = ProtocolBridge::start(test_config(), transport).await.unwrap();

        let params = bridge.position_params("'a'.upcase", 0, 6, "/work/app/a.rb");
        let hover = bridge.hover(&params).await.unwrap().unwrap();

        let HoverContents::Markup(content) = hover.contents else {
            panic!("expected markup");
        };
        assert!(content.value.contains("command:solargraph._openDocumentUrl"));
        assert!(content.value.ends_with("Up."));
    }

    #[tokio::test]
    async fn empty_hover_is_none() {
        let (transport, _backend) = FakeBackend::spawn(|_, _| None);
        let (bridge, _events) = ProtocolBridge::start(test_config(), transport).await.unwrap();

        let params = bridge.position_params("", 0, 0, "/work/app/a.rb");
        assert!(bridge.hover(&params).await.unwrap().is_none());
    }
}
