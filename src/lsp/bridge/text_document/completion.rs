//! Completion and completion-resolve.
//!
//! Suggestions are returned in backend order. Each item replaces the
//! identifier-like run before the cursor. Instance and class variable items
//! lose their leading `@`/`@@` so the editor's fuzzy filter can match them.

use serde_json::{Value, json};
use tower_lsp_server::ls_types::{
    CompletionItem, CompletionItemKind, CompletionTextEdit, Documentation as LspDocumentation,
    InsertTextFormat, Position, Range, TextEdit,
};

use super::super::ProtocolBridge;
use super::super::protocol::{self, PositionParams, Suggestion, parse_suggestions};
use super::{dedupe_by_path, markdown, render_documentation};
use crate::error::{BridgeError, BridgeResult};
use crate::lsp::rewriter::rewrite;

/// Map a backend suggestion kind onto the editor's completion kinds.
pub fn completion_kind(kind: &str) -> Option<CompletionItemKind> {
    match kind {
        "Class" => Some(CompletionItemKind::CLASS),
        "Module" => Some(CompletionItemKind::MODULE),
        "Constant" => Some(CompletionItemKind::CONSTANT),
        "Keyword" => Some(CompletionItemKind::KEYWORD),
        "Method" => Some(CompletionItemKind::METHOD),
        "Variable" => Some(CompletionItemKind::VARIABLE),
        "Snippet" => Some(CompletionItemKind::SNIPPET),
        "Field" => Some(CompletionItemKind::FIELD),
        "Property" => Some(CompletionItemKind::PROPERTY),
        _ => None,
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '@' || c == '$'
}

/// Range replaced by a completion at (`line`, `column`).
///
/// Columns count characters. The range covers the identifier-like run that
/// ends at the cursor, plus a leading `:` for symbols. A colon that is the
/// second half of a `::` separator is left out.
pub fn replacement_range(text: &str, line: u32, column: u32) -> Range {
    let line_text = text
        .split('\n')
        .nth(line as usize)
        .unwrap_or("")
        .trim_end_matches('\r');
    let chars: Vec<char> = line_text.chars().collect();
    let cursor = (column as usize).min(chars.len());

    let mut start = cursor;
    while start > 0 && is_word_char(chars[start - 1]) {
        start -= 1;
    }
    if start > 0 && chars[start - 1] == ':' {
        start -= 1;
        if start > 0 && chars[start - 1] == ':' {
            start += 1;
        }
    }

    Range {
        start: Position::new(line, start as u32),
        end: Position::new(line, cursor as u32),
    }
}

/// Text of `range` on its line.
fn range_text(text: &str, range: &Range) -> String {
    text.split('\n')
        .nth(range.start.line as usize)
        .unwrap_or("")
        .chars()
        .skip(range.start.character as usize)
        .take(range.end.character.saturating_sub(range.start.character) as usize)
        .collect()
}

/// `(stripped insert text, sigil length)` for `@ivar` / `@@cvar` inserts.
fn strip_sigil(insert: &str) -> Option<(&str, usize)> {
    if let Some(rest) = insert.strip_prefix("@@") {
        Some((rest, 2))
    } else {
        insert.strip_prefix('@').map(|rest| (rest, 1))
    }
}

fn detail(suggestion: &Suggestion) -> Option<String> {
    let returns = suggestion
        .return_type
        .as_deref()
        .filter(|r| !r.is_empty())
        .map(|r| format!("=> {}", r));

    if suggestion.kind.as_deref() == Some("Method") && !suggestion.arguments.is_empty() {
        let arguments = format!("({})", suggestion.arguments.join(", "));
        Some(match returns {
            Some(returns) => format!("{} {}", arguments, returns),
            None => arguments,
        })
    } else {
        returns
    }
}

/// Documentation shown with a completion item: the path, then the body.
fn item_documentation(suggestion: &Suggestion) -> Option<String> {
    let body = render_documentation(suggestion)?;
    Some(match &suggestion.path {
        Some(path) => format!("{}\n\n{}", path, body),
        None => body,
    })
}

fn to_completion_item(suggestion: Suggestion, text: &str, range: Range) -> CompletionItem {
    let kind = suggestion.kind.as_deref().and_then(completion_kind);
    let detail = detail(&suggestion);
    let insert = suggestion.insert_text().to_string();

    let mut item = CompletionItem {
        label: suggestion.label.clone(),
        kind,
        detail,
        ..Default::default()
    };

    let mut edit_range = range;
    let new_text = match strip_sigil(&insert) {
        Some((stripped, sigil_len)) => {
            let typed_sigils = range_text(text, &range)
                .chars()
                .take_while(|c| *c == '@')
                .count()
                .min(sigil_len);
            edit_range.start.character += typed_sigils as u32;
            item.label = stripped.to_string();
            item.filter_text = Some(stripped.to_string());
            item.sort_text = Some(stripped.to_string());
            stripped.to_string()
        }
        None => insert,
    };
    if kind == Some(CompletionItemKind::SNIPPET) {
        item.insert_text_format = Some(InsertTextFormat::SNIPPET);
    }
    item.text_edit = Some(CompletionTextEdit::Edit(TextEdit {
        range: edit_range,
        new_text,
    }));

    if suggestion.documentation_text().is_some() || !suggestion.params.is_empty() {
        item.documentation = item_documentation(&suggestion)
            .map(|doc| LspDocumentation::MarkupContent(markdown(rewrite(&doc).into_owned())));
    } else if let Some(path) = &suggestion.path {
        // Resolved lazily by `resolve_completion_item`
        item.data = Some(json!({ "path": path }));
    }
    item
}

impl ProtocolBridge {
    /// Completion items at the cursor.
    pub async fn suggest(&self, params: &PositionParams) -> BridgeResult<Vec<CompletionItem>> {
        let result = self.request(protocol::SUGGEST, params.to_value()).await?;
        let suggestions = parse_suggestions(&result)
            .map_err(|message| BridgeError::request_failed(protocol::SUGGEST, message))?;

        let range = replacement_range(&params.text, params.line, params.column);
        Ok(suggestions
            .into_iter()
            .map(|suggestion| to_completion_item(suggestion, &params.text, range))
            .collect())
    }

    /// Fill in documentation deferred by `suggest`.
    ///
    /// Items that already carry documentation, or have no stored path, are
    /// returned unchanged.
    pub async fn resolve_completion_item(
        &self,
        mut item: CompletionItem,
    ) -> BridgeResult<CompletionItem> {
        if item.documentation.is_some() {
            return Ok(item);
        }
        let Some(path) = item
            .data
            .as_ref()
            .and_then(|data| data.get("path"))
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return Ok(item);
        };

        let result = self
            .request(
                protocol::RESOLVE,
                protocol::resolve_params(&path, self.config.workspace()),
            )
            .await?;
        let suggestions = parse_suggestions(&result)
            .map_err(|message| BridgeError::request_failed(protocol::RESOLVE, message))?;

        let bodies: Vec<String> = dedupe_by_path(suggestions)
            .iter()
            .filter_map(render_documentation)
            .collect();
        let body = if bodies.is_empty() {
            path.clone()
        } else {
            format!("{}\n\n{}", path, bodies.join("\n\n"))
        };
        item.documentation = Some(LspDocumentation::MarkupContent(markdown(
            rewrite(&body).into_owned(),
        )));
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::bridge::protocol::Documentation;
    use crate::lsp::test_helpers::{FakeBackend, Reply, test_config};
    use rstest::rstest;

    fn range(line: u32, start: u32, end: u32) -> Range {
        Range {
            start: Position::new(line, start),
            end: Position::new(line, end),
        }
    }

    #[test]
    fn namespace_colon_is_excluded() {
        assert_eq!(replacement_range("Foo::Bar", 0, 8), range(0, 5, 8));
    }

    #[test]
    fn symbol_colon_is_included() {
        assert_eq!(replacement_range(":sym", 0, 4), range(0, 0, 4));
        assert_eq!(replacement_range("x = :sym", 0, 8), range(0, 4, 8));
    }

    #[rstest]
    #[case("@@count", 0, 7, 0)]
    #[case("foo.ba", 0, 6, 4)]
    #[case("  $stdout", 0, 9, 2)]
    #[case("a\nbar_baz", 1, 7, 0)]
    #[case("foo.", 0, 4, 4)]
    fn identifier_run_before_cursor(
        #[case] text: &str,
        #[case] line: u32,
        #[case] column: u32,
        #[case] start: u32,
    ) {
        assert_eq!(replacement_range(text, line, column), range(line, start, column));
    }

    #[test]
    fn cursor_past_line_end_is_clamped() {
        assert_eq!(replacement_range("ab", 0, 10), range(0, 0, 2));
        assert_eq!(replacement_range("ab", 3, 1), range(3, 0, 0));
    }

    fn variable(insert: &str) -> Suggestion {
        Suggestion {
            label: insert.to_string(),
            kind: Some("Variable".to_string()),
            insert: Some(insert.to_string()),
            ..Default::default()
        }
    }

    #[rstest]
    #[case("@@foo", "foo")]
    #[case("@foo", "foo")]
    fn sigils_are_stripped(#[case] insert: &str, #[case] expected: &str) {
        let item = to_completion_item(variable(insert), "", range(0, 0, 0));

        assert_eq!(item.label, expected);
        assert_eq!(item.filter_text.as_deref(), Some(expected));
        assert_eq!(item.sort_text.as_deref(), Some(expected));
        match item.text_edit {
            Some(CompletionTextEdit::Edit(edit)) => assert_eq!(edit.new_text, expected),
            other => panic!("unexpected edit: {:?}", other),
        }
    }

    #[test]
    fn plain_insert_is_unchanged() {
        let item = to_completion_item(variable("foo"), "", range(0, 0, 0));

        assert_eq!(item.label, "foo");
        assert_eq!(item.filter_text, None);
        assert_eq!(item.sort_text, None);
        match item.text_edit {
            Some(CompletionTextEdit::Edit(edit)) => assert_eq!(edit.new_text, "foo"),
            other => panic!("unexpected edit: {:?}", other),
        }
    }

    #[test]
    fn typed_sigils_stay_outside_the_edit() {
        let text = "@@co";
        let item = to_completion_item(variable("@@count"), text, replacement_range(text, 0, 4));

        match item.text_edit {
            Some(CompletionTextEdit::Edit(edit)) => {
                assert_eq!(edit.range, range(0, 2, 4));
                assert_eq!(edit.new_text, "count");
            }
            other => panic!("unexpected edit: {:?}", other),
        }
    }

    #[test]
    fn method_detail_lists_arguments_and_return_type() {
        let suggestion = Suggestion {
            label: "push".to_string(),
            kind: Some("Method".to_string()),
            arguments: vec!["*obj".to_string()],
            return_type: Some("Array".to_string()),
            ..Default::default()
        };
        assert_eq!(detail(&suggestion).as_deref(), Some("(*obj) => Array"));

        let constant = Suggestion {
            kind: Some("Constant".to_string()),
            return_type: Some("Integer".to_string()),
            ..Default::default()
        };
        assert_eq!(detail(&constant).as_deref(), Some("=> Integer"));
        assert_eq!(detail(&Suggestion::default()), None);
    }

    #[test]
    fn snippet_kind_sets_snippet_format() {
        let suggestion = Suggestion {
            label: "def".to_string(),
            kind: Some("Snippet".to_string()),
            insert: Some("def ${1:name}\n  $0\nend".to_string()),
            ..Default::default()
        };
        let item = to_completion_item(suggestion, "", range(0, 0, 0));
        assert_eq!(item.insert_text_format, Some(InsertTextFormat::SNIPPET));
        assert_eq!(item.kind, Some(CompletionItemKind::SNIPPET));
    }

    #[test]
    fn inline_documentation_is_rendered_and_rewritten() {
        let suggestion = Suggestion {
            label: "upcase".to_string(),
            kind: Some("Method".to_string()),
            path: Some("String#upcase".to_string()),
            documentation: Some(Documentation::Plain(
                r#"See <a href="solargraph:/document?query=String">String</a>"#.to_string(),
            )),
            ..Default::default()
        };
        let item = to_completion_item(suggestion, "", range(0, 0, 0));

        let Some(LspDocumentation::MarkupContent(doc)) = item.documentation else {
            panic!("expected markup documentation");
        };
        assert!(doc.value.starts_with("String#upcase\n\n"), "{}", doc.value);
        assert!(doc.value.contains("command:solargraph._openDocumentUrl?"), "{}", doc.value);
        assert!(item.data.is_none());
    }

    #[test]
    fn missing_documentation_is_deferred() {
        let suggestion = Suggestion {
            label: "upcase".to_string(),
            path: Some("String#upcase".to_string()),
            ..Default::default()
        };
        let item = to_completion_item(suggestion, "", range(0, 0, 0));

        assert!(item.documentation.is_none());
        assert_eq!(item.data, Some(json!({ "path": "String#upcase" })));
    }

    #[tokio::test]
    async fn suggest_sends_positional_params() {
        let (transport, backend) = FakeBackend::spawn(|method, _| match method {
            "suggest" => Some(Reply::Result(json!({
                "status": "ok",
                "suggestions": [
                    { "label": "upcase", "kind": "Method", "insert": "upcase", "path": "String#upcase" },
                    { "label": "upto", "kind": "Method", "insert": "upto" }
                ]
            }))),
            _ => None,
        });
        let (bridge, _events) = ProtocolBridge::start(test_config(), transport).await.unwrap();

        let params = bridge.position_params("'a'.up", 0, 6, "/work/app/a.rb");
        let items = bridge.suggest(&params).await.unwrap();

        let labels: Vec<_> = items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["upcase", "upto"]);
        let sent = backend.received("suggest").await;
        assert_eq!(sent[0]["params"]["line"], 0);
        assert_eq!(sent[0]["params"]["column"], 6);
        assert_eq!(sent[0]["params"]["workspace"], "/work/app");
        assert_eq!(sent[0]["params"]["withSnippets"], false);
    }

    #[tokio::test]
    async fn error_envelope_fails_only_that_request() {
        let (transport, _backend) = FakeBackend::spawn(|method, _| match method {
            "suggest" => Some(Reply::Result(json!({ "status": "err", "message": "syntax error" }))),
            _ => None,
        });
        let (bridge, _events) = ProtocolBridge::start(test_config(), transport).await.unwrap();

        let params = bridge.position_params("x", 0, 1, "/work/app/a.rb");
        let err = bridge.suggest(&params).await.unwrap_err();

        assert!(matches!(err, BridgeError::RequestFailed { .. }));
        assert!(bridge.state().accepts_requests());
    }

    #[tokio::test]
    async fn resolve_merges_documentation_by_path() {
        let (transport, backend) = FakeBackend::spawn(|method, _| match method {
            "resolve" => Some(Reply::Result(json!([
                { "label": "upcase", "path": "String#upcase", "documentation": "<p>Upcases.</p>" },
                { "label": "upcase", "path": "String#upcase", "documentation": "<p>Duplicate.</p>" },
                { "label": "upcase", "path": "String#upcase!", "documentation": "<p>In place.</p>" }
            ]))),
            _ => None,
        });
        let (bridge, _events) = ProtocolBridge::start(test_config(), transport).await.unwrap();

        let item = CompletionItem {
            label: "upcase".to_string(),
            data: Some(json!({ "path": "String#upcase" })),
            ..Default::default()
        };
        let resolved = bridge.resolve_completion_item(item).await.unwrap();

        let Some(LspDocumentation::MarkupContent(doc)) = resolved.documentation else {
            panic!("expected documentation");
        };
        assert_eq!(doc.value, "String#upcase\n\nUpcases.\n\nIn place.");
        let sent = backend.received("resolve").await;
        assert_eq!(sent[0]["params"]["path"], "String#upcase");
    }

    #[tokio::test]
    async fn resolve_leaves_documented_items_alone() {
        let (transport, backend) = FakeBackend::spawn(|_, _| None);
        let (bridge, _events) = ProtocolBridge::start(test_config(), transport).await.unwrap();

        let item = CompletionItem {
            label: "x".to_string(),
            documentation: Some(LspDocumentation::String("done".to_string())),
            data: Some(json!({ "path": "X" })),
            ..Default::default()
        };
        let resolved = bridge.resolve_completion_item(item.clone()).await.unwrap();

        assert_eq!(resolved, item);
        assert_eq!(backend.count("resolve"), 0);
    }
}
