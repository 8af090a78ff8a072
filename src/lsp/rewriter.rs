//! Documentation link rewriting.
//!
//! Backend documentation embeds cross references as `solargraph:` pseudo
//! URIs. Editors cannot navigate those, so each one is turned into a command
//! URI that reopens it through `solargraph._openDocumentUrl`.
//!
//! Three delimiter forms are recognised:
//! - `(solargraph:...)` in Markdown links
//! - `"solargraph:..."` in HTML attributes
//! - `%22solargraph:...%22` where a pseudo URI is already an encoded command argument
//!
//! The transform is NOT idempotent. The third form matches the argument the
//! rewrite itself produces, so running it twice double-encodes. Rewrite each
//! raw response exactly once.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::sync::LazyLock;

/// Scheme of backend cross-reference URIs.
pub const PSEUDO_SCHEME: &str = "solargraph";

/// Command the rewritten links invoke.
pub const OPEN_DOCUMENT_URL_COMMAND: &str = "solargraph._openDocumentUrl";

/// Like `encodeURI`, plus `#` and parentheses so the argument survives inside
/// a Markdown link target and is never read as a fragment.
const COMMAND_ARGUMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b';')
    .remove(b',')
    .remove(b'/')
    .remove(b'?')
    .remove(b':')
    .remove(b'@')
    .remove(b'&')
    .remove(b'=')
    .remove(b'+')
    .remove(b'$')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'');

const LINK_PATTERN_SOURCE: &str =
    r#"\(solargraph:([^)]*?)\)|"solargraph:([^"]*)"|%22solargraph:(.*?)%22"#;

static LINK_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(LINK_PATTERN_SOURCE));

/// Build the command URI that opens `pseudo_uri` (a full `solargraph:` URI).
pub fn command_uri(pseudo_uri: &str) -> String {
    let argument = serde_json::Value::String(pseudo_uri.to_string()).to_string();
    format!(
        "command:{}?{}",
        OPEN_DOCUMENT_URL_COMMAND,
        utf8_percent_encode(&argument, COMMAND_ARGUMENT)
    )
}

/// Rewrite every embedded pseudo URI in `text` into a command URI.
///
/// Returns the input unchanged (borrowed) when nothing matches.
pub fn rewrite(text: &str) -> Cow<'_, str> {
    let pattern = match LINK_PATTERN.as_ref() {
        Ok(pattern) => pattern,
        Err(err) => {
            log::error!(
                target: "solargraph_bridge::rewriter",
                "Link pattern failed to compile: {}",
                err
            );
            return Cow::Borrowed(text);
        }
    };

    pattern.replace_all(text, |caps: &Captures<'_>| {
        let (open, close, value) = if let Some(value) = caps.get(1) {
            ("(", ")", value.as_str())
        } else if let Some(value) = caps.get(2) {
            ("\"", "\"", value.as_str())
        } else if let Some(value) = caps.get(3) {
            ("%22", "%22", value.as_str())
        } else {
            return caps[0].to_string();
        };
        let pseudo = format!("{}:{}", PSEUDO_SCHEME, value);
        format!("{}{}{}", open, command_uri(&pseudo), close)
    })
}
