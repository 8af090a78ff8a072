//! Conversion of backend documentation HTML into Markdown display text.

use regex::{Captures, Regex};
use std::sync::LazyLock;

struct HtmlPatterns {
    pre: Regex,
    code: Regex,
    anchor: Regex,
    br: Regex,
    paragraph_open: Regex,
    paragraph_close: Regex,
    list_item: Regex,
    heading_open: Regex,
    heading_close: Regex,
    tag: Regex,
    entity: Regex,
    blank_lines: Regex,
}

impl HtmlPatterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            pre: Regex::new(r"(?is)<pre[^>]*>(.*?)</pre>")?,
            code: Regex::new(r"(?is)<code[^>]*>(.*?)</code>")?,
            anchor: Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a>"#)?,
            br: Regex::new(r"(?i)<br\s*/?>")?,
            paragraph_open: Regex::new(r"(?i)<p(\s[^>]*)?>")?,
            paragraph_close: Regex::new(r"(?i)</p>")?,
            list_item: Regex::new(r"(?i)<li(\s[^>]*)?>")?,
            heading_open: Regex::new(r"(?i)<h[1-6](\s[^>]*)?>")?,
            heading_close: Regex::new(r"(?i)</h[1-6]>")?,
            tag: Regex::new(r"<[^>]+>")?,
            entity: Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);")?,
            blank_lines: Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+")?,
        })
    }
}

static PATTERNS: LazyLock<Result<HtmlPatterns, regex::Error>> = LazyLock::new(HtmlPatterns::compile);

/// Marker wrapping the index of a protected code block while other rules run.
const BLOCK_MARKER: char = '\u{1}';

/// Convert documentation HTML into Markdown.
///
/// `<pre>` becomes a fenced block, `<br>` and `<p>` become line breaks,
/// `<li>` becomes a bullet, `<a href>` becomes a Markdown link, entities are
/// decoded and any other tag is dropped. Plain text passes through.
pub fn html_to_markdown(html: &str) -> String {
    let patterns = match PATTERNS.as_ref() {
        Ok(patterns) => patterns,
        Err(err) => {
            log::error!(
                target: "solargraph_bridge::format",
                "HTML patterns failed to compile: {}",
                err
            );
            return html.to_string();
        }
    };

    let mut blocks: Vec<String> = Vec::new();
    let text = patterns.pre.replace_all(html, |caps: &Captures<'_>| {
        let body = patterns.tag.replace_all(&caps[1], "");
        let body = decode_entities(patterns, &body);
        blocks.push(format!("```ruby\n{}\n```", body.trim_matches('\n')));
        format!("\n\n{}{}{}\n\n", BLOCK_MARKER, blocks.len() - 1, BLOCK_MARKER)
    });

    let text = patterns.code.replace_all(&text, "`$1`");
    let text = patterns.anchor.replace_all(&text, "[$2]($1)");
    let text = patterns.br.replace_all(&text, "\n");
    let text = patterns.paragraph_open.replace_all(&text, "");
    let text = patterns.paragraph_close.replace_all(&text, "\n\n");
    let text = patterns.list_item.replace_all(&text, "\n- ");
    let text = patterns.heading_open.replace_all(&text, "\n\n**");
    let text = patterns.heading_close.replace_all(&text, "**\n\n");
    let text = patterns.tag.replace_all(&text, "");
    let text = decode_entities(patterns, &text);
    let text = patterns.blank_lines.replace_all(&text, "\n\n");

    let mut output = text.trim().to_string();
    for (index, block) in blocks.iter().enumerate() {
        let marker = format!("{}{}{}", BLOCK_MARKER, index, BLOCK_MARKER);
        output = output.replace(&marker, block);
    }
    output
}

fn decode_entities(patterns: &HtmlPatterns, text: &str) -> String {
    patterns
        .entity
        .replace_all(text, |caps: &Captures<'_>| {
            let name = &caps[1];
            let decoded = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match name {
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "amp" => Some('&'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    _ => None,
                }
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn pre_block_becomes_fenced_code() {
        let html = "<p>Example:</p><pre>[1, 2].map { |x| x &lt;&lt; 1 }\nputs 1</pre>";
        assert_eq!(
            html_to_markdown(html),
            "Example:\n\n```ruby\n[1, 2].map { |x| x << 1 }\nputs 1\n```"
        );
    }

    #[test]
    fn anchor_becomes_markdown_link() {
        let html = r#"See <a href="solargraph:/document?query=Array">Array</a>."#;
        assert_eq!(
            html_to_markdown(html),
            "See [Array](solargraph:/document?query=Array)."
        );
    }

    #[test]
    fn list_items_become_bullets() {
        let html = "<p>Params:<br/>- a<br/></p><ul><li>one</li><li>two</li></ul>";
        assert_eq!(html_to_markdown(html), "Params:\n- a\n\n- one\n- two");
    }

    #[rstest]
    #[case("plain text", "plain text")]
    #[case("&amp;&quot;&#39;&#x41;", "&\"'A")]
    #[case("<b>bold</b> and <code>code</code>", "bold and `code`")]
    #[case("&unknown;", "&unknown;")]
    #[case("", "")]
    fn inline_conversion(#[case] html: &str, #[case] expected: &str) {
        assert_eq!(html_to_markdown(html), expected);
    }

    #[test]
    fn collapses_runs_of_blank_lines() {
        let html = "<p>one</p>\n\n\n<p>two</p>";
        assert_eq!(html_to_markdown(html), "one\n\ntwo");
    }
}
