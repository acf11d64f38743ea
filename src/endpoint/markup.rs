//! Minimal HTML to markdown conversion for Mastodon status bodies.
//!
//! Mastodon renders statuses as a small, predictable subset of HTML:
//! paragraphs, line breaks, links (with `invisible`/`ellipsis` spans for long
//! URLs), mentions and hashtags. Anything else is stripped to its text.
//! Character references are decoded in a single pass: the common named ones
//! and every decimal or hex numeric one. Unknown references are left as is.

use std::sync::LazyLock;

use fancy_regex::{Captures, Regex};

static CONVERTER: LazyLock<MarkupConverter> = LazyLock::new(MarkupConverter::new);

/// Convert a Mastodon status body to markdown text.
pub fn html_to_markdown(html: &str) -> String {
    CONVERTER.convert(html)
}

/// Compiled patterns for status conversion.
#[derive(Debug)]
struct MarkupConverter {
    /// `<br>`, `<br/>`, `<br />`.
    line_break: Regex,
    /// Boundary between two paragraphs.
    paragraph_break: Regex,
    /// Anchor with its href and inner HTML.
    link: Regex,
    /// Any remaining tag.
    tag: Regex,
    /// Named or numeric character reference.
    entity: Regex,
}

impl MarkupConverter {
    fn new() -> Self {
        Self {
            line_break: Regex::new(r"(?i)<br\s*/?>").unwrap(),
            paragraph_break: Regex::new(r"(?i)</p>\s*<p(?:\s[^>]*)?>").unwrap(),
            link: Regex::new(r#"(?is)<a\s[^>]*?href="([^"]*)"[^>]*>(.*?)</a>"#).unwrap(),
            tag: Regex::new(r"<[^>]+>").unwrap(),
            entity: Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]+);").unwrap(),
        }
    }

    fn convert(&self, html: &str) -> String {
        let text = self.replace(&self.line_break, html, "\n");
        let text = self.replace(&self.paragraph_break, &text, "\n\n");

        let text = self
            .link
            .replace_all(&text, |caps: &Captures| -> String {
                render_link(&caps[1], &self.strip_tags(&caps[2]))
            })
            .into_owned();

        let text = self.strip_tags(&text);
        self.decode_entities(&text).trim().to_string()
    }

    fn decode_entities(&self, text: &str) -> String {
        self.entity
            .replace_all(text, |caps: &Captures| -> String {
                match decode_entity(&caps[1]) {
                    Some(c) => c.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    fn strip_tags(&self, html: &str) -> String {
        self.replace(&self.tag, html, "")
    }

    fn replace(&self, pattern: &Regex, text: &str, with: &str) -> String {
        pattern.replace_all(text, with).into_owned()
    }
}

/// Mentions and hashtags keep their visible text, bare URLs stay bare,
/// everything else becomes a markdown link.
fn render_link(href: &str, label: &str) -> String {
    if label.starts_with('#') || label.starts_with('@') {
        return label.to_string();
    }
    let bare = href
        .strip_prefix("https://")
        .or_else(|| href.strip_prefix("http://"))
        .unwrap_or(href);
    if label.is_empty() || label == href || label == bare {
        return href.to_string();
    }
    format!("[{}]({})", label, href)
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
    }
    if let Some(decimal) = name.strip_prefix('#') {
        return decimal.parse().ok().and_then(char::from_u32);
    }
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_paragraph() {
        assert_eq!(html_to_markdown("<p>Hello world</p>"), "Hello world");
    }

    #[test]
    fn test_paragraphs_and_line_breaks() {
        assert_eq!(html_to_markdown("<p>one</p><p>two</p>"), "one\n\ntwo");
        assert_eq!(
            html_to_markdown("<p>line<br>next<br />last</p>"),
            "line\nnext\nlast"
        );
    }

    #[test]
    fn test_long_url_spans_collapse_to_href() {
        let html = r#"<p>see <a href="https://example.com/some/long/path" rel="nofollow noopener" target="_blank"><span class="invisible">https://</span><span class="ellipsis">example.com/some/lo</span><span class="invisible">ng/path</span></a></p>"#;
        assert_eq!(html_to_markdown(html), "see https://example.com/some/long/path");
    }

    #[test]
    fn test_labelled_link() {
        let html = r#"<p><a href="https://example.com">the site</a></p>"#;
        assert_eq!(html_to_markdown(html), "[the site](https://example.com)");
    }

    #[test]
    fn test_hashtags_and_mentions_keep_text() {
        let html = r#"<p><a href="https://example.social/tags/rust" class="mention hashtag" rel="tag">#<span>rust</span></a> by <span class="h-card"><a href="https://example.social/@alice" class="u-url mention">@<span>alice</span></a></span></p>"#;
        assert_eq!(html_to_markdown(html), "#rust by @alice");
    }

    #[test]
    fn test_entities_are_decoded_once() {
        assert_eq!(
            html_to_markdown("<p>Tom &amp; Jerry &lt;3 &amp;lt;</p>"),
            "Tom & Jerry <3 &lt;"
        );
    }

    #[test]
    fn test_numeric_references_are_decoded() {
        assert_eq!(
            html_to_markdown("<p>it&#8217;s &#x27;quoted&#X27; &#39;too&#39;</p>"),
            "it\u{2019}s 'quoted' 'too'"
        );
    }

    #[test]
    fn test_unknown_references_are_kept() {
        assert_eq!(
            html_to_markdown("<p>a &hellip; b &#xD800; c</p>"),
            "a &hellip; b &#xD800; c"
        );
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(html_to_markdown("just text"), "just text");
    }
}
