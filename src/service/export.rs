use crate::models::document::{Document, escape_html};
use crate::models::export::{ExportFormat, ExportedDocument};
use regex::{Captures, Regex};
use std::sync::LazyLock;

const EXPORT_STYLESHEET: &str = r#"body { font-family: ui-serif, Georgia, Cambria, "Times New Roman", Times, serif; line-height: 1.8; max-width: 800px; margin: 0 auto; padding: 2rem; }
        h1, h2, h3, h4, h5, h6 { margin-top: 2rem; margin-bottom: 1rem; }
        p { margin-bottom: 1rem; }
        ul, ol { margin-bottom: 1rem; padding-left: 2rem; }
        blockquote { border-left: 4px solid #e5e7eb; padding-left: 1rem; margin: 1rem 0; font-style: italic; }"#;

fn pattern(source: &str) -> Regex {
    Regex::new(source).unwrap_or_else(|e| panic!("invalid export pattern {source}: {e}"))
}

static TAG: LazyLock<Regex> = LazyLock::new(|| pattern(r"<[^>]*>"));
static H1: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?is)<h1(?:\s[^>]*)?>(.*?)</h1>"));
static H2: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?is)<h2(?:\s[^>]*)?>(.*?)</h2>"));
static H3: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?is)<h3(?:\s[^>]*)?>(.*?)</h3>"));
static PARAGRAPH: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?is)<p(?:\s[^>]*)?>(.*?)</p>"));
static BREAK: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)<br\s*/?>"));
static STRONG: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?is)<(?:strong|b)(?:\s[^>]*)?>(.*?)</(?:strong|b)>"));
static EMPHASIS: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?is)<(?:em|i)(?:\s[^>]*)?>(.*?)</(?:em|i)>"));
static UNORDERED: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?is)<ul(?:\s[^>]*)?>(.*?)</ul>"));
static ORDERED: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?is)<ol(?:\s[^>]*)?>(.*?)</ol>"));
static ITEM: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?is)<li(?:\s[^>]*)?>(.*?)</li>"));
static QUOTE: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?is)<blockquote(?:\s[^>]*)?>(.*?)</blockquote>"));

pub fn export_document(document: &Document, format: ExportFormat) -> ExportedDocument {
    let body = match format {
        ExportFormat::Html => to_html_document(&document.title, &document.content),
        ExportFormat::Text => to_plain_text(&document.content),
        ExportFormat::Markdown => to_markdown(&document.content),
    };

    ExportedDocument {
        format,
        file_name: format.file_name(&document.title),
        body,
    }
}

/// Standalone HTML page wrapping the stored markup.
pub fn to_html_document(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>
        {style}
    </style>
</head>
<body>
    {content}
</body>
</html>"#,
        title = escape_html(title),
        style = EXPORT_STYLESHEET,
        content = content,
    )
}

pub fn to_plain_text(content: &str) -> String {
    decode_entities(&TAG.replace_all(content, ""))
}

/// Best-effort conversion: headings, paragraphs, bold/italic, lists and quotes survive, the rest is stripped.
pub fn to_markdown(content: &str) -> String {
    let markdown = H1.replace_all(content, "# ${1}\n\n");
    let markdown = H2.replace_all(&markdown, "## ${1}\n\n");
    let markdown = H3.replace_all(&markdown, "### ${1}\n\n");
    let markdown = PARAGRAPH.replace_all(&markdown, "${1}\n\n");
    let markdown = BREAK.replace_all(&markdown, "\n");
    let markdown = STRONG.replace_all(&markdown, "**${1}**");
    let markdown = EMPHASIS.replace_all(&markdown, "*${1}*");
    let markdown = UNORDERED.replace_all(&markdown, |caps: &Captures| format!("{}\n", ITEM.replace_all(&caps[1], "- ${1}\n")));
    let markdown = ORDERED.replace_all(&markdown, |caps: &Captures| {
        let mut counter = 0;
        let items = ITEM.replace_all(&caps[1], |item: &Captures| {
            counter += 1;
            format!("{}. {}\n", counter, &item[1])
        });
        format!("{}\n", items)
    });
    let markdown = QUOTE.replace_all(&markdown, "> ${1}\n\n");

    decode_entities(&TAG.replace_all(&markdown, ""))
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn document(content: &str) -> Document {
        Document {
            id: "notes".to_string(),
            title: "Team Notes".to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn every_escaped_character_decodes_back() {
        let raw = r#"Tom & Jerry's <"best"> bits"#;
        let escaped = escape_html(raw);
        assert_eq!(escaped, "Tom &amp; Jerry&#39;s &lt;&quot;best&quot;&gt; bits");
        assert_eq!(decode_entities(&escaped), raw);
    }

    #[test]
    fn plain_text_strips_markup_and_entities() {
        let text = to_plain_text("<h1>Hello</h1><p>fish&nbsp;&amp;&nbsp;chips</p>");
        assert_eq!(text, "Hellofish & chips");
    }

    #[test]
    fn markdown_converts_headings_and_inline_styles() {
        let markdown = to_markdown("<h1>Plan</h1><h2>Goals</h2><p>Ship <strong>fast</strong> and <em>well</em></p>");
        assert_eq!(markdown, "# Plan\n\n## Goals\n\nShip **fast** and *well*\n\n");
    }

    #[test]
    fn markdown_numbers_ordered_lists_and_bullets_unordered() {
        let markdown = to_markdown("<ol><li>one</li><li>two</li></ol><ul><li>a</li><li>b</li></ul>");
        assert_eq!(markdown, "1. one\n2. two\n\n- a\n- b\n\n");
    }

    #[test]
    fn markdown_restarts_numbering_per_list() {
        let markdown = to_markdown("<ol><li>x</li></ol><ol><li>y</li></ol>");
        assert_eq!(markdown, "1. x\n\n1. y\n\n");
    }

    #[test]
    fn markdown_handles_quotes_and_execcommand_tags() {
        let markdown = to_markdown("<blockquote>be kind</blockquote><div><b>bold</b> <i>it</i><br>next</div>");
        assert_eq!(markdown, "> be kind\n\n**bold** *it*\nnext");
    }

    #[test]
    fn markdown_does_not_confuse_blockquote_with_bold() {
        let markdown = to_markdown("<blockquote><b>x</b></blockquote>");
        assert_eq!(markdown, "> **x**\n\n");
    }

    #[test]
    fn html_export_escapes_title_and_keeps_content() {
        let html = to_html_document("A <b> title", "<p>body</p>");
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>A &lt;b&gt; title</title>"));
        assert!(html.contains("<p>body</p>"));
    }

    #[test]
    fn export_document_names_file_after_title() {
        let exported = export_document(&document("<p>hi</p>"), ExportFormat::Markdown);
        assert_eq!(exported.file_name, "Team Notes.md");
        assert_eq!(exported.body, "hi\n\n");

        let exported = export_document(&document("<p>hi</p>"), ExportFormat::Text);
        assert_eq!(exported.file_name, "Team Notes.txt");
        assert_eq!(exported.body, "hi");
    }

    proptest! {
        #[test]
        fn plain_text_keeps_text_between_tags(parts in proptest::collection::vec("[a-zA-Z0-9 .,]{0,12}", 1..8)) {
            let content: String = parts.iter().map(|part| format!("<p><strong>{}</strong></p>", part)).collect();
            let text = to_plain_text(&content);
            prop_assert_eq!(text, parts.concat());
        }

        #[test]
        fn markdown_never_leaks_tags(parts in proptest::collection::vec("[a-zA-Z0-9 ]{0,12}", 1..8)) {
            let content: String = parts.iter().enumerate().map(|(i, part)| match i % 4 {
                0 => format!("<h2>{}</h2>", part),
                1 => format!("<ul><li>{}</li></ul>", part),
                2 => format!("<p><em>{}</em></p>", part),
                _ => format!("<div>{}</div>", part),
            }).collect();
            let markdown = to_markdown(&content);
            prop_assert!(!markdown.contains('<'));
            prop_assert!(!markdown.contains('>'));
        }
    }
}
