// Response parsing for the multi-format minutes reply: three fenced blocks
// tagged html / rtf / markdown, in any order, with arbitrary surrounding
// prose. A legacy `[MARKDOWN_START]…[MARKDOWN_END]` delimiter form is also
// accepted. Missing formats are synthesized deterministically.

use regex::Regex;

/// Bodies of the three co-generated formats, as returned by the model.
#[derive(Debug, Clone, Default)]
pub struct ParsedFormats {
    pub markdown: Option<String>,
    pub html: Option<String>,
    pub rtf: Option<String>,
}

impl ParsedFormats {
    pub fn is_empty(&self) -> bool {
        self.markdown.is_none() && self.html.is_none() && self.rtf.is_none()
    }
}

/// Extract whatever formats the response carries.
pub fn parse_formats(content: &str) -> ParsedFormats {
    ParsedFormats {
        markdown: extract_fenced_block(content, "markdown")
            .or_else(|| extract_legacy_block(content, "MARKDOWN")),
        html: extract_fenced_block(content, "html")
            .or_else(|| extract_legacy_block(content, "HTML")),
        rtf: extract_fenced_block(content, "rtf")
            .or_else(|| extract_legacy_block(content, "RTF")),
    }
}

/// First fenced block whose info string equals `tag` (case-insensitive).
fn extract_fenced_block(content: &str, tag: &str) -> Option<String> {
    let mut lines = content.lines();
    while let Some(line) = lines.next() {
        let trimmed = line.trim_start();
        let Some(info) = trimmed.strip_prefix("```") else {
            continue;
        };
        if !info.trim().eq_ignore_ascii_case(tag) {
            continue;
        }
        let mut body: Vec<&str> = Vec::new();
        for inner in lines.by_ref() {
            if inner.trim() == "```" {
                let text = body.join("\n").trim().to_string();
                if text.is_empty() {
                    return None;
                }
                return Some(text);
            }
            body.push(inner);
        }
        // Unterminated fence: take everything to the end.
        let text = body.join("\n").trim().to_string();
        if text.is_empty() {
            return None;
        }
        return Some(text);
    }
    None
}

/// Legacy delimiter form kept for forward compatibility.
fn extract_legacy_block(content: &str, name: &str) -> Option<String> {
    let start_marker = format!("[{}_START]", name);
    let end_marker = format!("[{}_END]", name);
    let start = content.find(&start_marker)? + start_marker.len();
    let end = content[start..].find(&end_marker)? + start;
    let body = content[start..end].trim().to_string();
    if body.is_empty() {
        None
    } else {
        Some(body)
    }
}

/// Derive Markdown from HTML with the fixed rewrite table (h1–h3, strong/b,
/// em/i, li), strip everything else, and unescape entities.
pub fn html_to_markdown(html: &str) -> String {
    let mut text = html.to_string();

    let rules: &[(&str, &str, &str)] = &[
        (r"(?is)<h1[^>]*>(.*?)</h1>", "\n# ", "\n"),
        (r"(?is)<h2[^>]*>(.*?)</h2>", "\n## ", "\n"),
        (r"(?is)<h3[^>]*>(.*?)</h3>", "\n### ", "\n"),
        (r"(?is)<(?:strong|b)[^>]*>(.*?)</(?:strong|b)>", "**", "**"),
        (r"(?is)<(?:em|i)[^>]*>(.*?)</(?:em|i)>", "*", "*"),
        (r"(?is)<li[^>]*>(.*?)</li>", "\n- ", ""),
    ];
    for (pattern, prefix, suffix) in rules {
        let re = Regex::new(pattern).expect("static rewrite pattern");
        text = re
            .replace_all(&text, |caps: &regex::Captures| {
                format!("{}{}{}", prefix, caps[1].trim(), suffix)
            })
            .to_string();
    }

    // Paragraph-ish closers become line breaks, every other tag vanishes.
    let breaks = Regex::new(r"(?i)</(?:p|div|ul|ol|tr)>|<br\s*/?>").expect("static pattern");
    text = breaks.replace_all(&text, "\n").to_string();
    let tags = Regex::new(r"(?s)<[^>]+>").expect("static pattern");
    text = tags.replace_all(&text, "").to_string();

    let unescaped = unescape_entities(&text);
    let collapsed = Regex::new(r"\n{3,}").expect("static pattern");
    collapsed.replace_all(&unescaped, "\n\n").trim().to_string()
}

/// Wrap Markdown in a minimal HTML5 skeleton with a UTF-8 meta tag.
pub fn markdown_to_html(markdown: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"ja\">\n<head>\n<meta charset=\"UTF-8\">\n<title>議事録</title>\n</head>\n<body>\n<pre>{}</pre>\n</body>\n</html>\n",
        escape_html(markdown)
    )
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn unescape_entities(text: &str) -> String {
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

    #[test]
    fn extracts_three_blocks_in_any_order_with_prose() {
        let content = "前置きの説明です。\n\n```rtf\n{\\rtf1 body}\n```\n\n途中のコメント\n\n```markdown\n# 会議\n本文\n```\n\n```html\n<h1>会議</h1>\n```\n\n締めの文。";
        let formats = parse_formats(content);
        assert_eq!(formats.rtf.as_deref(), Some("{\\rtf1 body}"));
        assert_eq!(formats.markdown.as_deref(), Some("# 会議\n本文"));
        assert_eq!(formats.html.as_deref(), Some("<h1>会議</h1>"));
    }

    #[test]
    fn language_tags_match_case_insensitively() {
        let content = "```Markdown\n# T\n```\n```HTML\n<p>x</p>\n```";
        let formats = parse_formats(content);
        assert_eq!(formats.markdown.as_deref(), Some("# T"));
        assert_eq!(formats.html.as_deref(), Some("<p>x</p>"));
    }

    #[test]
    fn legacy_delimiters_are_accepted() {
        let content = "[MARKDOWN_START]\n# 議事録\n[MARKDOWN_END]\n[HTML_START]<h1>x</h1>[HTML_END]";
        let formats = parse_formats(content);
        assert_eq!(formats.markdown.as_deref(), Some("# 議事録"));
        assert_eq!(formats.html.as_deref(), Some("<h1>x</h1>"));
        assert!(formats.rtf.is_none());
    }

    #[test]
    fn unterminated_fence_runs_to_the_end() {
        let content = "```markdown\n# 残り全部";
        let formats = parse_formats(content);
        assert_eq!(formats.markdown.as_deref(), Some("# 残り全部"));
    }

    #[test]
    fn nothing_found_is_empty() {
        let formats = parse_formats("ただのテキストです。");
        assert!(formats.is_empty());
    }

    #[test]
    fn html_rewrite_table() {
        let html = "<h1>会議記録</h1><p>これは<strong>重要</strong>で<em>例</em>です</p><ul><li>一点目</li><li>二点目</li></ul>";
        let markdown = html_to_markdown(html);
        assert!(markdown.starts_with("# 会議記録"));
        assert!(markdown.contains("**重要**"));
        assert!(markdown.contains("*例*"));
        assert!(markdown.contains("- 一点目"));
        assert!(markdown.contains("- 二点目"));
        assert!(!markdown.contains('<'));
    }

    #[test]
    fn html_entities_are_unescaped() {
        let markdown = html_to_markdown("<p>A &amp; B &lt;C&gt;&nbsp;&#39;D&#39;</p>");
        assert_eq!(markdown, "A & B <C> 'D'");
    }

    #[test]
    fn markdown_wraps_into_html5_skeleton() {
        let html = markdown_to_html("# タイトル\n- 項目 <raw>");
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<meta charset=\"UTF-8\">"));
        assert!(html.contains("# タイトル"));
        assert!(html.contains("&lt;raw&gt;"));
    }
}
