// Word artifact generation: a WordprocessingML document built from the
// Markdown rendition by line-oriented rules and packed into the standard
// Office Open XML container.

use regex::Regex;
use std::io::{Cursor, Write};
use zip::write::FileOptions;
use zip::ZipWriter;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>
<Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/>
</Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>
</Relationships>"#;

const DOCUMENT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>
</Relationships>"#;

const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
<w:style w:type="paragraph" w:styleId="Heading1"><w:name w:val="heading 1"/><w:rPr><w:b/><w:sz w:val="32"/></w:rPr></w:style>
<w:style w:type="paragraph" w:styleId="Heading2"><w:name w:val="heading 2"/><w:rPr><w:b/><w:sz w:val="28"/></w:rPr></w:style>
<w:style w:type="paragraph" w:styleId="Heading3"><w:name w:val="heading 3"/><w:rPr><w:b/><w:sz w:val="24"/></w:rPr></w:style>
</w:styles>"#;

/// Build the `.docx` container bytes from Markdown text.
pub fn build_docx(markdown: &str) -> Result<Vec<u8>, String> {
    let document = build_document_xml(markdown);

    let cursor = Cursor::new(Vec::new());
    let mut archive = ZipWriter::new(cursor);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let parts: &[(&str, &str)] = &[
        ("[Content_Types].xml", CONTENT_TYPES),
        ("_rels/.rels", ROOT_RELS),
        ("word/_rels/document.xml.rels", DOCUMENT_RELS),
        ("word/styles.xml", STYLES),
        ("word/document.xml", &document),
    ];
    for (name, content) in parts {
        archive
            .start_file(*name, options)
            .map_err(|e| format!("cannot start {}: {}", name, e))?;
        archive
            .write_all(content.as_bytes())
            .map_err(|e| format!("cannot write {}: {}", name, e))?;
    }

    let cursor = archive
        .finish()
        .map_err(|e| format!("cannot finish container: {}", e))?;
    Ok(cursor.into_inner())
}

/// Line rules: `#`/`##`/`###` headings, `-`/`*` bullets and `1.` items with
/// a left indent, `**…**` bold runs, blank lines as empty paragraphs.
fn build_document_xml(markdown: &str) -> String {
    let ordered = Regex::new(r"^\d+\.\s+").expect("static pattern");

    let mut body = String::new();
    for raw in markdown.lines() {
        let line = raw.trim_end();
        if line.trim().is_empty() {
            body.push_str("<w:p/>");
            continue;
        }

        let trimmed = line.trim_start();
        if let Some(text) = trimmed.strip_prefix("### ") {
            body.push_str(&heading_paragraph("Heading3", text));
        } else if let Some(text) = trimmed.strip_prefix("## ") {
            body.push_str(&heading_paragraph("Heading2", text));
        } else if let Some(text) = trimmed.strip_prefix("# ") {
            body.push_str(&heading_paragraph("Heading1", text));
        } else if let Some(text) = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
        {
            body.push_str(&indented_paragraph(&format!("• {}", text)));
        } else if ordered.is_match(trimmed) {
            body.push_str(&indented_paragraph(trimmed));
        } else {
            body.push_str(&plain_paragraph(trimmed));
        }
    }

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
<w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
<w:body>{}</w:body></w:document>",
        body
    )
}

fn heading_paragraph(style: &str, text: &str) -> String {
    format!(
        "<w:p><w:pPr><w:pStyle w:val=\"{}\"/></w:pPr>{}</w:p>",
        style,
        runs_xml(text)
    )
}

fn indented_paragraph(text: &str) -> String {
    format!(
        "<w:p><w:pPr><w:ind w:left=\"720\"/></w:pPr>{}</w:p>",
        runs_xml(text)
    )
}

fn plain_paragraph(text: &str) -> String {
    format!("<w:p>{}</w:p>", runs_xml(text))
}

/// `**…**` spans alternate into bold runs; an unbalanced marker leaves the
/// tail as plain text.
fn split_bold_runs(text: &str) -> Vec<(String, bool)> {
    let parts: Vec<&str> = text.split("**").collect();
    let balanced = parts.len() % 2 == 1;
    parts
        .into_iter()
        .enumerate()
        .filter(|(_, part)| !part.is_empty())
        .map(|(i, part)| {
            let bold = balanced && i % 2 == 1;
            let text = if !balanced && i % 2 == 1 {
                // Reinsert the marker the split consumed.
                format!("**{}", part)
            } else {
                part.to_string()
            };
            (text, bold)
        })
        .collect()
}

fn runs_xml(text: &str) -> String {
    split_bold_runs(text)
        .into_iter()
        .map(|(part, bold)| {
            if bold {
                format!(
                    "<w:r><w:rPr><w:b/></w:rPr><w:t xml:space=\"preserve\">{}</w:t></w:r>",
                    escape_xml(&part)
                )
            } else {
                format!(
                    "<w:r><w:t xml:space=\"preserve\">{}</w:t></w:r>",
                    escape_xml(&part)
                )
            }
        })
        .collect()
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    fn read_entry(bytes: &[u8], name: &str) -> String {
        let mut archive = ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
        let mut entry = archive.by_name(name).unwrap();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        content
    }

    #[test]
    fn container_has_the_required_parts() {
        let bytes = build_docx("# 議事録").unwrap();
        let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        for required in [
            "[Content_Types].xml",
            "_rels/.rels",
            "word/document.xml",
            "word/styles.xml",
        ] {
            assert!(names.contains(&required), "missing {}", required);
        }
    }

    #[test]
    fn headings_map_to_styles() {
        let bytes = build_docx("# 一\n## 二\n### 三").unwrap();
        let document = read_entry(&bytes, "word/document.xml");
        assert!(document.contains("w:val=\"Heading1\""));
        assert!(document.contains("w:val=\"Heading2\""));
        assert!(document.contains("w:val=\"Heading3\""));
    }

    #[test]
    fn bullets_and_ordered_items_are_indented() {
        let bytes = build_docx("- 項目A\n* 項目B\n1. 第一\n2. 第二").unwrap();
        let document = read_entry(&bytes, "word/document.xml");
        assert_eq!(document.matches("w:left=\"720\"").count(), 4);
        assert!(document.contains("• 項目A"));
        assert!(document.contains("1. 第一"));
    }

    #[test]
    fn blank_lines_become_empty_paragraphs() {
        let bytes = build_docx("一行目\n\n二行目").unwrap();
        let document = read_entry(&bytes, "word/document.xml");
        assert!(document.contains("<w:p/>"));
    }

    #[test]
    fn bold_spans_split_into_runs() {
        let runs = split_bold_runs("決定: **リリース日** は確定");
        assert_eq!(
            runs,
            vec![
                ("決定: ".to_string(), false),
                ("リリース日".to_string(), true),
                (" は確定".to_string(), false),
            ]
        );
    }

    #[test]
    fn unbalanced_bold_marker_stays_plain() {
        let runs = split_bold_runs("値段は **未定");
        assert_eq!(runs, vec![("値段は ".to_string(), false), ("**未定".to_string(), false)]);
    }

    #[test]
    fn xml_content_is_escaped() {
        let bytes = build_docx("A & B <tag>").unwrap();
        let document = read_entry(&bytes, "word/document.xml");
        assert!(document.contains("A &amp; B &lt;tag&gt;"));
    }
}
