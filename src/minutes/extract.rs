// Structured extraction from the Markdown rendition only: title,
// participants, summary, key points and action items, routed by the section
// keywords the generation prompt asks for.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants::SUMMARY_CHAR_LIMIT;

pub const FALLBACK_TITLE: &str = "議事録";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionItem {
    pub task: String,
    pub assignee: Option<String>,
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MinutesStructure {
    pub title: String,
    pub participants: Vec<String>,
    pub summary: String,
    pub key_points: Vec<String>,
    pub action_items: Vec<ActionItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Summary,
    Participants,
    KeyPoints,
    Actions,
}

/// Route every line into its section and collect the typed fields.
pub fn extract_structure(markdown: &str) -> MinutesStructure {
    let assignee_re = Regex::new(r"担当[者人]?[：:]\s*(\S+)").expect("static pattern");
    let due_re = Regex::new(r"期限[：:]\s*(\S+)").expect("static pattern");

    let mut structure = MinutesStructure {
        title: FALLBACK_TITLE.to_string(),
        ..MinutesStructure::default()
    };
    let mut title_seen = false;
    let mut section = Section::None;
    let mut summary_lines: Vec<String> = Vec::new();

    for raw in markdown.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if !title_seen {
            if let Some(heading) = line.strip_prefix("# ") {
                structure.title = heading.trim().to_string();
                title_seen = true;
                continue;
            }
        }

        if let Some((next, inline)) = classify_section(line) {
            section = next;
            if let Some(rest) = inline {
                collect_line(
                    rest,
                    section,
                    &mut structure,
                    &mut summary_lines,
                    &assignee_re,
                    &due_re,
                );
            }
            continue;
        }

        // Any other heading closes the current section.
        if line.starts_with('#') {
            section = Section::None;
            continue;
        }

        collect_line(
            line,
            section,
            &mut structure,
            &mut summary_lines,
            &assignee_re,
            &due_re,
        );
    }

    structure.summary = summary_lines.join("\n");
    structure
}

/// A line opens a section when it contains one of the routing keywords.
/// Text after a `：`/`:` on the same line is treated as inline content.
fn classify_section(line: &str) -> Option<(Section, Option<&str>)> {
    let section = if line.contains("アクション") || line.contains("TODO") || line.contains("ToDo")
    {
        Section::Actions
    } else if line.contains("参加者") {
        Section::Participants
    } else if line.contains("主要") || line.contains("ポイント") || line.contains("重要") {
        Section::KeyPoints
    } else if line.contains("要約") || line.contains("サマリー") {
        Section::Summary
    } else {
        return None;
    };

    let inline = line
        .split_once('：')
        .or_else(|| line.split_once(':'))
        .map(|(_, rest)| rest.trim())
        .filter(|rest| !rest.is_empty());
    Some((section, inline))
}

fn collect_line(
    line: &str,
    section: Section,
    structure: &mut MinutesStructure,
    summary_lines: &mut Vec<String>,
    assignee_re: &Regex,
    due_re: &Regex,
) {
    match section {
        Section::None => {}
        Section::Summary => summary_lines.push(line.to_string()),
        Section::Participants => {
            let cleaned = strip_bullet(line).unwrap_or(line);
            for name in cleaned.split(['、', ',']) {
                let name = name.trim();
                if !name.is_empty() {
                    structure.participants.push(name.to_string());
                }
            }
        }
        Section::KeyPoints => {
            if let Some(point) = strip_bullet(line) {
                if !point.is_empty() {
                    structure.key_points.push(point.to_string());
                }
            }
        }
        Section::Actions => {
            if let Some(item) = strip_bullet(line) {
                if item.is_empty() {
                    return;
                }
                let assignee = assignee_re
                    .captures(item)
                    .map(|c| c[1].trim_matches(['）', ')', '、', ',']).to_string());
                let due_date = due_re
                    .captures(item)
                    .map(|c| c[1].trim_matches(['）', ')', '、', ',']).to_string());
                let mut task = assignee_re.replace(item, "").to_string();
                task = due_re.replace(&task, "").to_string();
                let task = task
                    .trim_matches([' ', '　', '、', ',', '（', '）', '(', ')', '／', '/'])
                    .to_string();
                structure.action_items.push(ActionItem {
                    task: if task.is_empty() {
                        item.to_string()
                    } else {
                        task
                    },
                    assignee,
                    due_date,
                });
            }
        }
    }
}

/// List lines start with `-`, `*`, or `・`.
fn strip_bullet(line: &str) -> Option<&str> {
    line.strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix('・'))
        .or_else(|| line.strip_prefix('-').filter(|r| !r.starts_with('-')))
        .map(str::trim)
}

/// Greedily accumulate complete sentences (split on `。！？`) while the
/// result stays within the limit; when no sentence fits, hard-truncate to
/// `limit - 3` characters plus `...`.
pub fn shorten_summary(text: &str, limit: usize) -> String {
    let text = text.trim();
    let total_chars = text.chars().count();

    let mut sentences: Vec<String> = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if matches!(c, '。' | '！' | '？') {
            sentences.push(std::mem::take(&mut current));
        }
    }

    let mut accumulated = String::new();
    let mut accumulated_chars = 0usize;
    for sentence in &sentences {
        let len = sentence.chars().count();
        if accumulated_chars + len > limit {
            break;
        }
        accumulated.push_str(sentence);
        accumulated_chars += len;
    }

    if !accumulated.is_empty() {
        return accumulated;
    }
    if total_chars <= limit {
        return text.to_string();
    }
    let cut: String = text.chars().take(limit.saturating_sub(3)).collect();
    format!("{}...", cut)
}

pub fn shorten_summary_default(text: &str) -> String {
    shorten_summary(text, SUMMARY_CHAR_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# 週次定例会議\n\n## 要約\n今週の進捗を確認した。リリースは予定どおり。\n\n## 参加者\n田中、佐藤, 鈴木\n\n## 主要ポイント\n- リリース日は8月15日に確定\n* 予算は据え置き\n・品質課題は解消済み\nこの行は箇条書きではないので無視される\n\n## アクションアイテム\n- リリースノート作成 担当者：田中 期限：2026-08-10\n- ステージング検証 担当: 佐藤\n";

    #[test]
    fn title_comes_from_first_heading() {
        let s = extract_structure(SAMPLE);
        assert_eq!(s.title, "週次定例会議");
    }

    #[test]
    fn missing_title_uses_fallback() {
        let s = extract_structure("## 要約\n本文のみ。");
        assert_eq!(s.title, FALLBACK_TITLE);
    }

    #[test]
    fn participants_split_on_both_separators() {
        let s = extract_structure(SAMPLE);
        assert_eq!(s.participants, vec!["田中", "佐藤", "鈴木"]);
    }

    #[test]
    fn key_points_take_only_list_lines() {
        let s = extract_structure(SAMPLE);
        assert_eq!(
            s.key_points,
            vec![
                "リリース日は8月15日に確定",
                "予算は据え置き",
                "品質課題は解消済み"
            ]
        );
    }

    #[test]
    fn action_items_parse_assignee_and_due_date() {
        let s = extract_structure(SAMPLE);
        assert_eq!(s.action_items.len(), 2);
        assert_eq!(s.action_items[0].task, "リリースノート作成");
        assert_eq!(s.action_items[0].assignee.as_deref(), Some("田中"));
        assert_eq!(s.action_items[0].due_date.as_deref(), Some("2026-08-10"));
        assert_eq!(s.action_items[1].task, "ステージング検証");
        assert_eq!(s.action_items[1].assignee.as_deref(), Some("佐藤"));
        assert!(s.action_items[1].due_date.is_none());
    }

    #[test]
    fn summary_collects_section_lines() {
        let s = extract_structure(SAMPLE);
        assert_eq!(s.summary, "今週の進捗を確認した。リリースは予定どおり。");
    }

    #[test]
    fn inline_participants_after_colon() {
        let s = extract_structure("参加者：山田、高橋\n");
        assert_eq!(s.participants, vec!["山田", "高橋"]);
    }

    #[test]
    fn shorten_keeps_whole_sentences_within_limit() {
        let text = "短い文。これは二つ目の文でやや長い。三文目はもっともっと長くて入らないはず。";
        let result = shorten_summary(text, 20);
        assert_eq!(result, "短い文。");
        assert!(result.chars().count() <= 20);
    }

    #[test]
    fn shorten_accumulates_multiple_fitting_sentences() {
        let result = shorten_summary("一文目。二文目。三文目。", 10);
        assert_eq!(result, "一文目。二文目。");
    }

    #[test]
    fn shorten_truncates_when_no_sentence_fits() {
        let text: String = "あ".repeat(80);
        let result = shorten_summary(&text, 50);
        assert_eq!(result.chars().count(), 50);
        assert!(result.ends_with("..."));
        assert!(result.starts_with("あああ"));
    }

    #[test]
    fn shorten_returns_short_fragment_verbatim() {
        // No sentence terminator, but already within the limit.
        assert_eq!(shorten_summary("まとめのみ", 50), "まとめのみ");
    }
}
