// Prompt templates and the fixed instruction blocks appended to every
// minutes-generation request.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    Preset,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateCategory {
    General,
    Meeting,
    Interview,
    Presentation,
    Brainstorm,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: String,
    pub kind: TemplateKind,
    pub category: TemplateCategory,
    pub body: String,
    pub tags: Vec<String>,
}

impl PromptTemplate {
    pub fn custom(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TemplateKind::Custom,
            category: TemplateCategory::Custom,
            body: body.into(),
            tags: Vec::new(),
        }
    }
}

/// The model must return all three formats as fenced blocks, in this order,
/// with these language tags.
pub const MULTI_FORMAT_INSTRUCTION: &str = "\
以下の3つの形式で議事録を出力してください。必ずこの順番で、指定された言語タグ付きのコードブロックとして出力すること。

1. ```html で始まるHTMLコードブロック(完全なHTML文書)
2. ```rtf で始まるRTFコードブロック
3. ```markdown で始まるMarkdownコードブロック

各ブロックは独立した完全な議事録であること。ブロックの外に説明文を書かないこと。";

/// Grounding rules: no invented content, explicit markers for gaps.
pub const ANTI_HALLUCINATION_INSTRUCTION: &str = "\
重要な制約:
- 文字起こしに含まれない発言・決定事項・数値を創作しないこと。
- 聞き取れない箇所は [不明瞭] と記載すること。
- 音声が不明瞭な箇所は [音声不明瞭] と記載すること。
- 発言が途中で切れている箇所は [発言途中] と記載すること。
- 参加者名は文字起こしに現れたものだけを使うこと。";

/// System message fixing the assistant role for the minutes call.
pub const MINUTES_SYSTEM_ROLE: &str =
    "あなたは会議の文字起こしから正確な議事録を作成する専門アシスタントです。";

/// System message for the lightweight summary polish call.
pub const SUMMARY_SYSTEM_ROLE: &str =
    "あなたは文章を簡潔に整える編集アシスタントです。改行は保持してください。";

/// Built-in template catalogue. Exactly one template is active per run,
/// selected by id through the configuration.
pub fn preset_templates() -> Vec<PromptTemplate> {
    vec![
        PromptTemplate {
            id: "general-standard".to_string(),
            kind: TemplateKind::Preset,
            category: TemplateCategory::General,
            body: "以下の文字起こしから、要約・主要ポイント・決定事項を含む記録を作成してください。"
                .to_string(),
            tags: vec!["汎用".to_string()],
        },
        PromptTemplate {
            id: "meeting-standard".to_string(),
            kind: TemplateKind::Preset,
            category: TemplateCategory::Meeting,
            body: "以下の会議の文字起こしから議事録を作成してください。\
タイトル、参加者、要約、主要ポイント、アクションアイテム(担当者と期限を含む)の見出しを立てること。"
                .to_string(),
            tags: vec!["会議".to_string(), "議事録".to_string()],
        },
        PromptTemplate {
            id: "interview-standard".to_string(),
            kind: TemplateKind::Preset,
            category: TemplateCategory::Interview,
            body: "以下のインタビューの文字起こしから、質問と回答を整理した記録を作成してください。\
要約と主要ポイントの見出しを含めること。"
                .to_string(),
            tags: vec!["インタビュー".to_string()],
        },
        PromptTemplate {
            id: "presentation-standard".to_string(),
            kind: TemplateKind::Preset,
            category: TemplateCategory::Presentation,
            body: "以下のプレゼンテーションの文字起こしから、発表内容の記録を作成してください。\
要約、主要ポイント、質疑応答の見出しを立てること。"
                .to_string(),
            tags: vec!["プレゼン".to_string()],
        },
        PromptTemplate {
            id: "brainstorm-standard".to_string(),
            kind: TemplateKind::Preset,
            category: TemplateCategory::Brainstorm,
            body: "以下のブレインストーミングの文字起こしから、出されたアイデアを整理した記録を作成してください。\
要約、アイデア一覧、次のアクションの見出しを立てること。"
                .to_string(),
            tags: vec!["ブレスト".to_string()],
        },
    ]
}

pub fn find_template(id: &str) -> Option<PromptTemplate> {
    preset_templates().into_iter().find(|t| t.id == id)
}

/// Compose the full user prompt: template body, the two fixed instruction
/// blocks, the transcript, then any custom suffix.
pub fn compose_prompt(
    template: &PromptTemplate,
    transcript: &str,
    custom_suffix: Option<&str>,
) -> String {
    let mut prompt = String::with_capacity(
        template.body.len() + transcript.len() + 1024,
    );
    prompt.push_str(&template.body);
    prompt.push_str("\n\n");
    prompt.push_str(MULTI_FORMAT_INSTRUCTION);
    prompt.push_str("\n\n");
    prompt.push_str(ANTI_HALLUCINATION_INSTRUCTION);
    prompt.push_str("\n\n文字起こし:\n");
    prompt.push_str(transcript);
    if let Some(suffix) = custom_suffix {
        let trimmed = suffix.trim();
        if !trimmed.is_empty() {
            prompt.push_str("\n\n追加指示:\n");
            prompt.push_str(trimmed);
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_covers_the_preset_categories() {
        let templates = preset_templates();
        assert_eq!(templates.len(), 5);
        assert!(templates.iter().all(|t| t.kind == TemplateKind::Preset));
        assert!(templates
            .iter()
            .any(|t| t.category == TemplateCategory::Brainstorm));
    }

    #[test]
    fn lookup_by_id() {
        assert!(find_template("meeting-standard").is_some());
        assert!(find_template("nope").is_none());
    }

    #[test]
    fn prompt_composition_order() {
        let template = find_template("meeting-standard").unwrap();
        let prompt = compose_prompt(&template, "本日の議題は…", Some("箇条書き多め"));

        let body_pos = prompt.find(&template.body).unwrap();
        let format_pos = prompt.find("```html").unwrap();
        let guard_pos = prompt.find("[不明瞭]").unwrap();
        let transcript_pos = prompt.find("本日の議題は…").unwrap();
        let suffix_pos = prompt.find("箇条書き多め").unwrap();
        assert!(body_pos < format_pos);
        assert!(format_pos < guard_pos);
        assert!(guard_pos < transcript_pos);
        assert!(transcript_pos < suffix_pos);
    }

    #[test]
    fn empty_suffix_is_omitted() {
        let template = find_template("general-standard").unwrap();
        let prompt = compose_prompt(&template, "text", Some("   "));
        assert!(!prompt.contains("追加指示"));
    }
}
