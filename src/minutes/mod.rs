// Minutes Assembler — one synchronous chat request produces three
// co-generated formats; parsing is deterministic with per-format fallbacks,
// and the Word artifact is synthesized from the Markdown rendition.

pub mod docx;
pub mod extract;
pub mod parser;
pub mod prompts;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

use crate::chat::ChatClient;
use crate::config::AppConfig;
use crate::constants::{
    MINUTES_MAX_TOKENS, SUMMARY_CHAR_LIMIT, SUMMARY_POLISH_MAX_TOKENS, WORD_FAILED_MARKER,
};
use crate::errors::CoreError;
use crate::progress::{LogLevel, ProcessingStage, ProgressReporter};
use crate::util::CancelToken;

use self::extract::{extract_structure, shorten_summary_default, ActionItem};
use self::parser::{html_to_markdown, markdown_to_html, parse_formats};
use self::prompts::{
    compose_prompt, find_template, PromptTemplate, MINUTES_SYSTEM_ROLE, SUMMARY_SYSTEM_ROLE,
};

/// The three co-generated renditions. `word` carries base64 container bytes,
/// or the literal failure marker when generation failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinutesOutputs {
    pub markdown: String,
    pub html: String,
    pub word: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinutesMetadata {
    pub model: String,
    pub generated_at: String,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinutesArtifact {
    pub title: String,
    pub participants: Vec<String>,
    pub summary: String,
    pub key_points: Vec<String>,
    pub action_items: Vec<ActionItem>,
    pub outputs: MinutesOutputs,
    /// Decoded size of the Word artifact; 0 when generation failed.
    pub word_size: u64,
    pub word_failed: bool,
    pub metadata: MinutesMetadata,
}

/// Stateless across runs; everything it needs arrives at construction.
pub struct MinutesAssembler {
    chat: ChatClient,
    minutes_model: String,
    summary_model: String,
    template: PromptTemplate,
    custom_prompt: Option<String>,
}

impl MinutesAssembler {
    pub fn new(config: &AppConfig) -> Result<Self, CoreError> {
        let chat = ChatClient::new(config)?;
        Ok(Self::from_parts(chat, config))
    }

    /// Assembler over an existing chat client (tests shrink its retries).
    pub fn from_parts(chat: ChatClient, config: &AppConfig) -> Self {
        let template = find_template(&config.template_id).unwrap_or_else(|| {
            warn!(
                "unknown template id '{}', using the meeting preset",
                config.template_id
            );
            find_template("meeting-standard").expect("built-in template")
        });
        Self {
            chat,
            minutes_model: config.minutes_model.clone(),
            summary_model: config.summary_model.clone(),
            template,
            custom_prompt: config.custom_prompt.clone(),
        }
    }

    /// Transcript in, triple-format artifact out.
    pub fn generate(
        &self,
        transcript: &str,
        cancel: &CancelToken,
        progress: &ProgressReporter,
    ) -> Result<MinutesArtifact, CoreError> {
        cancel.check()?;
        let started = Instant::now();

        progress.update(ProcessingStage::Assembling, 5.0, "議事録を生成中");
        let prompt = compose_prompt(&self.template, transcript, self.custom_prompt.as_deref());
        let content = self.chat.complete(
            &self.minutes_model,
            MINUTES_SYSTEM_ROLE,
            &prompt,
            MINUTES_MAX_TOKENS,
            cancel,
        )?;
        if content.trim().is_empty() {
            return Err(CoreError::MinutesParseFailed(
                "chat response was empty".to_string(),
            ));
        }

        cancel.check()?;
        progress.update(ProcessingStage::Assembling, 60.0, "応答を解析中");
        let formats = parse_formats(&content);

        // Per-format fallbacks. When nothing was fenced at all, the whole
        // response is treated as Markdown and the Word artifact is marked
        // failed rather than built from unvetted prose.
        let mut word_failed = formats.is_empty();
        let markdown = match (&formats.markdown, &formats.html) {
            (Some(markdown), _) => markdown.clone(),
            (None, Some(html)) => html_to_markdown(html),
            (None, None) => content.trim().to_string(),
        };
        let html = match &formats.html {
            Some(html) => html.clone(),
            None => markdown_to_html(&markdown),
        };

        let (word, word_size) = if word_failed {
            (WORD_FAILED_MARKER.to_string(), 0)
        } else {
            match docx::build_docx(&markdown) {
                Ok(bytes) => {
                    let size = bytes.len() as u64;
                    (BASE64.encode(bytes), size)
                }
                Err(e) => {
                    warn!("Word artifact generation failed: {}", e);
                    word_failed = true;
                    (WORD_FAILED_MARKER.to_string(), 0)
                }
            }
        };
        if word_failed {
            progress.log(
                ProcessingStage::Assembling,
                70.0,
                "Word出力の生成に失敗",
                LogLevel::Warning,
                "Word形式の生成に失敗したため、MarkdownとHTMLのみ出力します",
            );
        }

        cancel.check()?;
        progress.update(ProcessingStage::Assembling, 80.0, "構造化データを抽出中");
        let structure = extract_structure(&markdown);
        let shortened = shorten_summary_default(&structure.summary);
        let summary = self.polish_summary(&shortened, cancel)?;

        let artifact = MinutesArtifact {
            title: structure.title,
            participants: structure.participants,
            summary,
            key_points: structure.key_points,
            action_items: structure.action_items,
            outputs: MinutesOutputs {
                markdown,
                html,
                word,
            },
            word_size,
            word_failed,
            metadata: MinutesMetadata {
                model: self.minutes_model.clone(),
                generated_at: chrono::Utc::now().to_rfc3339(),
                processing_time_ms: started.elapsed().as_millis() as u64,
            },
        };
        info!(
            "minutes assembled in {} ms ({} key points, {} action items)",
            artifact.metadata.processing_time_ms,
            artifact.key_points.len(),
            artifact.action_items.len()
        );
        Ok(artifact)
    }

    /// One lightweight rewrite of the shortened summary against the cheapest
    /// model. Any failure other than cancellation falls back silently.
    fn polish_summary(&self, shortened: &str, cancel: &CancelToken) -> Result<String, CoreError> {
        if shortened.is_empty() {
            return Ok(String::new());
        }
        let prompt = format!(
            "次の要約を{}文字以内で自然な日本語に整えてください。改行は保持してください。\n\n{}",
            SUMMARY_CHAR_LIMIT, shortened
        );
        match self.chat.complete(
            &self.summary_model,
            SUMMARY_SYSTEM_ROLE,
            &prompt,
            SUMMARY_POLISH_MAX_TOKENS,
            cancel,
        ) {
            Ok(polished) => {
                let polished = polished.trim();
                if !polished.is_empty() && polished.chars().count() <= SUMMARY_CHAR_LIMIT {
                    Ok(polished.to_string())
                } else {
                    Ok(shortened.to_string())
                }
            }
            Err(CoreError::Cancelled) => Err(CoreError::Cancelled),
            Err(e) => {
                warn!("summary polish failed, keeping shortened text: {}", e);
                Ok(shortened.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::transcription::http_testing::{ScriptedResponse, ScriptedServer};
    use std::time::Duration;

    fn assembler(base_url: &str) -> MinutesAssembler {
        let config = AppConfig {
            api_base: base_url.to_string(),
            api_key: "test-key".to_string(),
            ..AppConfig::default()
        };
        let chat = ChatClient::with_retry(
            &config,
            RetryPolicy::new(2, Duration::from_millis(1), 2, Duration::from_millis(5)),
        )
        .unwrap();
        MinutesAssembler::from_parts(chat, &config)
    }

    fn chat_body(content: &str) -> String {
        serde_json::to_string(&serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        }))
        .unwrap()
    }

    const FULL_RESPONSE: &str = "```html\n<h1>定例会議</h1>\n```\n```rtf\n{\\rtf1 x}\n```\n```markdown\n# 定例会議\n## 要約\n進捗を確認した。\n## 主要ポイント\n- 予定どおり\n```";

    #[test]
    fn full_response_produces_three_outputs() {
        let server = ScriptedServer::start(vec![
            ScriptedResponse::new(200, &chat_body(FULL_RESPONSE)),
            // Summary polish call.
            ScriptedResponse::new(200, &chat_body("進捗は予定どおり。")),
        ]);
        let assembler = assembler(&server.base_url);
        let artifact = assembler
            .generate("文字起こし本文", &CancelToken::new(), &ProgressReporter::disabled())
            .unwrap();

        assert_eq!(artifact.title, "定例会議");
        assert!(artifact.outputs.markdown.contains("## 要約"));
        assert_eq!(artifact.outputs.html, "<h1>定例会議</h1>");
        assert!(!artifact.word_failed);
        assert!(artifact.word_size > 0);
        // Word bytes decode back to a ZIP container.
        let bytes = BASE64.decode(&artifact.outputs.word).unwrap();
        assert_eq!(&bytes[..2], &b"PK"[..]);
        assert_eq!(artifact.summary, "進捗は予定どおり。");
        assert_eq!(artifact.metadata.model, "gpt-4.1");
    }

    #[test]
    fn markdown_only_response_synthesizes_html_and_fails_word() {
        // No fenced blocks at all: whole content treated as Markdown.
        let server = ScriptedServer::start(vec![
            ScriptedResponse::new(200, &chat_body("# 会議\n## 要約\n要点のみ。")),
            ScriptedResponse::new(200, &chat_body("要点のみ。")),
        ]);
        let assembler = assembler(&server.base_url);
        let artifact = assembler
            .generate("本文", &CancelToken::new(), &ProgressReporter::disabled())
            .unwrap();

        assert!(artifact.outputs.markdown.starts_with("# 会議"));
        assert!(artifact.outputs.html.contains("<meta charset=\"UTF-8\">"));
        assert!(artifact.word_failed);
        assert_eq!(artifact.outputs.word, WORD_FAILED_MARKER);
        assert_eq!(artifact.word_size, 0);
    }

    #[test]
    fn fenced_markdown_without_html_builds_word() {
        let server = ScriptedServer::start(vec![
            ScriptedResponse::new(200, &chat_body("```markdown\n# 会議\n```")),
            ScriptedResponse::new(200, &chat_body("短い。")),
        ]);
        let assembler = assembler(&server.base_url);
        let artifact = assembler
            .generate("本文", &CancelToken::new(), &ProgressReporter::disabled())
            .unwrap();
        assert!(!artifact.word_failed);
        assert!(artifact.outputs.html.starts_with("<!DOCTYPE html>"));
    }

    #[test]
    fn html_only_response_derives_markdown() {
        let server = ScriptedServer::start(vec![
            ScriptedResponse::new(
                200,
                &chat_body("```html\n<h1>会議</h1><ul><li>一点</li></ul>\n```"),
            ),
            ScriptedResponse::new(200, &chat_body("ok")),
        ]);
        let assembler = assembler(&server.base_url);
        let artifact = assembler
            .generate("本文", &CancelToken::new(), &ProgressReporter::disabled())
            .unwrap();
        assert!(artifact.outputs.markdown.starts_with("# 会議"));
        assert!(artifact.outputs.markdown.contains("- 一点"));
        assert!(!artifact.word_failed);
    }

    #[test]
    fn polish_failure_falls_back_to_shortened_summary() {
        let server = ScriptedServer::start(vec![
            ScriptedResponse::new(200, &chat_body(FULL_RESPONSE)),
            ScriptedResponse::new(400, "no polish"),
        ]);
        let assembler = assembler(&server.base_url);
        let artifact = assembler
            .generate("本文", &CancelToken::new(), &ProgressReporter::disabled())
            .unwrap();
        assert_eq!(artifact.summary, "進捗を確認した。");
    }

    #[test]
    fn empty_chat_response_is_a_parse_failure() {
        let server = ScriptedServer::start(vec![ScriptedResponse::new(200, &chat_body("  "))]);
        let assembler = assembler(&server.base_url);
        let err = assembler
            .generate("本文", &CancelToken::new(), &ProgressReporter::disabled())
            .unwrap_err();
        assert!(matches!(err, CoreError::MinutesParseFailed(_)));
    }
}
