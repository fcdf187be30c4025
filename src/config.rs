use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

use crate::constants::{DEFAULT_SEGMENT_SECONDS, ORPHAN_MAX_AGE_HOURS};

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_transcribe_model() -> String {
    "whisper-1".to_string()
}

fn default_minutes_model() -> String {
    "gpt-4.1".to_string()
}

fn default_summary_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_segment_seconds() -> u32 {
    DEFAULT_SEGMENT_SECONDS
}

fn default_template_id() -> String {
    "meeting-standard".to_string()
}

fn default_orphan_max_age_hours() -> u64 {
    ORPHAN_MAX_AGE_HOURS
}

/// Runtime configuration for one processing host. Built from defaults, then
/// `.env`/`.env.local` next to the working directory, then `MINUTESGEN_*`
/// process environment, in that order of increasing precedence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL shared by the ASR and chat endpoints.
    pub api_base: String,
    /// Bearer token for both endpoints.
    pub api_key: String,
    /// ASR model id.
    pub transcribe_model: String,
    /// Chat model id for minutes generation.
    pub minutes_model: String,
    /// Cheapest chat model, used only for the summary polish pass.
    pub summary_model: String,
    /// ISO language code for transcription; empty string = auto-detect.
    pub language: String,
    /// Request word-level timestamps from the ASR service.
    pub request_timestamps: bool,
    /// Slice length handed to the segment muxer.
    pub segment_seconds: u32,
    /// Active prompt template id.
    pub template_id: String,
    /// Optional free-form suffix appended to the composed prompt.
    pub custom_prompt: Option<String>,
    /// Age bound for the intake orphan sweep.
    pub orphan_max_age_hours: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: String::new(),
            transcribe_model: default_transcribe_model(),
            minutes_model: default_minutes_model(),
            summary_model: default_summary_model(),
            language: String::new(),
            request_timestamps: false,
            segment_seconds: default_segment_seconds(),
            template_id: default_template_id(),
            custom_prompt: None,
            orphan_max_age_hours: default_orphan_max_age_hours(),
        }
    }
}

impl AppConfig {
    /// Defaults, overlaid with `.env` files and process environment.
    pub fn from_env() -> Self {
        load_local_env();
        let mut config = Self::default();

        if let Some(value) = env_nonempty("MINUTESGEN_API_BASE") {
            match url::Url::parse(&value) {
                Ok(_) => config.api_base = value.trim_end_matches('/').to_string(),
                Err(e) => warn!("ignoring invalid MINUTESGEN_API_BASE '{}': {}", value, e),
            }
        }
        if let Some(value) = env_nonempty("MINUTESGEN_API_KEY") {
            config.api_key = value;
        }
        if let Some(value) = env_nonempty("MINUTESGEN_TRANSCRIBE_MODEL") {
            config.transcribe_model = value;
        }
        if let Some(value) = env_nonempty("MINUTESGEN_MINUTES_MODEL") {
            config.minutes_model = value;
        }
        if let Some(value) = env_nonempty("MINUTESGEN_SUMMARY_MODEL") {
            config.summary_model = value;
        }
        if let Some(value) = env_nonempty("MINUTESGEN_LANGUAGE") {
            config.language = value;
        }
        if let Some(value) = env_nonempty("MINUTESGEN_SEGMENT_SECONDS") {
            if let Ok(seconds) = value.parse::<u32>() {
                if seconds > 0 {
                    config.segment_seconds = seconds;
                }
            }
        }
        if let Some(value) = env_nonempty("MINUTESGEN_TEMPLATE") {
            config.template_id = value;
        }

        config
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(_) => None,
    }
}

/// Load `.env.local` / `.env` from the working directory and up to two
/// parents. Existing process variables are never overwritten.
fn load_local_env() {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let parent = cwd.parent().map(|p| p.to_path_buf());
    let grandparent = parent
        .as_ref()
        .and_then(|p| p.parent().map(|gp| gp.to_path_buf()));
    let mut candidates = vec![cwd.join(".env.local"), cwd.join(".env")];
    if let Some(parent) = parent {
        candidates.push(parent.join(".env.local"));
        candidates.push(parent.join(".env"));
    }
    if let Some(grandparent) = grandparent {
        candidates.push(grandparent.join(".env.local"));
        candidates.push(grandparent.join(".env"));
    }

    for path in candidates {
        if !path.exists() {
            continue;
        }
        if let Ok(raw) = fs::read_to_string(&path) {
            for line in raw.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let mut parts = line.splitn(2, '=');
                let key = parts.next().unwrap_or("").trim();
                let value = parts.next().unwrap_or("").trim();
                if key.is_empty() || value.is_empty() {
                    continue;
                }
                if std::env::var(key).is_err() {
                    std::env::set_var(key, value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.segment_seconds, 600);
        assert_eq!(config.language, "");
        assert!(!config.request_timestamps);
        assert_eq!(config.api_base, "https://api.openai.com/v1");
    }

    #[test]
    fn deserializes_partial_config() {
        let config: AppConfig =
            serde_json::from_str(r#"{"minutes_model":"gpt-4o","segment_seconds":300}"#).unwrap();
        assert_eq!(config.minutes_model, "gpt-4o");
        assert_eq!(config.segment_seconds, 300);
        assert_eq!(config.transcribe_model, "whisper-1");
    }
}
