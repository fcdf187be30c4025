// Chat-completion client used by the minutes assembler. One blocking POST
// per call; the reasoning-model family takes `max_completion_tokens` and no
// temperature, everything else gets `temperature` + `max_tokens`.

use reqwest::header::RETRY_AFTER;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

use crate::config::AppConfig;
use crate::constants::{
    CHAT_BACKOFF_BASE_MS, CHAT_BACKOFF_CAP_MS, CHAT_MAX_ATTEMPTS, CHAT_REQUEST_TIMEOUT_MS,
    MINUTES_TEMPERATURE,
};
use crate::errors::CoreError;
use crate::retry::{parse_retry_after, RetryPolicy};
use crate::util::CancelToken;

pub struct ChatClient {
    http: reqwest::blocking::Client,
    api_base: String,
    api_key: String,
    retry: RetryPolicy,
}

impl ChatClient {
    pub fn new(config: &AppConfig) -> Result<Self, CoreError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(CHAT_REQUEST_TIMEOUT_MS))
            .build()
            .map_err(|e| CoreError::Internal(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            retry: RetryPolicy::new(
                CHAT_MAX_ATTEMPTS,
                Duration::from_millis(CHAT_BACKOFF_BASE_MS),
                2,
                Duration::from_millis(CHAT_BACKOFF_CAP_MS),
            ),
        })
    }

    pub fn with_retry(config: &AppConfig, retry: RetryPolicy) -> Result<Self, CoreError> {
        let mut client = Self::new(config)?;
        client.retry = retry;
        Ok(client)
    }

    /// One completion, retried per the documented schedule.
    pub fn complete(
        &self,
        model: &str,
        system: &str,
        user: &str,
        max_tokens: u32,
        cancel: &CancelToken,
    ) -> Result<String, CoreError> {
        let mut attempt = 0u32;
        loop {
            cancel.check()?;
            attempt += 1;
            match self.submit(model, system, user, max_tokens) {
                Ok(content) => return Ok(content),
                Err((error, retry_after)) if error.is_transient() => {
                    match self.retry.delay_with_retry_after(attempt, retry_after) {
                        Some(delay) => {
                            warn!(
                                "chat attempt {} failed ({}), retrying in {:?}",
                                attempt, error, delay
                            );
                            std::thread::sleep(delay);
                        }
                        None => {
                            return Err(CoreError::ChatPermanent(format!(
                                "retries exhausted after {} attempts: {}",
                                attempt,
                                error.message()
                            )))
                        }
                    }
                }
                Err((error, _)) => return Err(error),
            }
        }
    }

    fn submit(
        &self,
        model: &str,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, (CoreError, Option<Duration>)> {
        let body = build_request_body(model, system, user, max_tokens);
        let url = format!("{}/chat/completions", self.api_base);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                (
                    CoreError::ChatTransient(format!("request failed: {}", e)),
                    None,
                )
            })?;

        let status = response.status();
        if status.is_success() {
            let body: serde_json::Value = response.json().map_err(|e| {
                (
                    CoreError::ChatPermanent(format!("unparseable chat response: {}", e)),
                    None,
                )
            })?;
            return match body
                .get("choices")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_str())
            {
                Some(content) => Ok(content.to_string()),
                None => Err((
                    CoreError::ChatPermanent("chat response has no message content".to_string()),
                    None,
                )),
            };
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let text = response.text().unwrap_or_default();
        let snippet: String = text.chars().take(512).collect();
        let detail = format!("HTTP {}: {}", status.as_u16(), snippet);

        let error = match status.as_u16() {
            401 | 403 => CoreError::Unauthorized(detail),
            429 => CoreError::ChatTransient(detail),
            500..=599 => CoreError::ChatTransient(detail),
            _ => CoreError::ChatPermanent(detail),
        };
        Err((error, retry_after))
    }
}

/// Reasoning-family ids take the newer token parameter and reject explicit
/// temperature.
pub fn is_reasoning_model(model: &str) -> bool {
    let id = model.trim().to_lowercase();
    id.starts_with("o1") || id.starts_with("o3") || id.starts_with("o4") || id.starts_with("gpt-5")
}

fn build_request_body(
    model: &str,
    system: &str,
    user: &str,
    max_tokens: u32,
) -> serde_json::Value {
    let messages = json!([
        {"role": "system", "content": system},
        {"role": "user", "content": user},
    ]);
    if is_reasoning_model(model) {
        json!({
            "model": model,
            "messages": messages,
            "max_completion_tokens": max_tokens,
        })
    } else {
        json!({
            "model": model,
            "messages": messages,
            "temperature": MINUTES_TEMPERATURE,
            "max_tokens": max_tokens,
        })
    }
}
