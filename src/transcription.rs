// Transcription Orchestrator — submits segments to the external ASR service
// one at a time and merges the returned text. Sequential submission bounds
// concurrent network use and memory; each segment file is released as soon
// as its text is in hand.

use reqwest::blocking::multipart::{Form, Part};
use reqwest::header::RETRY_AFTER;
use std::fs;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::constants::{
    ASR_BACKOFF_BASE_MS, ASR_BACKOFF_CAP_MS, ASR_MAX_ATTEMPTS, ASR_REQUEST_TIMEOUT_MS,
    ASR_SAFE_REQUEST_BYTES,
};
use crate::errors::CoreError;
use crate::progress::{ProcessingStage, ProgressReporter};
use crate::retry::{parse_retry_after, RetryPolicy};
use crate::segment_store::SegmentStore;
use crate::segmentation::Segment;
use crate::util::CancelToken;

#[derive(Debug, Clone)]
pub struct TranscriptionOutcome {
    /// Per-segment texts joined with a blank line, empties dropped.
    pub merged: String,
    /// Raw text for every segment, in submission order.
    pub segment_texts: Vec<String>,
}

pub struct AsrClient {
    http: reqwest::blocking::Client,
    api_base: String,
    api_key: String,
    model: String,
    language: String,
    request_timestamps: bool,
    retry: RetryPolicy,
}

impl AsrClient {
    pub fn new(config: &AppConfig) -> Result<Self, CoreError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(ASR_REQUEST_TIMEOUT_MS))
            .build()
            .map_err(|e| CoreError::Internal(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.transcribe_model.clone(),
            language: config.language.clone(),
            request_timestamps: config.request_timestamps,
            retry: RetryPolicy::new(
                ASR_MAX_ATTEMPTS,
                Duration::from_millis(ASR_BACKOFF_BASE_MS),
                2,
                Duration::from_millis(ASR_BACKOFF_CAP_MS),
            ),
        })
    }

    /// Client with an explicit retry schedule (tests shrink the delays).
    pub fn with_retry(config: &AppConfig, retry: RetryPolicy) -> Result<Self, CoreError> {
        let mut client = Self::new(config)?;
        client.retry = retry;
        Ok(client)
    }

    /// Submit every segment in ascending index order and merge the results.
    pub fn transcribe_segments(
        &self,
        segments: &[Segment],
        store: &SegmentStore,
        cancel: &CancelToken,
        progress: &ProgressReporter,
    ) -> Result<TranscriptionOutcome, CoreError> {
        let total = segments.len().max(1) as f32;
        let mut segment_texts = Vec::with_capacity(segments.len());

        for segment in segments {
            cancel.check()?;
            let percentage = segment.index as f32 / total * 100.0;
            progress.update(
                ProcessingStage::Transcribing,
                percentage,
                format!("segment {}/{}", segment.index + 1, segments.len()),
            );

            let text = self.transcribe_one(segment, cancel)?;
            info!(
                "segment {} transcribed ({} chars)",
                segment.name,
                text.chars().count()
            );
            segment_texts.push(text);

            // The WAV has served its purpose; keep peak disk bounded.
            store.release_file(&segment.file_path);

            progress.update(
                ProcessingStage::Transcribing,
                (segment.index + 1) as f32 / total * 100.0,
                format!("segment {}/{} done", segment.index + 1, segments.len()),
            );
        }

        let merged = merge_texts(&segment_texts);
        if merged.is_empty() {
            return Err(CoreError::TranscriptionFailed(
                "no segment produced any text".to_string(),
            ));
        }
        Ok(TranscriptionOutcome {
            merged,
            segment_texts,
        })
    }

    /// One segment, retried per the documented schedule. Transient failures
    /// never escape; exhaustion surfaces as permanent.
    fn transcribe_one(&self, segment: &Segment, cancel: &CancelToken) -> Result<String, CoreError> {
        let mut attempt = 0u32;
        loop {
            cancel.check()?;
            attempt += 1;
            match self.submit(segment) {
                Ok(text) => return Ok(text),
                Err((error, retry_after)) if error.is_transient() => {
                    match self.retry.delay_with_retry_after(attempt, retry_after) {
                        Some(delay) => {
                            warn!(
                                "ASR attempt {} for {} failed ({}), retrying in {:?}",
                                attempt, segment.name, error, delay
                            );
                            std::thread::sleep(delay);
                        }
                        None => {
                            return Err(CoreError::AsrPermanent(format!(
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

    /// One multipart POST to `{base}/audio/transcriptions`.
    fn submit(&self, segment: &Segment) -> Result<String, (CoreError, Option<Duration>)> {
        let bytes = fs::read(&segment.file_path).map_err(|e| {
            (
                CoreError::Internal(format!("cannot read segment {:?}: {}", segment.file_path, e)),
                None,
            )
        })?;
        if bytes.len() as u64 > ASR_SAFE_REQUEST_BYTES {
            // The service-side ceiling is higher and service-defined; flag
            // that we are past the safety threshold rather than refusing.
            warn!(
                "segment {} is {} bytes, over the {} byte safety threshold",
                segment.name,
                bytes.len(),
                ASR_SAFE_REQUEST_BYTES
            );
        }

        let part = Part::bytes(bytes)
            .file_name(segment.name.clone())
            .mime_str("audio/wav")
            .map_err(|e| (CoreError::Internal(format!("multipart build failed: {}", e)), None))?;
        let mut form = Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", self.language.clone());
        if let Some(format) = response_format(&self.model, self.request_timestamps) {
            form = form.text("response_format", format);
        }

        let url = format!("{}/audio/transcriptions", self.api_base);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .map_err(|e| {
                (
                    CoreError::AsrTransient(format!("request failed: {}", e)),
                    None,
                )
            })?;

        let status = response.status();
        if status.is_success() {
            let body: serde_json::Value = response.json().map_err(|e| {
                (
                    CoreError::AsrPermanent(format!("unparseable ASR response: {}", e)),
                    None,
                )
            })?;
            return match body.get("text").and_then(|t| t.as_str()) {
                Some(text) => Ok(text.to_string()),
                None => Err((
                    CoreError::AsrPermanent("ASR response has no text field".to_string()),
                    None,
                )),
            };
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().unwrap_or_default();
        let detail = format!("HTTP {}: {}", status.as_u16(), truncate(&body, 512));

        let error = match status.as_u16() {
            401 | 403 => CoreError::Unauthorized(detail),
            429 => CoreError::AsrTransient(detail),
            500..=599 => CoreError::AsrTransient(detail),
            _ => CoreError::AsrPermanent(detail),
        };
        Err((error, retry_after))
    }
}

/// `response_format` selection: omitted unless timestamps were requested;
/// the low-level transcribe models take `json`, whisper-generation models
/// take `verbose_json`.
fn response_format(model: &str, request_timestamps: bool) -> Option<&'static str> {
    if !request_timestamps {
        return None;
    }
    if model.contains("transcribe") {
        Some("json")
    } else {
        Some("verbose_json")
    }
}

/// Faithful concatenation only: trim, drop empties, blank-line separator.
fn merge_texts(texts: &[String]) -> String {
    texts
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test support: scripted loopback HTTP responder
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod http_testing {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    pub struct ScriptedResponse {
        pub status: u16,
        pub headers: Vec<(String, String)>,
        pub body: String,
    }

    impl ScriptedResponse {
        pub fn new(status: u16, body: &str) -> Self {
            Self {
                status,
                headers: Vec::new(),
                body: body.to_string(),
            }
        }
    }

    /// One-shot HTTP server that plays back a fixed response script, one
    /// response per connection, and counts the requests it served. The
    /// serving thread is detached; it dies with the test process.
    pub struct ScriptedServer {
        pub base_url: String,
        pub hits: Arc<AtomicUsize>,
    }

    impl ScriptedServer {
        pub fn start(script: Vec<ScriptedResponse>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap();
            let hits = Arc::new(AtomicUsize::new(0));
            let hits_inner = hits.clone();

            std::thread::spawn(move || {
                for response in script {
                    let Ok((mut stream, _)) = listener.accept() else {
                        return;
                    };
                    hits_inner.fetch_add(1, Ordering::SeqCst);
                    drain_request(&mut stream);

                    let reason = match response.status {
                        200 => "OK",
                        400 => "Bad Request",
                        429 => "Too Many Requests",
                        503 => "Service Unavailable",
                        _ => "Response",
                    };
                    let mut head = format!(
                        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nContent-Type: application/json\r\nConnection: close\r\n",
                        response.status,
                        reason,
                        response.body.len()
                    );
                    for (name, value) in &response.headers {
                        head.push_str(&format!("{}: {}\r\n", name, value));
                    }
                    head.push_str("\r\n");
                    let _ = stream.write_all(head.as_bytes());
                    let _ = stream.write_all(response.body.as_bytes());
                }
            });

            Self {
                base_url: format!("http://{}", addr),
                hits,
            }
        }

        pub fn hit_count(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    /// Read the full request (headers + Content-Length body) so the client
    /// never sees a broken pipe.
    fn drain_request(stream: &mut std::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let mut header_end = None;
        while header_end.is_none() {
            match stream.read(&mut chunk) {
                Ok(0) => return,
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    header_end = buf.windows(4).position(|w| w == b"\r\n\r\n");
                }
                Err(_) => return,
            }
        }
        let header_end = header_end.unwrap() + 4;
        let headers = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let content_length = headers
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                if name.eq_ignore_ascii_case("content-length") {
                    value.trim().parse::<usize>().ok()
                } else {
                    None
                }
            })
            .unwrap_or(0);

        let mut remaining = content_length.saturating_sub(buf.len() - header_end);
        while remaining > 0 {
            match stream.read(&mut chunk) {
                Ok(0) => return,
                Ok(n) => remaining = remaining.saturating_sub(n),
                Err(_) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::http_testing::{ScriptedResponse, ScriptedServer};
    use super::*;
    use crate::segment_store::SegmentStore;
    use std::path::PathBuf;

    fn test_client(base_url: &str) -> AsrClient {
        let config = AppConfig {
            api_base: base_url.to_string(),
            api_key: "test-key".to_string(),
            ..AppConfig::default()
        };
        AsrClient::with_retry(
            &config,
            RetryPolicy::new(3, Duration::from_millis(1), 2, Duration::from_millis(10)),
        )
        .unwrap()
    }

    fn fixture_segment(dir: &std::path::Path, index: u32) -> Segment {
        let name = format!("segment_{:03}.wav", index);
        let path = dir.join(&name);
        std::fs::write(&path, b"RIFF....WAVEfmt fake").unwrap();
        Segment {
            index,
            name,
            file_path: path,
            duration: 1.0,
            start_time: index as f64,
            end_time: index as f64 + 1.0,
        }
    }

    #[test]
    fn merge_trims_drops_empties_and_joins() {
        let texts = vec![
            "  こんにちは  ".to_string(),
            "".to_string(),
            "   ".to_string(),
            "second part".to_string(),
        ];
        assert_eq!(merge_texts(&texts), "こんにちは\n\nsecond part");
    }

    #[test]
    fn response_format_matrix() {
        assert_eq!(response_format("whisper-1", false), None);
        assert_eq!(response_format("gpt-4o-transcribe", false), None);
        assert_eq!(response_format("gpt-4o-transcribe", true), Some("json"));
        assert_eq!(
            response_format("gpt-4o-mini-transcribe", true),
            Some("json")
        );
        assert_eq!(response_format("whisper-1", true), Some("verbose_json"));
    }

    #[test]
    fn flaky_service_succeeds_on_third_submission() {
        let server = ScriptedServer::start(vec![
            ScriptedResponse::new(503, "busy"),
            ScriptedResponse::new(503, "busy"),
            ScriptedResponse::new(200, r#"{"text":"こんにちは"}"#),
        ]);
        let tmp = tempfile::tempdir().unwrap();
        let segment = fixture_segment(tmp.path(), 0);

        let client = test_client(&server.base_url);
        let text = client.transcribe_one(&segment, &CancelToken::new()).unwrap();
        assert_eq!(text, "こんにちは");
        assert_eq!(server.hit_count(), 3);
    }

    #[test]
    fn exhausted_retries_surface_as_permanent() {
        let server = ScriptedServer::start(vec![
            ScriptedResponse::new(503, "busy"),
            ScriptedResponse::new(503, "busy"),
            ScriptedResponse::new(503, "busy"),
        ]);
        let tmp = tempfile::tempdir().unwrap();
        let segment = fixture_segment(tmp.path(), 0);

        let client = test_client(&server.base_url);
        let err = client
            .transcribe_one(&segment, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::AsrPermanent(_)));
        assert_eq!(server.hit_count(), 3);
    }

    #[test]
    fn client_errors_fail_without_retry() {
        let server = ScriptedServer::start(vec![ScriptedResponse::new(400, "bad form")]);
        let tmp = tempfile::tempdir().unwrap();
        let segment = fixture_segment(tmp.path(), 0);

        let client = test_client(&server.base_url);
        let err = client
            .transcribe_one(&segment, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::AsrPermanent(_)));
        assert_eq!(server.hit_count(), 1);
    }

    #[test]
    fn merged_run_releases_segment_files() {
        let server = ScriptedServer::start(vec![ScriptedResponse::new(
            200,
            r#"{"text":"議事録のテスト"}"#,
        )]);
        let tmp = tempfile::tempdir().unwrap();
        let store = SegmentStore::with_roots(
            tmp.path().join("intake"),
            tmp.path().join("segments"),
        );
        let run_dir = store.allocate_segment_dir("run1").unwrap();
        let segment = fixture_segment(&run_dir, 0);
        let segment_path: PathBuf = segment.file_path.clone();

        let client = test_client(&server.base_url);
        let outcome = client
            .transcribe_segments(
                std::slice::from_ref(&segment),
                &store,
                &CancelToken::new(),
                &ProgressReporter::disabled(),
            )
            .unwrap();

        assert_eq!(outcome.merged, "議事録のテスト");
        assert_eq!(outcome.segment_texts.len(), 1);
        assert!(!segment_path.exists());
    }

    #[test]
    fn empty_transcripts_fail_the_run() {
        let server = ScriptedServer::start(vec![ScriptedResponse::new(200, r#"{"text":"   "}"#)]);
        let tmp = tempfile::tempdir().unwrap();
        let store = SegmentStore::with_roots(
            tmp.path().join("intake"),
            tmp.path().join("segments"),
        );
        let run_dir = store.allocate_segment_dir("run2").unwrap();
        let segment = fixture_segment(&run_dir, 0);

        let client = test_client(&server.base_url);
        let err = client
            .transcribe_segments(
                &[segment],
                &store,
                &CancelToken::new(),
                &ProgressReporter::disabled(),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::TranscriptionFailed(_)));
    }

    #[test]
    fn cancellation_stops_before_submission() {
        let tmp = tempfile::tempdir().unwrap();
        let segment = fixture_segment(tmp.path(), 0);
        let client = test_client("http://127.0.0.1:1");
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = client.transcribe_one(&segment, &cancel).unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
    }

    #[test]
    fn retry_after_header_is_parsed_from_429() {
        let mut retry_after = ScriptedResponse::new(429, "slow down");
        retry_after
            .headers
            .push(("Retry-After".to_string(), "0".to_string()));
        let server = ScriptedServer::start(vec![
            retry_after,
            ScriptedResponse::new(200, r#"{"text":"ok"}"#),
        ]);
        let tmp = tempfile::tempdir().unwrap();
        let segment = fixture_segment(tmp.path(), 0);

        let client = test_client(&server.base_url);
        let text = client.transcribe_one(&segment, &CancelToken::new()).unwrap();
        assert_eq!(text, "ok");
        assert_eq!(server.hit_count(), 2);
    }
}
