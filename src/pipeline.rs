// Run orchestration: segmentation → transcription → assembly, one logical
// task per run. The run directory is guard-scoped so store cleanup happens
// on success, error and cancel alike.

use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use crate::binary_manager::BinaryManager;
use crate::config::AppConfig;
use crate::errors::CoreError;
use crate::minutes::{MinutesArtifact, MinutesAssembler};
use crate::progress::{ProcessingStage, ProgressReporter};
use crate::segment_store::SegmentStore;
use crate::segmentation::{Segment, SegmentationEngine};
use crate::transcription::{AsrClient, TranscriptionOutcome};
use crate::util::CancelToken;

#[derive(Debug)]
pub struct PipelineResult {
    pub run_id: String,
    pub probed_duration: f64,
    /// Segment descriptors; the underlying files are gone by the time the
    /// run returns.
    pub segments: Vec<Segment>,
    pub transcription: TranscriptionOutcome,
    pub minutes: MinutesArtifact,
}

pub struct MinutesPipeline {
    config: AppConfig,
    store: Arc<SegmentStore>,
    binary: Arc<BinaryManager>,
    progress: ProgressReporter,
    cancel: CancelToken,
}

impl MinutesPipeline {
    pub fn new(
        config: AppConfig,
        store: Arc<SegmentStore>,
        binary: Arc<BinaryManager>,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            config,
            store,
            binary,
            progress,
            cancel: CancelToken::new(),
        }
    }

    /// Token shared with the UI layer; cancelling it stops the run at the
    /// next stage boundary and kills an in-flight transcoder child.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Full media run: file path in, minutes artifact out.
    pub fn run_from_path(
        &self,
        input: &Path,
        segment_seconds: Option<u32>,
    ) -> Result<PipelineResult, CoreError> {
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let _guard = RunGuard {
            store: self.store.clone(),
            run_id: run_id.clone(),
        };

        let result = self.execute(input, &run_id, segment_seconds);
        match &result {
            Ok(outcome) => {
                info!(
                    "run {} complete: {} segments, {} chars of transcript",
                    run_id,
                    outcome.segments.len(),
                    outcome.transcription.merged.chars().count()
                );
                self.progress
                    .update(ProcessingStage::Done, 100.0, "完了");
            }
            Err(err) => {
                error!("run {} failed: {}", run_id, err);
                self.progress.error(err);
            }
        }
        result
    }

    /// Transcript-only run: skips segmentation and transcription.
    pub fn run_from_transcript(&self, transcript: &str) -> Result<MinutesArtifact, CoreError> {
        let result = (|| {
            self.cancel.check()?;
            if transcript.trim().is_empty() {
                return Err(CoreError::Internal("transcript is empty".to_string()));
            }
            let assembler = MinutesAssembler::new(&self.config)?;
            assembler.generate(transcript, &self.cancel, &self.progress)
        })();

        match &result {
            Ok(_) => self.progress.update(ProcessingStage::Done, 100.0, "完了"),
            Err(err) => self.progress.error(err),
        }
        result
    }

    fn execute(
        &self,
        input: &Path,
        run_id: &str,
        segment_seconds: Option<u32>,
    ) -> Result<PipelineResult, CoreError> {
        self.cancel.check()?;
        self.progress
            .update(ProcessingStage::Preparing, 0.0, "トランスコーダを準備中");
        let transcoder = self.binary.ensure_ready()?;

        self.cancel.check()?;
        self.progress
            .update(ProcessingStage::Segmenting, 0.0, "音声を分割中");
        let engine = SegmentationEngine::new(transcoder, self.store.clone());
        let seconds = segment_seconds.unwrap_or(self.config.segment_seconds).max(1);
        let outcome = engine.run(input, run_id, seconds, &self.cancel)?;
        self.progress.update(
            ProcessingStage::Segmenting,
            100.0,
            format!("{} セグメントに分割", outcome.segments.len()),
        );

        self.cancel.check()?;
        let asr = AsrClient::new(&self.config)?;
        let transcription =
            asr.transcribe_segments(&outcome.segments, &self.store, &self.cancel, &self.progress)?;

        self.cancel.check()?;
        let assembler = MinutesAssembler::new(&self.config)?;
        let minutes = assembler.generate(&transcription.merged, &self.cancel, &self.progress)?;

        Ok(PipelineResult {
            run_id: run_id.to_string(),
            probed_duration: outcome.probed_duration,
            segments: outcome.segments,
            transcription,
            minutes,
        })
    }
}

/// Scope guard for the run directory: whatever the exit path, nothing the
/// run produced stays under the segments root.
struct RunGuard {
    store: Arc<SegmentStore>,
    run_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.store.cleanup_run(&self.run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::testing::CollectingSink;
    use crate::progress::ProgressSink;
    use crate::transcription::http_testing::{ScriptedResponse, ScriptedServer};

    fn scratch_pipeline(api_base: &str) -> (tempfile::TempDir, MinutesPipeline, Arc<CollectingSink>) {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(SegmentStore::with_roots(
            tmp.path().join("intake"),
            tmp.path().join("segments"),
        ));
        let binary = Arc::new(BinaryManager::with_app_home(tmp.path().join("apphome")));
        let sink = Arc::new(CollectingSink::default());
        let progress = ProgressReporter::new(sink.clone() as Arc<dyn ProgressSink>);
        let config = AppConfig {
            api_base: api_base.to_string(),
            api_key: "test-key".to_string(),
            ..AppConfig::default()
        };
        (
            tmp,
            MinutesPipeline::new(config, store, binary, progress),
            sink,
        )
    }

    fn chat_body(content: &str) -> String {
        serde_json::to_string(&serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        }))
        .unwrap()
    }

    #[test]
    fn cancelled_run_emits_terminal_error_event() {
        let (_tmp, pipeline, sink) = scratch_pipeline("http://127.0.0.1:1");
        pipeline.cancel_token().cancel();
        let err = pipeline
            .run_from_path(Path::new("/nonexistent.mp4"), None)
            .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));

        let events = sink.events.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.stage, ProcessingStage::Error);
        assert_eq!(last.current_task, "Cancelled");
    }

    #[test]
    fn transcript_only_run_produces_minutes() {
        let server = ScriptedServer::start(vec![
            ScriptedResponse::new(
                200,
                &chat_body("```markdown\n# 打合せ\n## 要約\n合意した。\n```"),
            ),
            ScriptedResponse::new(200, &chat_body("合意した。")),
        ]);
        let (_tmp, pipeline, sink) = scratch_pipeline(&server.base_url);
        let artifact = pipeline.run_from_transcript("本日の打合せで合意した。").unwrap();

        assert_eq!(artifact.title, "打合せ");
        assert!(!artifact.word_failed);
        let events = sink.events.lock().unwrap();
        assert_eq!(events.last().unwrap().stage, ProcessingStage::Done);
    }

    #[test]
    fn empty_transcript_is_rejected() {
        let (_tmp, pipeline, _sink) = scratch_pipeline("http://127.0.0.1:1");
        let err = pipeline.run_from_transcript("   ").unwrap_err();
        assert!(matches!(err, CoreError::Internal(_)));
    }

    #[cfg(unix)]
    #[test]
    fn failed_media_run_cleans_the_run_directory() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let _guard = crate::util::TEST_ENV_LOCK.lock().unwrap();
        let (tmp, pipeline, sink) = scratch_pipeline("http://127.0.0.1:1");
        // A fake transcoder that passes the probe but does nothing else, so
        // segmentation fails after the run dir exists.
        let fake = tmp.path().join("ffmpeg");
        fs::write(&fake, "#!/bin/sh\necho fake version 7.0\n").unwrap();
        fs::set_permissions(&fake, fs::Permissions::from_mode(0o755)).unwrap();
        std::env::set_var("MINUTESGEN_FFMPEG", &fake);

        let err = pipeline
            .run_from_path(Path::new("/nonexistent-input.mp4"), Some(60))
            .unwrap_err();
        std::env::remove_var("MINUTESGEN_FFMPEG");
        assert!(matches!(err, CoreError::Internal(_)));

        // Nothing left under the segments root.
        let segments_root = tmp.path().join("segments");
        let leftover = fs::read_dir(&segments_root)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftover, 0);

        let events = sink.events.lock().unwrap();
        assert_eq!(events.last().unwrap().stage, ProcessingStage::Error);
    }
}
