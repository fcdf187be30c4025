// Host verb surface: the stable contract the sandboxed UI calls over IPC.
// Each verb returns a serde-serializable record with a `success` flag and a
// `{code, message}` error body; raw errors never cross the boundary. The
// transport itself (Tauri, Electron, anything message-based) stays outside
// this crate.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

use crate::binary_manager::BinaryManager;
use crate::config::AppConfig;
use crate::errors::CoreError;
use crate::intake::IntakeRegistry;
use crate::progress::{ProcessingStage, ProgressReporter, ProgressSink};
use crate::segment_store::SegmentStore;
use crate::segmentation::{Segment, SegmentationEngine};
use crate::util::CancelToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CoreError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CoreError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartUploadResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CoreError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessFileResponse {
    pub success: bool,
    pub segments: Vec<Segment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CoreError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CoreError>,
}

impl StatusResponse {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn err(error: CoreError) -> Self {
        Self {
            success: false,
            error: Some(error),
        }
    }
}

/// The privileged host side of the audio-processor verbs.
pub struct AudioProcessorHost {
    config: AppConfig,
    store: Arc<SegmentStore>,
    intake: IntakeRegistry,
    binary: Arc<BinaryManager>,
    progress: ProgressReporter,
    cancel: Mutex<CancelToken>,
}

impl AudioProcessorHost {
    pub fn new(config: AppConfig, progress: Arc<dyn ProgressSink>) -> Self {
        let store = Arc::new(SegmentStore::new());
        Self::with_store(config, store, progress)
    }

    pub fn with_store(
        config: AppConfig,
        store: Arc<SegmentStore>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        let intake = IntakeRegistry::new(store.clone());
        Self {
            config,
            store,
            intake,
            binary: Arc::new(BinaryManager::new()),
            progress: ProgressReporter::new(progress),
            cancel: Mutex::new(CancelToken::new()),
        }
    }

    /// Swap the binary manager (tests point it at a scratch home).
    pub fn with_binary_manager(mut self, binary: Arc<BinaryManager>) -> Self {
        self.binary = binary;
        self
    }

    pub fn store(&self) -> &Arc<SegmentStore> {
        &self.store
    }

    /// `audio-processor.initialize` — eagerly stage the transcoder and sweep
    /// stale intake sessions.
    pub fn initialize(&self) -> StatusResponse {
        let swept = self
            .store
            .sweep_orphans(Duration::from_secs(self.config.orphan_max_age_hours * 3600));
        if swept > 0 {
            info!("initialize swept {} orphaned intake sessions", swept);
        }
        match self.binary.ensure_ready() {
            Ok(_) => StatusResponse::ok(),
            Err(error) => StatusResponse::err(error),
        }
    }

    /// `audio-processor.save-file-to-temp` — single-shot intake.
    pub fn save_file_to_temp(&self, name: &str, bytes: &[u8]) -> PathResponse {
        match self.intake.save_to_temp(name, bytes) {
            Ok(path) => PathResponse {
                success: true,
                temp_path: Some(path.to_string_lossy().to_string()),
                error: None,
            },
            Err(error) => PathResponse {
                success: false,
                temp_path: None,
                error: Some(error),
            },
        }
    }

    /// `audio-processor.start-chunked-upload`.
    pub fn start_chunked_upload(&self, name: &str, size: u64) -> StartUploadResponse {
        match self.intake.start(name, size) {
            Ok(session_id) => StartUploadResponse {
                success: true,
                session_id: Some(session_id),
                error: None,
            },
            Err(error) => StartUploadResponse {
                success: false,
                session_id: None,
                error: Some(error),
            },
        }
    }

    /// `audio-processor.upload-chunk`.
    pub fn upload_chunk(&self, session_id: &str, index: u32, bytes: &[u8]) -> StatusResponse {
        match self.intake.upload_chunk(session_id, index, bytes) {
            Ok(()) => StatusResponse::ok(),
            Err(error) => StatusResponse::err(error),
        }
    }

    /// `audio-processor.finalize-chunked-upload`.
    pub fn finalize_chunked_upload(&self, session_id: &str) -> PathResponse {
        match self.intake.finalize(session_id) {
            Ok(path) => PathResponse {
                success: true,
                temp_path: Some(path.to_string_lossy().to_string()),
                error: None,
            },
            Err(error) => PathResponse {
                success: false,
                temp_path: None,
                error: Some(error),
            },
        }
    }

    /// `audio-processor.cleanup-chunked-upload` — idempotent, any state.
    pub fn cleanup_chunked_upload(&self, session_id: &str) -> StatusResponse {
        self.intake.cleanup(session_id);
        StatusResponse::ok()
    }

    /// `audio-processor.process-file-by-path` — probe and slice the input;
    /// the returned descriptors point at files the UI may read back until
    /// `cleanup` runs.
    pub fn process_file_by_path(
        &self,
        path: &str,
        segment_seconds: Option<u32>,
    ) -> ProcessFileResponse {
        let cancel = {
            let mut slot = self.cancel.lock().unwrap();
            *slot = CancelToken::new();
            slot.clone()
        };

        let result = (|| {
            let transcoder = self.binary.ensure_ready()?;
            let engine = SegmentationEngine::new(transcoder, self.store.clone());
            let run_id = uuid::Uuid::new_v4().simple().to_string();
            let seconds = segment_seconds
                .unwrap_or(self.config.segment_seconds)
                .max(1);
            self.progress
                .update(ProcessingStage::Segmenting, 0.0, "音声を分割中");
            let outcome = engine.run(Path::new(path), &run_id, seconds, &cancel)?;
            self.progress.update(
                ProcessingStage::Segmenting,
                100.0,
                format!("{} セグメントに分割", outcome.segments.len()),
            );
            Ok(outcome.segments)
        })();

        match result {
            Ok(segments) => ProcessFileResponse {
                success: true,
                segments,
                error: None,
            },
            Err(error) => {
                self.progress.error(&error);
                ProcessFileResponse {
                    success: false,
                    segments: Vec::new(),
                    error: Some(error),
                }
            }
        }
    }

    /// `audio-processor.read-segment-file` — base64 bytes of one emitted
    /// segment. Only paths under the segments root are served.
    pub fn read_segment_file(&self, path: &str) -> DataResponse {
        let path = PathBuf::from(path);
        if !path.starts_with(self.store.segments_root()) {
            return DataResponse {
                success: false,
                data: None,
                error: Some(CoreError::Internal(
                    "path is not a segment file".to_string(),
                )),
            };
        }
        match std::fs::read(&path) {
            Ok(bytes) => DataResponse {
                success: true,
                data: Some(BASE64.encode(bytes)),
                error: None,
            },
            Err(e) => DataResponse {
                success: false,
                data: None,
                error: Some(CoreError::Internal(format!(
                    "cannot read segment {:?}: {}",
                    path, e
                ))),
            },
        }
    }

    /// `audio-processor.cleanup` — drop live sessions, remove every run
    /// directory, sweep stale intake leftovers.
    pub fn cleanup(&self) -> StatusResponse {
        self.cancel_processing();
        self.intake.cleanup_all();
        self.store.cleanup_all_runs();
        self.store
            .sweep_orphans(Duration::from_secs(self.config.orphan_max_age_hours * 3600));
        StatusResponse::ok()
    }

    /// Cancel the in-flight `process_file_by_path` run, if any.
    pub fn cancel_processing(&self) {
        self.cancel.lock().unwrap().cancel();
    }
}
