// Streaming Intake — chunked upload protocol between the sandboxed UI and
// this host process. Bulk bytes cross the IPC boundary as 50 MiB chunks so
// no single message hits the serialization ceiling and peak RAM stays
// bounded; inputs at or below 100 MiB may use the single-shot path.
//
// The UI drives the verbs strictly in ascending chunk order and may retry a
// failed chunk up to three times with linear backoff (1 s, 2 s, 3 s) before
// giving up and calling `cleanup`. The host does not depend on that contract
// beyond rejecting duplicates and out-of-range indices.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::constants::{DIRECT_TRANSFER_MAX_BYTES, INTAKE_CHUNK_BYTES};
use crate::errors::CoreError;
use crate::segment_store::{SegmentStore, SessionHandle};

/// Session registry: the only process-wide mutable map in the core.
pub struct IntakeRegistry {
    store: Arc<SegmentStore>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl IntakeRegistry {
    pub fn new(store: Arc<SegmentStore>) -> Self {
        Self {
            store,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// `start(file_name, file_size) -> session_id`. The expected chunk count
    /// is derived from the fixed 50 MiB chunk size.
    pub fn start(&self, file_name: &str, file_size: u64) -> Result<String, CoreError> {
        if file_size == 0 {
            return Err(CoreError::Internal(
                "declared file size must be positive".to_string(),
            ));
        }
        let expected_chunks = file_size.div_ceil(INTAKE_CHUNK_BYTES).max(1) as u32;
        let session_id = uuid::Uuid::new_v4().simple().to_string();
        let handle = self
            .store
            .open_session(&session_id, file_name, expected_chunks, file_size)?;

        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.clone(), handle);
        Ok(session_id)
    }

    /// Same as `start`, but with an explicit chunk count (single-shot path).
    fn start_with_chunks(
        &self,
        file_name: &str,
        file_size: u64,
        expected_chunks: u32,
    ) -> Result<String, CoreError> {
        let session_id = uuid::Uuid::new_v4().simple().to_string();
        let handle = self
            .store
            .open_session(&session_id, file_name, expected_chunks, file_size)?;
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.clone(), handle);
        Ok(session_id)
    }

    pub fn upload_chunk(
        &self,
        session_id: &str,
        index: u32,
        bytes: &[u8],
    ) -> Result<(), CoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        let handle = sessions.get_mut(session_id).ok_or_else(|| {
            CoreError::IntakeSessionUnknown(format!("no session with id {}", session_id))
        })?;
        handle.write_chunk(index, bytes)
    }

    /// Concatenate and return the assembled path. A failed finalize drops
    /// the handle, which removes the session directory.
    pub fn finalize(&self, session_id: &str) -> Result<PathBuf, CoreError> {
        let handle = self
            .sessions
            .lock()
            .unwrap()
            .remove(session_id)
            .ok_or_else(|| {
                CoreError::IntakeSessionUnknown(format!("no session with id {}", session_id))
            })?;
        handle.finalize()
    }

    /// Idempotent release of a session in any state, including after a
    /// successful finalize (the assembled file goes with the directory).
    pub fn cleanup(&self, session_id: &str) {
        let removed = self.sessions.lock().unwrap().remove(session_id);
        if removed.is_some() {
            info!("intake session {} cleaned up before finalize", session_id);
        }
        drop(removed);
        // Post-finalize (or already-dropped) directories are removed here.
        self.store.remove_session_dir(session_id);
    }

    /// Single-shot intake for small inputs: internally a one-chunk session.
    /// Anything over the direct-transfer ceiling must go through chunks.
    pub fn save_to_temp(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, CoreError> {
        if bytes.is_empty() {
            return Err(CoreError::Internal("empty upload".to_string()));
        }
        if bytes.len() as u64 > DIRECT_TRANSFER_MAX_BYTES {
            return Err(CoreError::SizeExceeded(format!(
                "{} bytes exceeds the direct transfer ceiling, use the chunked upload",
                bytes.len()
            )));
        }
        let session_id = self.start_with_chunks(file_name, bytes.len() as u64, 1)?;
        if let Err(err) = self.upload_chunk(&session_id, 0, bytes) {
            self.cleanup(&session_id);
            return Err(err);
        }
        match self.finalize(&session_id) {
            Ok(path) => Ok(path),
            Err(err) => {
                warn!("single-shot intake failed: {}", err);
                self.cleanup(&session_id);
                Err(err)
            }
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Drop every live session (host-level cleanup verb).
    pub fn cleanup_all(&self) {
        let mut sessions = self.sessions.lock().unwrap();
        let ids: Vec<String> = sessions.keys().cloned().collect();
        sessions.clear();
        drop(sessions);
        for id in ids {
            self.store.remove_session_dir(&id);
        }
    }
}
