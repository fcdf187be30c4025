// Segment Store — single owner of every on-disk artifact the core produces.
//
// Layout:
//   <tempdir>/minutesgen-intake/<session_id>/chunk-<index>   upload in progress
//   <tempdir>/minutesgen-intake/<session_id>/<name>          assembled input
//   <tempdir>/minutesgen-segments/<run_id>/segment_NNN.wav   emitted segments
//
// Sessions are drop-guarded: an unfinalized handle removes its directory when
// it goes out of scope. Nothing outside this module unlinks files.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

use crate::constants::{INTAKE_DIR_NAME, SEGMENTS_DIR_NAME};
use crate::errors::CoreError;

// ─────────────────────────────────────────────────────────────────────────────
// SegmentStore
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SegmentStore {
    intake_root: PathBuf,
    segments_root: PathBuf,
}

impl Default for SegmentStore {
    fn default() -> Self {
        let tmp = std::env::temp_dir();
        Self {
            intake_root: tmp.join(INTAKE_DIR_NAME),
            segments_root: tmp.join(SEGMENTS_DIR_NAME),
        }
    }
}

impl SegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store rooted somewhere other than the OS temp dir (tests).
    pub fn with_roots(intake_root: PathBuf, segments_root: PathBuf) -> Self {
        Self {
            intake_root,
            segments_root,
        }
    }

    pub fn intake_root(&self) -> &Path {
        &self.intake_root
    }

    pub fn segments_root(&self) -> &Path {
        &self.segments_root
    }

    /// Create the per-session directory and return its guarded handle.
    pub fn open_session(
        &self,
        session_id: &str,
        file_name: &str,
        expected_chunks: u32,
        expected_size: u64,
    ) -> Result<SessionHandle, CoreError> {
        if expected_size == 0 {
            return Err(CoreError::Internal(
                "declared file size must be positive".to_string(),
            ));
        }
        if expected_chunks == 0 {
            return Err(CoreError::Internal(
                "expected chunk count must be positive".to_string(),
            ));
        }

        let dir = self.intake_root.join(session_id);
        fs::create_dir_all(&dir)
            .map_err(|e| CoreError::Internal(format!("cannot create session dir: {}", e)))?;

        info!(
            "intake session {} opened ({} chunks, {} bytes declared)",
            session_id, expected_chunks, expected_size
        );

        Ok(SessionHandle {
            session_id: session_id.to_string(),
            dir,
            file_name: sanitize_file_name(file_name),
            expected_chunks,
            expected_size,
            written: BTreeMap::new(),
            written_bytes: 0,
            adopted: false,
        })
    }

    /// Remove a session directory by id, whether or not a handle still
    /// exists. Safe to call repeatedly.
    pub fn remove_session_dir(&self, session_id: &str) {
        let dir = self.intake_root.join(session_id);
        if dir.exists() {
            if let Err(e) = fs::remove_dir_all(&dir) {
                warn!("failed to remove session dir {:?}: {}", dir, e);
            }
        }
    }

    /// Create `<segments_root>/<run_id>` for the segmentation engine.
    pub fn allocate_segment_dir(&self, run_id: &str) -> Result<PathBuf, CoreError> {
        let dir = self.segments_root.join(run_id);
        fs::create_dir_all(&dir)
            .map_err(|e| CoreError::Internal(format!("cannot create segment dir: {}", e)))?;
        Ok(dir)
    }

    /// Remove everything a run produced under the segments root.
    pub fn cleanup_run(&self, run_id: &str) {
        let dir = self.segments_root.join(run_id);
        if dir.exists() {
            if let Err(e) = fs::remove_dir_all(&dir) {
                warn!("failed to clean run dir {:?}: {}", dir, e);
            }
        }
    }

    /// Unlink a single file, but only when it lives under one of our roots.
    /// Caller-provided inputs outside the store are left alone.
    pub fn release_file(&self, path: &Path) {
        if !self.owns(path) {
            return;
        }
        if path.exists() {
            if let Err(e) = fs::remove_file(path) {
                warn!("failed to release {:?}: {}", path, e);
            }
        }
    }

    pub fn owns(&self, path: &Path) -> bool {
        path.starts_with(&self.intake_root) || path.starts_with(&self.segments_root)
    }

    /// Remove every run directory under the segments root.
    pub fn cleanup_all_runs(&self) {
        let Ok(entries) = fs::read_dir(&self.segments_root) else {
            return;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                if let Err(e) = fs::remove_dir_all(&path) {
                    warn!("failed to clean run dir {:?}: {}", path, e);
                }
            }
        }
    }

    /// Remove orphaned session directories older than `max_age`.
    /// Returns the number of directories removed.
    pub fn sweep_orphans(&self, max_age: Duration) -> usize {
        let Ok(entries) = fs::read_dir(&self.intake_root) else {
            return 0;
        };
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|mtime| now.duration_since(mtime).ok())
                .map(|age| age >= max_age)
                .unwrap_or(false);
            if stale {
                match fs::remove_dir_all(&path) {
                    Ok(()) => {
                        removed += 1;
                        info!("swept orphaned intake session {:?}", path);
                    }
                    Err(e) => warn!("failed to sweep {:?}: {}", path, e),
                }
            }
        }
        removed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionHandle
// ─────────────────────────────────────────────────────────────────────────────

/// One in-progress upload. Owns its chunk files until `finalize` hands the
/// assembled file back to the store; dropping an unfinalized handle removes
/// the whole session directory.
#[derive(Debug)]
pub struct SessionHandle {
    session_id: String,
    dir: PathBuf,
    file_name: String,
    expected_chunks: u32,
    expected_size: u64,
    written: BTreeMap<u32, u64>,
    written_bytes: u64,
    adopted: bool,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn expected_chunks(&self) -> u32 {
        self.expected_chunks
    }

    pub fn written_bytes(&self) -> u64 {
        self.written_bytes
    }

    fn chunk_path(&self, index: u32) -> PathBuf {
        self.dir.join(format!("chunk-{}", index))
    }

    /// Persist one chunk. Duplicate indices and size overruns are rejected
    /// without touching on-disk state.
    pub fn write_chunk(&mut self, index: u32, bytes: &[u8]) -> Result<(), CoreError> {
        if index >= self.expected_chunks {
            return Err(CoreError::ChunkOutOfRange(format!(
                "chunk index {} outside [0, {})",
                index, self.expected_chunks
            )));
        }
        if self.written.contains_key(&index) {
            return Err(CoreError::ChunkDuplicate(format!(
                "chunk index {} already written",
                index
            )));
        }
        let new_total = self.written_bytes + bytes.len() as u64;
        if new_total > self.expected_size {
            return Err(CoreError::SizeExceeded(format!(
                "{} bytes would exceed declared size {}",
                new_total, self.expected_size
            )));
        }

        let path = self.chunk_path(index);
        let mut file = fs::File::create(&path)
            .map_err(|e| CoreError::Internal(format!("cannot create chunk file: {}", e)))?;
        file.write_all(bytes)
            .map_err(|e| CoreError::Internal(format!("chunk write failed: {}", e)))?;
        file.sync_all()
            .map_err(|e| CoreError::Internal(format!("chunk sync failed: {}", e)))?;

        self.written.insert(index, bytes.len() as u64);
        self.written_bytes = new_total;
        Ok(())
    }

    /// Concatenate chunks in ascending index order into the assembled file,
    /// deleting each chunk as it is consumed. On success the handle stops
    /// owning anything; the assembled file stays until the session is
    /// released or the pipeline consumes it.
    pub fn finalize(mut self) -> Result<PathBuf, CoreError> {
        for index in 0..self.expected_chunks {
            if !self.written.contains_key(&index) {
                return Err(CoreError::IncompleteUpload(format!(
                    "chunk index {} was never written ({}/{} present)",
                    index,
                    self.written.len(),
                    self.expected_chunks
                )));
            }
        }

        let assembled = self.dir.join(&self.file_name);
        let result = self.concat_chunks(&assembled);
        if let Err(err) = result {
            // Leave no partial assembled file behind.
            let _ = fs::remove_file(&assembled);
            return Err(err);
        }

        info!(
            "session {} assembled {} bytes into {:?}",
            self.session_id, self.written_bytes, assembled
        );
        self.adopted = true;
        Ok(assembled)
    }

    fn concat_chunks(&self, assembled: &Path) -> Result<(), CoreError> {
        let mut out = fs::File::create(assembled)
            .map_err(|e| CoreError::Internal(format!("cannot create assembled file: {}", e)))?;
        for index in 0..self.expected_chunks {
            let path = self.chunk_path(index);
            let mut chunk = fs::File::open(&path)
                .map_err(|e| CoreError::Internal(format!("cannot open chunk {}: {}", index, e)))?;
            std::io::copy(&mut chunk, &mut out)
                .map_err(|e| CoreError::Internal(format!("concat failed at {}: {}", index, e)))?;
            drop(chunk);
            // Bounded peak disk: the chunk is gone before the next is read.
            fs::remove_file(&path)
                .map_err(|e| CoreError::Internal(format!("cannot drop chunk {}: {}", index, e)))?;
        }
        out.sync_all()
            .map_err(|e| CoreError::Internal(format!("assembled sync failed: {}", e)))?;
        Ok(())
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.adopted {
            return;
        }
        if self.dir.exists() {
            if let Err(e) = fs::remove_dir_all(&self.dir) {
                warn!("session {} drop cleanup failed: {}", self.session_id, e);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Restrict a logical file name to `[A-Za-z0-9._-]`.
pub fn sanitize_file_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.trim_matches('_').is_empty() {
        "input".to_string()
    } else {
        sanitized
    }
}
