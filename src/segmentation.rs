// Segmentation Engine — turns an arbitrary audio/video input into an
// ordered, contiguous sequence of canonical-PCM WAV segments sized for the
// ASR request ceiling. All heavy lifting streams through the transcoder
// subprocess; the input is never loaded into memory.

use regex::Regex;
use serde::Serialize;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::constants::{SEGMENT_CHANNELS, SEGMENT_SAMPLE_RATE, STDERR_TAIL_BYTES};
use crate::errors::CoreError;
use crate::segment_store::SegmentStore;
use crate::util::CancelToken;

const CHILD_POLL_INTERVAL_MS: u64 = 100;

/// One contiguous slice of the normalized audio stream, on disk.
#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    pub index: u32,
    pub name: String,
    pub file_path: PathBuf,
    pub duration: f64,
    pub start_time: f64,
    pub end_time: f64,
}

#[derive(Debug)]
pub struct SegmentationOutcome {
    /// Duration parsed from the probe, in seconds; 0.0 when the probe could
    /// not determine it but a trial extraction proved audio exists.
    pub probed_duration: f64,
    pub segments: Vec<Segment>,
}

pub struct SegmentationEngine {
    transcoder: PathBuf,
    store: Arc<SegmentStore>,
}

impl SegmentationEngine {
    pub fn new(transcoder: PathBuf, store: Arc<SegmentStore>) -> Self {
        Self { transcoder, store }
    }

    /// Probe, slice, and lay out the timeline for one input.
    pub fn run(
        &self,
        input: &Path,
        run_id: &str,
        segment_seconds: u32,
        cancel: &CancelToken,
    ) -> Result<SegmentationOutcome, CoreError> {
        cancel.check()?;
        if !input.is_file() {
            return Err(CoreError::Internal(format!(
                "input does not exist: {:?}",
                input
            )));
        }

        let run_dir = self.store.allocate_segment_dir(run_id)?;
        let probed_duration = self.probe_duration(input, &run_dir, cancel)?;
        cancel.check()?;

        info!(
            "segmenting {:?} ({:.2} s probed) into {} s slices",
            input, probed_duration, segment_seconds
        );

        let pattern = run_dir.join("segment_%03d.wav");
        let output = self.run_transcoder(
            &[
                "-hide_banner",
                "-y",
                "-i",
                &path_arg(input),
                "-vn",
                "-acodec",
                "pcm_s16le",
                "-ar",
                &SEGMENT_SAMPLE_RATE.to_string(),
                "-ac",
                &SEGMENT_CHANNELS.to_string(),
                "-f",
                "segment",
                "-segment_time",
                &segment_seconds.to_string(),
                "-reset_timestamps",
                "1",
                &path_arg(&pattern),
            ],
            cancel,
        )?;

        let mut files = list_segment_files(&run_dir)?;
        if files.is_empty() {
            if !output.success {
                return Err(map_transcode_failure(&output.stderr_tail));
            }
            // Segment muxer elided output for an input shorter than one
            // slice; emit a single full-length segment instead.
            cancel.check()?;
            let single = run_dir.join("segment_000.wav");
            let output = self.run_transcoder(
                &[
                    "-hide_banner",
                    "-y",
                    "-i",
                    &path_arg(input),
                    "-vn",
                    "-acodec",
                    "pcm_s16le",
                    "-ar",
                    &SEGMENT_SAMPLE_RATE.to_string(),
                    "-ac",
                    &SEGMENT_CHANNELS.to_string(),
                    &path_arg(&single),
                ],
                cancel,
            )?;
            if !output.success || !single.is_file() {
                return Err(map_transcode_failure(&output.stderr_tail));
            }
            files = vec![single];
        } else if !output.success {
            warn!(
                "transcoder exited non-zero but emitted {} segments: {}",
                files.len(),
                output.stderr_tail
            );
        }

        let segments = assign_timeline(&files)?;

        // The normalized/assembled input is no longer needed once segments
        // exist; store-owned paths are unlinked, caller paths left alone.
        self.store.release_file(input);

        Ok(SegmentationOutcome {
            probed_duration,
            segments,
        })
    }

    /// Duration probe with the null muxer. A non-zero exit with a parseable
    /// duration still counts; a zero or missing duration falls back to a
    /// one-second trial extraction to distinguish odd containers from inputs
    /// with no audio at all.
    fn probe_duration(
        &self,
        input: &Path,
        run_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<f64, CoreError> {
        let output = self.run_transcoder(
            &["-hide_banner", "-i", &path_arg(input), "-f", "null", "-"],
            cancel,
        )?;

        if let Some(duration) = parse_duration_line(&output.stderr_tail) {
            if duration > 0.0 {
                return Ok(duration);
            }
        }

        cancel.check()?;
        let trial = run_dir.join("probe_trial.wav");
        let trial_output = self.run_transcoder(
            &[
                "-hide_banner",
                "-y",
                "-t",
                "1",
                "-i",
                &path_arg(input),
                "-vn",
                "-acodec",
                "pcm_s16le",
                "-ar",
                &SEGMENT_SAMPLE_RATE.to_string(),
                "-ac",
                &SEGMENT_CHANNELS.to_string(),
                &path_arg(&trial),
            ],
            cancel,
        )?;
        let has_audio = trial_output.success
            && trial.is_file()
            && fs::metadata(&trial).map(|m| m.len() > 44).unwrap_or(false);
        let _ = fs::remove_file(&trial);

        if has_audio {
            // Real audio, unknown length; the measured timeline will carry
            // the truth.
            Ok(0.0)
        } else {
            Err(CoreError::NoAudioStream(format!(
                "no decodable audio in {:?}: {}",
                input,
                trial_output.stderr_tail.trim()
            )))
        }
    }

    /// Spawn the transcoder and poll it so cancellation can kill it
    /// mid-flight. Stderr is drained on a helper thread and kept as a
    /// bounded tail.
    fn run_transcoder(
        &self,
        args: &[&str],
        cancel: &CancelToken,
    ) -> Result<TranscoderOutput, CoreError> {
        let mut child = Command::new(&self.transcoder)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                CoreError::TranscodeFailed(format!(
                    "cannot spawn transcoder {:?}: {}",
                    self.transcoder, e
                ))
            })?;

        let stderr = child.stderr.take();
        let reader = std::thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_end(&mut buf);
            }
            buf
        });

        let status = self.wait_with_cancel(&mut child, cancel)?;
        let stderr_bytes = reader.join().unwrap_or_default();
        let stderr_tail = tail_str(&stderr_bytes, STDERR_TAIL_BYTES);

        Ok(TranscoderOutput {
            success: status,
            stderr_tail,
        })
    }

    fn wait_with_cancel(&self, child: &mut Child, cancel: &CancelToken) -> Result<bool, CoreError> {
        loop {
            if cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CoreError::Cancelled);
            }
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status.success()),
                Ok(None) => std::thread::sleep(Duration::from_millis(CHILD_POLL_INTERVAL_MS)),
                Err(e) => {
                    let _ = child.kill();
                    return Err(CoreError::TranscodeFailed(format!(
                        "transcoder wait failed: {}",
                        e
                    )));
                }
            }
        }
    }
}

struct TranscoderOutput {
    success: bool,
    stderr_tail: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Log and timeline helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Parse `Duration: HH:MM:SS.cc` out of the transcoder log stream.
fn parse_duration_line(log: &str) -> Option<f64> {
    let re = Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2})\.(\d+)").ok()?;
    let caps = re.captures(log)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    let frac_digits = caps[4].len() as i32;
    let frac: f64 = caps[4].parse::<f64>().ok()? / 10f64.powi(frac_digits);
    Some(hours * 3600.0 + minutes * 60.0 + seconds + frac)
}

fn map_transcode_failure(stderr_tail: &str) -> CoreError {
    let lowered = stderr_tail.to_lowercase();
    if lowered.contains("does not contain any stream")
        || lowered.contains("matches no streams")
        || lowered.contains("no audio stream")
    {
        CoreError::NoAudioStream(stderr_tail.trim().to_string())
    } else {
        CoreError::TranscodeFailed(stderr_tail.trim().to_string())
    }
}

/// Emitted files in lexicographic order; the `%03d` template makes that the
/// emission order.
fn list_segment_files(run_dir: &Path) -> Result<Vec<PathBuf>, CoreError> {
    let mut files: Vec<PathBuf> = fs::read_dir(run_dir)
        .map_err(|e| CoreError::Internal(format!("cannot list {:?}: {}", run_dir, e)))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("segment_") && n.ends_with(".wav"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Measure each file and accumulate a cursor so adjacent segments share a
/// boundary exactly; the union of segments covers the whole normalized
/// stream to within one sample period.
fn assign_timeline(files: &[PathBuf]) -> Result<Vec<Segment>, CoreError> {
    let mut segments = Vec::with_capacity(files.len());
    let mut cursor = 0.0f64;
    for (index, path) in files.iter().enumerate() {
        let duration = wav_duration_seconds(path)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("segment")
            .to_string();
        segments.push(Segment {
            index: index as u32,
            name,
            file_path: path.clone(),
            duration,
            start_time: cursor,
            end_time: cursor + duration,
        });
        cursor += duration;
    }
    Ok(segments)
}

/// Per-file duration from the RIFF header: frames ÷ sample rate.
pub fn wav_duration_seconds(path: &Path) -> Result<f64, CoreError> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| CoreError::Internal(format!("cannot read WAV {:?}: {}", path, e)))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(CoreError::Internal(format!(
            "WAV {:?} reports zero sample rate",
            path
        )));
    }
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

fn tail_str(bytes: &[u8], max: usize) -> String {
    let start = bytes.len().saturating_sub(max);
    String::from_utf8_lossy(&bytes[start..]).to_string()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
