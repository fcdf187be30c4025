// Shared constants for the processing core.

/// Target size for one intake chunk (UI-side chunking contract).
pub const INTAKE_CHUNK_BYTES: u64 = 50 * 1024 * 1024;

/// Inputs at or below this size may be sent as a single direct transfer.
pub const DIRECT_TRANSFER_MAX_BYTES: u64 = 100 * 1024 * 1024;

/// Safety threshold for one ASR request; segmentation keeps every emitted
/// segment under this. The service-side ceiling is higher and service-defined.
pub const ASR_SAFE_REQUEST_BYTES: u64 = 20 * 1024 * 1024;

/// Default slice length for the segment muxer, in seconds.
pub const DEFAULT_SEGMENT_SECONDS: u32 = 600;

/// Canonical PCM format for normalized audio and emitted segments.
pub const SEGMENT_SAMPLE_RATE: u32 = 44_100;
pub const SEGMENT_CHANNELS: u16 = 1;
pub const SEGMENT_BITS_PER_SAMPLE: u16 = 16;

/// ASR retry schedule: exponential backoff.
pub const ASR_MAX_ATTEMPTS: u32 = 3;
pub const ASR_BACKOFF_BASE_MS: u64 = 2_000;
pub const ASR_BACKOFF_CAP_MS: u64 = 60_000;

/// Chat retry schedule.
pub const CHAT_MAX_ATTEMPTS: u32 = 5;
pub const CHAT_BACKOFF_BASE_MS: u64 = 3_000;
pub const CHAT_BACKOFF_CAP_MS: u64 = 120_000;

/// Request timeouts.
pub const ASR_REQUEST_TIMEOUT_MS: u64 = 300_000;
pub const CHAT_REQUEST_TIMEOUT_MS: u64 = 300_000;

/// Response token budget for the minutes generation call.
pub const MINUTES_MAX_TOKENS: u32 = 30_000;

/// Token ceiling for the lightweight summary polish call.
pub const SUMMARY_POLISH_MAX_TOKENS: u32 = 100;

/// Sampling temperature for non-reasoning chat models.
pub const MINUTES_TEMPERATURE: f32 = 0.3;

/// Character limit for the shortened summary.
pub const SUMMARY_CHAR_LIMIT: usize = 50;

/// Bound on the stderr tail attached to transcode failures.
pub const STDERR_TAIL_BYTES: usize = 4 * 1024;

/// Placeholder stored under the `word` output key when document generation
/// fails; the run continues with a warning.
pub const WORD_FAILED_MARKER: &str = "WORD_GENERATION_FAILED";

/// Intake sessions older than this are removed by the orphan sweep.
pub const ORPHAN_MAX_AGE_HOURS: u64 = 24;

/// Directory names under the OS temp dir.
pub const INTAKE_DIR_NAME: &str = "minutesgen-intake";
pub const SEGMENTS_DIR_NAME: &str = "minutesgen-segments";

/// Application dir under the user home for relocated binaries.
pub const APP_HOME_DIR_NAME: &str = ".minutesgen";
