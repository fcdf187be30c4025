// MinutesGen core — headless meeting-minutes pipeline.
//
// Large audio/video recordings (or plain transcripts) go in; a structured
// meeting record rendered as Markdown, HTML and a Word-compatible container
// comes out. The crate owns media segmentation via the bundled transcoder,
// the chunked UI→host intake protocol, sequential ASR submission with
// retry/backoff, and the multi-format minutes assembly. Presentation,
// credential storage and template persistence live outside.

pub mod api;
pub mod binary_manager;
pub mod chat;
pub mod config;
pub mod constants;
pub mod errors;
pub mod intake;
pub mod minutes;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod segment_store;
pub mod segmentation;
pub mod transcription;
mod util;

pub use config::AppConfig;
pub use errors::CoreError;
pub use pipeline::{MinutesPipeline, PipelineResult};
pub use progress::{ProgressEvent, ProgressSink};
pub use util::CancelToken;

use tracing::info;

/// Install the fmt subscriber. Call once from the embedding host; honors
/// `RUST_LOG`, defaults to `info`.
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("minutesgen core starting up");
}

/// File-logging variant: daily-rotated log under `dir`. The returned guard
/// must be held for the lifetime of the host or buffered lines are lost.
pub fn init_file_logging(dir: &std::path::Path) -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let appender = tracing_appender::rolling::daily(dir, "minutesgen.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(writer)
        .init();

    info!("minutesgen core starting up");
    guard
}
