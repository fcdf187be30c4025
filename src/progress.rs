use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::CoreError;
use crate::util::now_ms;

/// Coarse pipeline stage carried on every progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStage {
    Preparing,
    Uploading,
    Segmenting,
    Transcribing,
    Assembling,
    Done,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: u64,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: now_ms(),
        }
    }
}

/// Payload pushed host → UI over the progress channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: ProcessingStage,
    pub percentage: f32,
    pub current_task: String,
    pub logs: Vec<LogEntry>,
}

/// Delivery seam for progress events. The IPC transport implements this on
/// the host side; the core only ever talks to the trait.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Sink that discards everything.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Shared handle the stages use to report progress.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn ProgressSink>,
}

impl ProgressReporter {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self { sink }
    }

    pub fn disabled() -> Self {
        Self {
            sink: Arc::new(NullProgress),
        }
    }

    pub fn update(&self, stage: ProcessingStage, percentage: f32, task: impl Into<String>) {
        self.sink.emit(ProgressEvent {
            stage,
            percentage: percentage.clamp(0.0, 100.0),
            current_task: task.into(),
            logs: Vec::new(),
        });
    }

    pub fn log(
        &self,
        stage: ProcessingStage,
        percentage: f32,
        task: impl Into<String>,
        level: LogLevel,
        message: impl Into<String>,
    ) {
        self.sink.emit(ProgressEvent {
            stage,
            percentage: percentage.clamp(0.0, 100.0),
            current_task: task.into(),
            logs: vec![LogEntry::new(level, message)],
        });
    }

    /// Terminal event for a failed run: `stage = error`, code + message in
    /// the log entry.
    pub fn error(&self, error: &CoreError) {
        self.sink.emit(ProgressEvent {
            stage: ProcessingStage::Error,
            percentage: 100.0,
            current_task: error.code().to_string(),
            logs: vec![LogEntry::new(LogLevel::Error, error.to_string())],
        });
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Test sink that records every event.
    #[derive(Default)]
    pub struct CollectingSink {
        pub events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressSink for CollectingSink {
        fn emit(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::CollectingSink;
    use super::*;

    #[test]
    fn percentage_is_clamped() {
        let sink = Arc::new(CollectingSink::default());
        let reporter = ProgressReporter::new(sink.clone());
        reporter.update(ProcessingStage::Segmenting, 140.0, "slicing");
        reporter.update(ProcessingStage::Segmenting, -3.0, "slicing");

        let events = sink.events.lock().unwrap();
        assert_eq!(events[0].percentage, 100.0);
        assert_eq!(events[1].percentage, 0.0);
    }

    #[test]
    fn error_event_is_terminal_shape() {
        let sink = Arc::new(CollectingSink::default());
        let reporter = ProgressReporter::new(sink.clone());
        reporter.error(&CoreError::NoAudioStream("video only".to_string()));

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, ProcessingStage::Error);
        assert_eq!(events[0].current_task, "NoAudioStream");
        assert_eq!(events[0].logs.len(), 1);
        assert_eq!(events[0].logs[0].level, LogLevel::Error);
    }

    #[test]
    fn stage_serializes_lowercase() {
        let json = serde_json::to_string(&ProcessingStage::Transcribing).unwrap();
        assert_eq!(json, "\"transcribing\"");
    }
}
