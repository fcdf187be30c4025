use serde::{Deserialize, Serialize};
use std::fmt;

/// Core error taxonomy, propagated to the UI as code + message, never as a
/// raw stack. Transient variants are retried internally and only surface
/// once retries exhaust.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "code", content = "message")]
pub enum CoreError {
    /// No bundled transcoder source could be located.
    BinaryMissing(String),

    /// The transcoder failed the liveness probe on every fallback strategy.
    BinaryUnexecutable(String),

    /// Intake verbs referenced a session id the registry does not know.
    IntakeSessionUnknown(String),

    /// Chunk index outside `[0, expected_chunks)`.
    ChunkOutOfRange(String),

    /// Chunk index written twice.
    ChunkDuplicate(String),

    /// Accumulated chunk bytes would exceed the declared file size.
    SizeExceeded(String),

    /// Finalize called before every expected index was written.
    IncompleteUpload(String),

    /// The input carries no decodable audio stream.
    NoAudioStream(String),

    /// Transcoder exited non-zero; carries a bounded stderr tail.
    TranscodeFailed(String),

    /// Transient ASR failure (network, 5xx, 429); retried internally.
    AsrTransient(String),

    /// Non-retryable ASR failure, or transient retries exhausted.
    AsrPermanent(String),

    /// No segment yielded any text.
    TranscriptionFailed(String),

    /// Transient chat failure; retried internally.
    ChatTransient(String),

    /// Non-retryable chat failure, or transient retries exhausted.
    ChatPermanent(String),

    /// The minutes response could not be parsed into any usable format.
    MinutesParseFailed(String),

    /// The run was cancelled between stages or mid-stage.
    Cancelled,

    /// The external service rejected the credentials.
    Unauthorized(String),

    /// Anything that does not fit the categories above.
    Internal(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CoreError::Cancelled => write!(f, "{}", self.code()),
            other => write!(f, "{}: {}", other.code(), other.message()),
        }
    }
}

impl std::error::Error for CoreError {}

impl CoreError {
    /// Stable machine-readable code, matching the serialized `code` tag.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::BinaryMissing(_) => "BinaryMissing",
            CoreError::BinaryUnexecutable(_) => "BinaryUnexecutable",
            CoreError::IntakeSessionUnknown(_) => "IntakeSessionUnknown",
            CoreError::ChunkOutOfRange(_) => "ChunkOutOfRange",
            CoreError::ChunkDuplicate(_) => "ChunkDuplicate",
            CoreError::SizeExceeded(_) => "SizeExceeded",
            CoreError::IncompleteUpload(_) => "IncompleteUpload",
            CoreError::NoAudioStream(_) => "NoAudioStream",
            CoreError::TranscodeFailed(_) => "TranscodeFailed",
            CoreError::AsrTransient(_) => "AsrTransient",
            CoreError::AsrPermanent(_) => "AsrPermanent",
            CoreError::TranscriptionFailed(_) => "TranscriptionFailed",
            CoreError::ChatTransient(_) => "ChatTransient",
            CoreError::ChatPermanent(_) => "ChatPermanent",
            CoreError::MinutesParseFailed(_) => "MinutesParseFailed",
            CoreError::Cancelled => "Cancelled",
            CoreError::Unauthorized(_) => "Unauthorized",
            CoreError::Internal(_) => "Internal",
        }
    }

    /// Human-readable detail.
    pub fn message(&self) -> &str {
        match self {
            CoreError::BinaryMissing(msg)
            | CoreError::BinaryUnexecutable(msg)
            | CoreError::IntakeSessionUnknown(msg)
            | CoreError::ChunkOutOfRange(msg)
            | CoreError::ChunkDuplicate(msg)
            | CoreError::SizeExceeded(msg)
            | CoreError::IncompleteUpload(msg)
            | CoreError::NoAudioStream(msg)
            | CoreError::TranscodeFailed(msg)
            | CoreError::AsrTransient(msg)
            | CoreError::AsrPermanent(msg)
            | CoreError::TranscriptionFailed(msg)
            | CoreError::ChatTransient(msg)
            | CoreError::ChatPermanent(msg)
            | CoreError::MinutesParseFailed(msg)
            | CoreError::Unauthorized(msg)
            | CoreError::Internal(msg) => msg,
            CoreError::Cancelled => "run cancelled",
        }
    }

    /// Whether the failure is retryable under the documented schedules.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::AsrTransient(_) | CoreError::ChatTransient(_)
        )
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_message() {
        let err = CoreError::ChunkDuplicate("index 3 already written".to_string());
        assert_eq!(err.to_string(), "ChunkDuplicate: index 3 already written");
    }

    #[test]
    fn cancelled_has_no_payload() {
        assert_eq!(CoreError::Cancelled.to_string(), "Cancelled");
        assert_eq!(CoreError::Cancelled.message(), "run cancelled");
    }

    #[test]
    fn transience_classification() {
        assert!(CoreError::AsrTransient("503".to_string()).is_transient());
        assert!(CoreError::ChatTransient("timeout".to_string()).is_transient());
        assert!(!CoreError::AsrPermanent("400".to_string()).is_transient());
        assert!(!CoreError::Cancelled.is_transient());
    }

    #[test]
    fn serializes_as_code_and_message() {
        let err = CoreError::SizeExceeded("would exceed declared size".to_string());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "SizeExceeded");
        assert_eq!(json["message"], "would exceed declared size");
    }

    #[test]
    fn io_errors_map_to_internal() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: CoreError = io.into();
        assert!(matches!(err, CoreError::Internal(_)));
    }
}
