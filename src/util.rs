use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Cooperative cancellation flag shared by one run. Stages check it between
/// units of work; the segmentation engine also polls it while the transcoder
/// child is alive.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Convenience for stage boundaries.
    pub fn check(&self) -> Result<(), crate::errors::CoreError> {
        if self.is_cancelled() {
            Err(crate::errors::CoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Serializes tests that mutate process environment variables.
#[cfg(test)]
pub(crate) static TEST_ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
