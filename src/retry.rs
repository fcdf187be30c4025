use std::time::Duration;

/// Exponential backoff schedule shared by the ASR and chat clients.
/// Attempt numbers are 1-based; the delay applies before attempt `n + 1`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
    pub cap: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, factor: u32, cap: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            factor: factor.max(1),
            cap,
        }
    }

    /// Delay after the given 1-based failed attempt, or `None` when the
    /// attempt budget is spent.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let multiplier = self.factor.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(multiplier);
        Some(delay.min(self.cap))
    }

    /// Delay for the next attempt, with a server-provided `Retry-After`
    /// taking precedence over the computed schedule (still capped).
    pub fn delay_with_retry_after(
        &self,
        attempt: u32,
        retry_after: Option<Duration>,
    ) -> Option<Duration> {
        let computed = self.delay_after(attempt)?;
        Some(match retry_after {
            Some(server) => server.min(self.cap),
            None => computed,
        })
    }
}

/// Parse a `Retry-After` header value in its delta-seconds form.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
