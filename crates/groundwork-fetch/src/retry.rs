use crate::FetchError;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff: `initial`, doubled per retry, never above `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent. Returns the value and the attempt it took.
    pub fn run<T>(
        &self,
        url: &str,
        mut op: impl FnMut(u32) -> Result<T, FetchError>,
    ) -> Result<(T, u32), FetchError> {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok((value, attempt)),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(if self.max_attempts == 1 {
                        e
                    } else {
                        FetchError::RetriesExhausted {
                            url: url.to_owned(),
                            attempts: attempt,
                            last: Box::new(e),
                        }
                    });
                }
                Err(e) => {
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        "attempt {attempt}/{} for {url} failed: {e}; retrying in {delay:?}",
                        self.max_attempts
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}
