use crate::retry::{Backoff, RetryPolicy};
use groundwork_schema::Settings;
use std::time::Duration;

/// Download tuning, normally derived from the manifest's `[settings]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchConfig {
    pub retry: RetryPolicy,
    /// Whole-request timeout. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl FetchConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            retry: RetryPolicy::new(
                settings.fetch_attempts,
                Backoff::new(
                    Duration::from_millis(settings.fetch_backoff_ms),
                    Duration::from_millis(settings.fetch_backoff_max_ms),
                ),
            ),
            timeout: settings.fetch_timeout_secs.map(Duration::from_secs),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}
