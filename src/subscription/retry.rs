use std::time::Duration;

use typed_builder::TypedBuilder;

/// Bounded retries of a failing handler, with exponential backoff between attempts.
#[derive(TypedBuilder, Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of attempts after the first one. 0 disables retries.
    #[builder(default = 0)]
    pub max_retries: u32,
    /// Delay before the first retry.
    #[builder(default = Duration::from_millis(100))]
    pub delay: Duration,
    /// Multiplier applied to the delay after each retry.
    #[builder(default = 2)]
    pub backoff_factor: u32,
    #[builder(default = Duration::from_secs(5))]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Delay to wait before the `retry`-th retry (starting at 1).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor: u32 = self.backoff_factor.saturating_pow(retry.saturating_sub(1));
        self.delay.saturating_mul(factor).min(self.max_delay)
    }
}
