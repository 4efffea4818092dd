use std::time::Duration;

use jobgate_config::RetryPolicyConfig;

/// Exponential backoff with symmetric jitter, applied between failed
/// receive attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter_factor: f64,
    max_consecutive_failures: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryPolicyConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.backoff_multiplier,
            jitter_factor: config.jitter_factor,
            max_consecutive_failures: config.max_consecutive_failures,
        }
    }

    pub fn max_consecutive_failures(&self) -> u32 {
        self.max_consecutive_failures
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let capped = (base * self.multiplier.powi(exponent)).min(max);

        // 添加随机抖动以避免雷群效应
        let jitter = capped * self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        let delay = (capped + jitter).clamp(base, max);

        Duration::from_secs_f64(delay)
    }
}
