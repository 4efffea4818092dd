use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};
use crate::ConfigError;

/// Exponential backoff with jitter applied between failed receive attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Fraction of the delay randomised in either direction, 0.0..=1.0.
    pub jitter_factor: f64,
    /// Consecutive failures tolerated before the failure is escalated.
    pub max_consecutive_failures: u32,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            max_consecutive_failures: 10,
        }
    }
}

impl ConfigValidator for RetryPolicyConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.base_delay_ms == 0 {
            return Err(ConfigError::Validation(
                "receive_retry.base_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::Validation(
                "receive_retry.max_delay_ms must be >= base_delay_ms".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Validation(
                "receive_retry.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::Validation(
                "receive_retry.jitter_factor must be between 0.0 and 1.0".to_string(),
            ));
        }
        ValidationUtils::validate_count(
            self.max_consecutive_failures as u64,
            "receive_retry.max_consecutive_failures",
            10_000,
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub reconcile_interval_seconds: u64,
    /// Upper bound on each backend list / remove call made while reconciling.
    pub reconcile_timeout_seconds: u64,
    /// Time a pass may spend removing workloads; whatever is left waits for
    /// the next pass.
    pub reconcile_budget_seconds: u64,
    pub max_consecutive_reconcile_failures: u32,
    /// Upper bound on one backend submission.
    pub submit_timeout_seconds: u64,
    /// Deliveries allowed before a message is dead-lettered as poison.
    pub max_delivery_count: u32,
    /// Age after which an in-flight record the backend no longer reports is dropped.
    pub orphan_grace_seconds: u64,
    pub shutdown_timeout_seconds: u64,
    pub receive_retry: RetryPolicyConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_seconds: 15,
            reconcile_timeout_seconds: 30,
            reconcile_budget_seconds: 60,
            max_consecutive_reconcile_failures: 5,
            submit_timeout_seconds: 30,
            max_delivery_count: 5,
            orphan_grace_seconds: 300,
            shutdown_timeout_seconds: 30,
            receive_retry: RetryPolicyConfig::default(),
        }
    }
}

impl DispatcherConfig {
    /// Hard ceiling on one reconciliation pass: the listing call, the
    /// removal budget and the last removal started inside it.
    pub fn reconcile_pass_ceiling(&self) -> Duration {
        Duration::from_secs(
            self.reconcile_budget_seconds
                .saturating_add(self.reconcile_timeout_seconds.saturating_mul(2)),
        )
    }
}

impl ConfigValidator for DispatcherConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_timeout_seconds(
            self.reconcile_interval_seconds,
            "dispatcher.reconcile_interval_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.reconcile_timeout_seconds,
            "dispatcher.reconcile_timeout_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.reconcile_budget_seconds,
            "dispatcher.reconcile_budget_seconds",
        )?;
        ValidationUtils::validate_count(
            self.max_consecutive_reconcile_failures as u64,
            "dispatcher.max_consecutive_reconcile_failures",
            1000,
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.submit_timeout_seconds,
            "dispatcher.submit_timeout_seconds",
        )?;
        ValidationUtils::validate_count(
            self.max_delivery_count as u64,
            "dispatcher.max_delivery_count",
            1000,
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.orphan_grace_seconds,
            "dispatcher.orphan_grace_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.shutdown_timeout_seconds,
            "dispatcher.shutdown_timeout_seconds",
        )?;
        self.receive_retry.validate()?;
        Ok(())
    }
}
