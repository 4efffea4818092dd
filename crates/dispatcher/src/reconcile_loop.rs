use std::sync::Arc;
use std::time::Duration;

use jobgate_config::DispatcherConfig;
use jobgate_core::{DispatcherError, DispatcherResult, Provider};
use metrics::counter;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::telemetry::{RECONCILE_FAILURES, RECONCILE_PASSES};

/// Periodic drift correction against the shared provider.
///
/// The first pass runs immediately. A pass that errors or outlives the pass
/// ceiling counts as a failure; only a run of consecutive failures ends the
/// loop. A pass that defers part of its cleanup still succeeds.
pub struct ReconcileLoop {
    provider: Arc<dyn Provider>,
    interval: Duration,
    pass_timeout: Duration,
    max_consecutive_failures: u32,
}

impl ReconcileLoop {
    pub fn new(provider: Arc<dyn Provider>, config: &DispatcherConfig) -> Self {
        Self {
            provider,
            interval: Duration::from_secs(config.reconcile_interval_seconds),
            pass_timeout: config.reconcile_pass_ceiling(),
            max_consecutive_failures: config.max_consecutive_reconcile_failures,
        }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> DispatcherResult<()> {
        info!(
            "启动协调循环，间隔 {}s，provider: {}",
            self.interval.as_secs(),
            self.provider.name()
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_failures: u32 = 0;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown_rx.recv() => {
                    info!("协调循环收到关闭信号");
                    return Ok(());
                }
            }

            debug!("reconciling...");
            let pass = tokio::time::timeout(self.pass_timeout, self.provider.reconcile());
            let outcome = tokio::select! {
                outcome = pass => outcome,
                _ = shutdown_rx.recv() => {
                    info!("协调循环收到关闭信号，中止本轮协调");
                    return Ok(());
                }
            };

            let failure = match outcome {
                Ok(Ok(report)) => {
                    consecutive_failures = 0;
                    counter!(RECONCILE_PASSES).increment(1);
                    if report.is_noop() {
                        debug!(observed = report.observed, "协调完成，无需处理");
                    } else {
                        info!(
                            observed = report.observed,
                            completed = report.completed.len(),
                            failed = report.failed.len(),
                            expired = report.expired.len(),
                            orphaned = report.orphaned.len(),
                            removal_failures = report.removal_failures,
                            deferred = report.deferred,
                            "协调完成"
                        );
                    }
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("协调超时 ({}s)", self.pass_timeout.as_secs()),
            };

            counter!(RECONCILE_FAILURES).increment(1);
            consecutive_failures += 1;
            if consecutive_failures >= self.max_consecutive_failures {
                error!(attempts = consecutive_failures, error = %failure, "协调连续失败，停止服务");
                return Err(DispatcherError::ReconcileRetriesExhausted {
                    attempts: consecutive_failures,
                    last_error: failure,
                });
            }
            warn!(
                attempt = consecutive_failures,
                max = self.max_consecutive_failures,
                error = %failure,
                "协调失败，等待下一轮"
            );
        }
    }
}
