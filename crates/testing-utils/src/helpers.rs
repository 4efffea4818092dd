//! Async waiting helpers that also work under `tokio::time::pause`.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};

pub struct TestEnv;

impl TestEnv {
    /// Polls `condition` every 10ms until it holds or `timeout` elapses.
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        condition().await
    }
}
