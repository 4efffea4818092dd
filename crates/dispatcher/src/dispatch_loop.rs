use std::sync::Arc;

use jobgate_core::{
    DispatcherError, DispatcherResult, Provider, QueueListener, QueueMessage, ReceiveError,
    SidecarArgs,
};
use metrics::counter;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::backoff::RetryPolicy;
use crate::telemetry::{
    DISPATCH_FAILURES, MESSAGES_DISPATCHED, MESSAGES_RECEIVED, MESSAGES_REJECTED, RECEIVE_FAILURES,
};

/// Queue consumption loop: receive, dispatch, make sure the message got
/// resolved, repeat.
///
/// Returns `Ok(())` on shutdown and an error only when the queue connection
/// is unusable: the stream closed, or transport errors persisted past the
/// retry policy. Dispatch errors never end the loop.
pub struct DispatchLoop {
    listener: Arc<dyn QueueListener>,
    provider: Arc<dyn Provider>,
    sidecar: Arc<SidecarArgs>,
    retry: RetryPolicy,
}

impl DispatchLoop {
    pub fn new(
        listener: Arc<dyn QueueListener>,
        provider: Arc<dyn Provider>,
        sidecar: Arc<SidecarArgs>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            listener,
            provider,
            sidecar,
            retry,
        }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> DispatcherResult<()> {
        info!("启动消息分发循环，provider: {}", self.provider.name());
        let mut consecutive_failures: u32 = 0;

        loop {
            let received = tokio::select! {
                received = self.listener.receive() => received,
                _ = shutdown_rx.recv() => {
                    info!("分发循环收到关闭信号");
                    return Ok(());
                }
            };

            match received {
                Ok(message) => {
                    consecutive_failures = 0;
                    self.process(message.as_ref()).await;
                }
                Err(ReceiveError::Closed) => {
                    error!("消息队列消费者已关闭，分发循环退出");
                    return Err(DispatcherError::QueueClosed);
                }
                Err(ReceiveError::Transport(reason)) => {
                    counter!(RECEIVE_FAILURES).increment(1);
                    consecutive_failures += 1;
                    if consecutive_failures >= self.retry.max_consecutive_failures() {
                        error!(
                            attempts = consecutive_failures,
                            error = %reason,
                            "接收消息连续失败，放弃重试"
                        );
                        return Err(DispatcherError::ReceiveRetriesExhausted {
                            attempts: consecutive_failures,
                            last_error: reason,
                        });
                    }

                    let delay = self.retry.delay_for(consecutive_failures - 1);
                    warn!(
                        attempt = consecutive_failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %reason,
                        "接收消息失败，稍后重试"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_rx.recv() => {
                            info!("分发循环在退避期间收到关闭信号");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Handles one message. Not raced against shutdown so an in-progress
    /// dispatch always resolves its message.
    async fn process(&self, message: &dyn QueueMessage) {
        let message_id = message.id().to_string();
        let delivery_count = message.delivery_count();
        counter!(MESSAGES_RECEIVED).increment(1);
        debug!(message_id = %message_id, delivery_count, "收到消息");

        if message.payload().iter().all(u8::is_ascii_whitespace) {
            warn!(message_id = %message_id, delivery_count, "消息负载为空，转入死信");
            counter!(MESSAGES_REJECTED).increment(1);
            if let Err(e) = message.reject("empty payload").await {
                error!(message_id = %message_id, error = %e, "拒绝空消息失败");
            }
            return;
        }

        match self.provider.dispatch(message, &self.sidecar).await {
            Ok(()) => {
                counter!(MESSAGES_DISPATCHED).increment(1);
                debug!(message_id = %message_id, delivery_count, "消息分发完成");
            }
            Err(e) => {
                counter!(DISPATCH_FAILURES).increment(1);
                error!(
                    message_id = %message_id,
                    delivery_count,
                    error = %e,
                    "分发消息失败"
                );
            }
        }

        if message.resolution().is_none() {
            warn!(message_id = %message_id, "Provider未处理消息，释放以便重新投递");
            if let Err(e) = message.release().await {
                error!(message_id = %message_id, error = %e, "释放消息失败");
            }
        }
    }
}
