use async_trait::async_trait;

use super::message::QueueMessage;
use crate::{errors::ReceiveError, models::AccessKeys};

/// 队列监听器抽象接口
#[async_trait]
pub trait QueueListener: Send + Sync {
    /// Waits for the next delivery.
    ///
    /// `ReceiveError::Transport` may clear up on a later call;
    /// `ReceiveError::Closed` is permanent.
    async fn receive(&self) -> Result<Box<dyn QueueMessage>, ReceiveError>;

    /// Credentials issued for dispatched work to reach the messaging layer.
    fn access_keys(&self) -> &AccessKeys;
}
