use std::fmt::Debug;

use async_trait::async_trait;

use crate::{models::Resolution, DispatcherResult};

/// 队列消息抽象
///
/// A normalized wrapper over one queue delivery. Exactly one of
/// `acknowledge`, `release` or `reject` may succeed per message; every later
/// call returns `DispatcherError::AlreadyResolved` without touching the
/// transport.
#[async_trait]
pub trait QueueMessage: Send + Sync + Debug {
    /// Transport message id, or a generated one when the transport has none.
    fn id(&self) -> &str;

    fn payload(&self) -> &[u8];

    /// How many times this message has been delivered, starting at 1.
    fn delivery_count(&self) -> u32;

    /// Lock / visibility token for transports that lease deliveries.
    fn lock_token(&self) -> Option<&str>;

    /// The resolution applied so far, if any.
    fn resolution(&self) -> Option<Resolution>;

    /// 确认消息处理完成，从队列中永久移除
    async fn acknowledge(&self) -> DispatcherResult<()>;

    /// 释放消息，重新入队等待再次投递
    async fn release(&self) -> DispatcherResult<()>;

    /// 拒绝消息，转入死信路径
    async fn reject(&self, reason: &str) -> DispatcherResult<()>;
}
