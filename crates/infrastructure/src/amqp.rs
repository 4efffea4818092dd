use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use jobgate_config::{AmqpQueueType, MessageQueueConfig};
use jobgate_core::{
    AccessKeys, DispatcherError, DispatcherResult, QueueListener, QueueMessage, ReceiveError,
    Resolution, ResolutionGuard,
};
use lapin::{
    acker::Acker,
    message::Delivery,
    options::*,
    types::{AMQPValue, FieldTable},
    Channel, Connection, ConnectionProperties, Consumer,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::redact::{redact_url, strip_credentials};

const DELIVERY_COUNT_HEADER: &str = "x-delivery-count";
const MAX_TRACKED_REDELIVERIES: usize = 10_000;

/// RabbitMQ队列监听器
///
/// Consumes the configured work queue with manual acknowledgements. Each
/// delivery is surfaced as an [`AmqpMessage`] that maps acknowledge,
/// release and reject onto `basic.ack`, `basic.nack(requeue)` and
/// `basic.reject`.
pub struct AmqpQueueListener {
    connection: Connection,
    _channel: Channel,
    consumer: Mutex<Consumer>,
    access_keys: AccessKeys,
    queue: String,
    /// Set for classic queues, which carry no delivery-count header.
    redeliveries: Option<Arc<RedeliveryTracker>>,
}

impl AmqpQueueListener {
    pub async fn connect(config: &MessageQueueConfig) -> DispatcherResult<Self> {
        let connect_timeout = Duration::from_secs(config.connection_timeout_seconds);
        let connection = tokio::time::timeout(
            connect_timeout,
            Connection::connect(&config.url, ConnectionProperties::default()),
        )
        .await
        .map_err(|_| {
            DispatcherError::MessageQueue(format!(
                "连接RabbitMQ超时 ({}s): {}",
                config.connection_timeout_seconds,
                redact_url(&config.url)
            ))
        })?
        .map_err(|e| DispatcherError::MessageQueue(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| DispatcherError::MessageQueue(format!("创建通道失败: {e}")))?;

        info!("成功连接到RabbitMQ: {}", redact_url(&config.url));

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| DispatcherError::MessageQueue(format!("设置prefetch失败: {e}")))?;

        Self::declare_queue(&channel, config).await?;

        let consumer_tag = format!("{}-{}", config.consumer_tag_prefix, local_hostname());
        let consumer = channel
            .basic_consume(
                &config.queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| DispatcherError::MessageQueue(format!("创建消费者失败: {e}")))?;

        debug!("为队列 {} 创建消费者: {}", config.queue, consumer_tag);

        Ok(Self {
            connection,
            _channel: channel,
            consumer: Mutex::new(consumer),
            access_keys: AccessKeys {
                key_name: config.access_key_name.clone(),
                key: config.access_key.clone(),
                endpoint: strip_credentials(&config.url),
                queue: config.queue.clone(),
            },
            queue: config.queue.clone(),
            redeliveries: match config.queue_type {
                AmqpQueueType::Quorum => None,
                AmqpQueueType::Classic => Some(Arc::new(RedeliveryTracker::default())),
            },
        })
    }

    async fn declare_queue(channel: &Channel, config: &MessageQueueConfig) -> DispatcherResult<()> {
        channel
            .queue_declare(
                &config.queue,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                queue_arguments(config),
            )
            .await
            .map_err(|e| {
                DispatcherError::MessageQueue(format!("声明队列 {} 失败: {e}", config.queue))
            })?;

        debug!("队列 {} ({}) 声明成功", config.queue, config.queue_type.as_str());
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    pub async fn close(&self) -> DispatcherResult<()> {
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| DispatcherError::MessageQueue(format!("关闭连接失败: {e}")))?;

        info!("RabbitMQ连接已关闭");
        Ok(())
    }
}

#[async_trait]
impl QueueListener for AmqpQueueListener {
    async fn receive(&self) -> Result<Box<dyn QueueMessage>, ReceiveError> {
        let mut consumer = self.consumer.lock().await;
        match consumer.next().await {
            Some(Ok(delivery)) => Ok(Box::new(AmqpMessage::from_delivery(
                delivery,
                self.redeliveries.clone(),
            ))),
            Some(Err(e)) => Err(ReceiveError::Transport(format!(
                "从队列 {} 接收消息失败: {e}",
                self.queue
            ))),
            None => Err(ReceiveError::Closed),
        }
    }

    fn access_keys(&self) -> &AccessKeys {
        &self.access_keys
    }
}

/// One RabbitMQ delivery awaiting resolution.
pub struct AmqpMessage {
    id: String,
    payload: Vec<u8>,
    delivery_count: u32,
    acker: Acker,
    guard: ResolutionGuard,
    redeliveries: Option<Arc<RedeliveryTracker>>,
}

impl AmqpMessage {
    fn from_delivery(delivery: Delivery, redeliveries: Option<Arc<RedeliveryTracker>>) -> Self {
        let message_id = delivery
            .properties
            .message_id()
            .as_ref()
            .map(|id| id.as_str().to_string());
        // Without a message id there is nothing stable to count against.
        let redeliveries = redeliveries.filter(|_| message_id.is_some());
        let id = message_id.unwrap_or_else(|| format!("tag-{}", delivery.delivery_tag));

        let delivery_count = delivery_count(
            delivery.properties.headers().as_ref(),
            delivery.redelivered,
            redeliveries.as_deref().map(|tracker| (tracker, id.as_str())),
        );

        Self {
            id,
            payload: delivery.data,
            delivery_count,
            acker: delivery.acker,
            guard: ResolutionGuard::new(),
            redeliveries,
        }
    }

    fn forget_redeliveries(&self) {
        if let Some(tracker) = &self.redeliveries {
            tracker.forget(&self.id);
        }
    }
}

fn delivery_count(
    headers: Option<&FieldTable>,
    redelivered: bool,
    tracked: Option<(&RedeliveryTracker, &str)>,
) -> u32 {
    if let Some(count) = headers.and_then(header_delivery_count) {
        return count;
    }
    match tracked {
        Some((tracker, message_id)) => tracker.observe(message_id, redelivered),
        None if redelivered => 2,
        None => 1,
    }
}

/// Quorum queues count previous deliveries in `x-delivery-count`, so the
/// current delivery is that value plus one.
fn queue_arguments(config: &MessageQueueConfig) -> FieldTable {
    let mut arguments = FieldTable::default();
    arguments.insert(
        "x-queue-type".into(),
        AMQPValue::LongString(config.queue_type.as_str().into()),
    );
    if let Some(exchange) = &config.dead_letter_exchange {
        arguments.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(exchange.as_str().into()),
        );
    }
    arguments
}

/// Per-message-id delivery counts for classic queues.
///
/// Entries go away when a message is acknowledged or rejected. Released
/// messages may be redelivered to another consumer, so the map is capped
/// and cleared when full.
#[derive(Debug, Default)]
struct RedeliveryTracker {
    counts: StdMutex<HashMap<String, u32>>,
}

impl RedeliveryTracker {
    fn observe(&self, message_id: &str, redelivered: bool) -> u32 {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        if counts.len() >= MAX_TRACKED_REDELIVERIES && !counts.contains_key(message_id) {
            warn!(tracked = counts.len(), "重投计数表已满，清空");
            counts.clear();
        }
        let count = counts.entry(message_id.to_string()).or_insert(1);
        if redelivered {
            // A redelivery we never saw the first delivery of is at least the second.
            *count = count.saturating_add(1);
        } else {
            *count = 1;
        }
        *count
    }

    fn forget(&self, message_id: &str) {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(message_id);
    }
}

fn header_delivery_count(headers: &FieldTable) -> Option<u32> {
    let value = headers
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == DELIVERY_COUNT_HEADER)
        .map(|(_, value)| value)?;

    let previous: i64 = match value {
        AMQPValue::LongLongInt(v) => *v,
        AMQPValue::LongInt(v) => i64::from(*v),
        AMQPValue::LongUInt(v) => i64::from(*v),
        AMQPValue::ShortInt(v) => i64::from(*v),
        AMQPValue::ShortUInt(v) => i64::from(*v),
        AMQPValue::ShortShortInt(v) => i64::from(*v),
        AMQPValue::ShortShortUInt(v) => i64::from(*v),
        _ => return None,
    };
    u32::try_from(previous.max(0)).ok().map(|p| p.saturating_add(1))
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

impl std::fmt::Debug for AmqpMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpMessage")
            .field("id", &self.id)
            .field("delivery_count", &self.delivery_count)
            .field("payload_len", &self.payload.len())
            .field("resolution", &self.guard.current())
            .finish()
    }
}

#[async_trait]
impl QueueMessage for AmqpMessage {
    fn id(&self) -> &str {
        &self.id
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    fn lock_token(&self) -> Option<&str> {
        None
    }

    fn resolution(&self) -> Option<Resolution> {
        self.guard.current()
    }

    async fn acknowledge(&self) -> DispatcherResult<()> {
        self.guard.claim(&self.id, Resolution::Acknowledged)?;
        self.forget_redeliveries();
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| DispatcherError::MessageQueue(format!("确认消息 {} 失败: {e}", self.id)))
    }

    async fn release(&self) -> DispatcherResult<()> {
        self.guard.claim(&self.id, Resolution::Released)?;
        self.acker
            .nack(BasicNackOptions {
                requeue: true,
                multiple: false,
            })
            .await
            .map(|_| ())
            .map_err(|e| DispatcherError::MessageQueue(format!("释放消息 {} 失败: {e}", self.id)))
    }

    async fn reject(&self, reason: &str) -> DispatcherResult<()> {
        self.guard.claim(&self.id, Resolution::Rejected)?;
        self.forget_redeliveries();
        warn!(message_id = %self.id, reason, "消息转入死信");
        self.acker
            .reject(BasicRejectOptions { requeue: false })
            .await
            .map(|_| ())
            .map_err(|e| DispatcherError::MessageQueue(format!("拒绝消息 {} 失败: {e}", self.id)))
    }
}

impl Drop for AmqpMessage {
    fn drop(&mut self) {
        if !self.guard.is_resolved() {
            warn!(message_id = %self.id, "消息未被处理即被丢弃，将在通道关闭后重新投递");
        }
    }
}
