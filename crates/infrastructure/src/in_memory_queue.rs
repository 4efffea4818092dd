use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use jobgate_core::{
    AccessKeys, DispatcherResult, QueueListener, QueueMessage, ReceiveError, Resolution,
    ResolutionGuard,
};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

/// A message that was rejected onto the dead-letter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub id: String,
    pub payload: Vec<u8>,
    pub delivery_count: u32,
    pub reason: String,
}

#[derive(Debug)]
struct Envelope {
    id: String,
    payload: Vec<u8>,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: Mutex<VecDeque<Envelope>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    acknowledged: Mutex<Vec<String>>,
    notify: Notify,
    closed: AtomicBool,
}

impl QueueState {
    async fn enqueue(&self, envelope: Envelope) {
        self.ready.lock().await.push_back(envelope);
        self.notify.notify_one();
    }
}

/// 内存队列监听器
///
/// Single-process queue for embedded deployments and tests. Released
/// messages go back to the tail with their delivery count incremented;
/// rejected ones land on an inspectable dead-letter list.
#[derive(Clone)]
pub struct InMemoryQueueListener {
    state: Arc<QueueState>,
    access_keys: AccessKeys,
}

impl InMemoryQueueListener {
    pub fn new(queue: impl Into<String>) -> Self {
        let queue = queue.into();
        info!("创建内存队列监听器: {}", queue);
        Self {
            state: Arc::new(QueueState::default()),
            access_keys: AccessKeys {
                key_name: "in-memory".to_string(),
                key: String::new(),
                endpoint: "memory://local".to_string(),
                queue,
            },
        }
    }

    pub fn with_access_keys(mut self, access_keys: AccessKeys) -> Self {
        self.access_keys = access_keys;
        self
    }

    /// Enqueues a payload and returns the generated message id.
    pub async fn publish(&self, payload: impl Into<Vec<u8>>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.state
            .enqueue(Envelope {
                id: id.clone(),
                payload: payload.into(),
                delivery_count: 1,
            })
            .await;
        debug!("消息已发布到内存队列: {}", id);
        id
    }

    /// Ends the stream once the ready queue drains; `receive` then returns
    /// `ReceiveError::Closed`.
    pub fn close(&self) {
        self.state.closed.store(true, Ordering::Release);
        self.state.notify.notify_waiters();
    }

    pub async fn pending(&self) -> usize {
        self.state.ready.lock().await.len()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.dead_letters.lock().await.clone()
    }

    pub async fn acknowledged(&self) -> Vec<String> {
        self.state.acknowledged.lock().await.clone()
    }
}

#[async_trait]
impl QueueListener for InMemoryQueueListener {
    async fn receive(&self) -> Result<Box<dyn QueueMessage>, ReceiveError> {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(envelope) = self.state.ready.lock().await.pop_front() {
                return Ok(Box::new(InMemoryMessage {
                    id: envelope.id,
                    payload: envelope.payload,
                    delivery_count: envelope.delivery_count,
                    state: Arc::clone(&self.state),
                    guard: ResolutionGuard::new(),
                }));
            }
            if self.state.closed.load(Ordering::Acquire) {
                return Err(ReceiveError::Closed);
            }

            notified.await;
        }
    }

    fn access_keys(&self) -> &AccessKeys {
        &self.access_keys
    }
}

pub struct InMemoryMessage {
    id: String,
    payload: Vec<u8>,
    delivery_count: u32,
    state: Arc<QueueState>,
    guard: ResolutionGuard,
}

impl std::fmt::Debug for InMemoryMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMessage")
            .field("id", &self.id)
            .field("delivery_count", &self.delivery_count)
            .field("resolution", &self.guard.current())
            .finish()
    }
}

#[async_trait]
impl QueueMessage for InMemoryMessage {
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
        self.state.acknowledged.lock().await.push(self.id.clone());
        Ok(())
    }

    async fn release(&self) -> DispatcherResult<()> {
        self.guard.claim(&self.id, Resolution::Released)?;
        self.state
            .enqueue(Envelope {
                id: self.id.clone(),
                payload: self.payload.clone(),
                delivery_count: self.delivery_count.saturating_add(1),
            })
            .await;
        Ok(())
    }

    async fn reject(&self, reason: &str) -> DispatcherResult<()> {
        self.guard.claim(&self.id, Resolution::Rejected)?;
        warn!(message_id = %self.id, reason, "消息转入死信列表");
        self.state.dead_letters.lock().await.push(DeadLetter {
            id: self.id.clone(),
            payload: self.payload.clone(),
            delivery_count: self.delivery_count,
            reason: reason.to_string(),
        });
        Ok(())
    }
}

impl Drop for InMemoryMessage {
    fn drop(&mut self) {
        if !self.guard.is_resolved() {
            warn!(message_id = %self.id, "消息未被处理即被丢弃");
        }
    }
}
