use std::sync::Arc;

use jobgate_config::{MessageQueueConfig, MessageQueueType};
use jobgate_core::{AccessKeys, DispatcherResult, QueueListener};
use tracing::{debug, info};

use crate::{redact::strip_credentials, AmqpQueueListener, InMemoryQueueListener};

pub struct QueueListenerFactory;

impl QueueListenerFactory {
    pub async fn create(config: &MessageQueueConfig) -> DispatcherResult<Arc<dyn QueueListener>> {
        debug!("Creating queue listener with type: {:?}", config.r#type);

        match config.r#type {
            MessageQueueType::Amqp => {
                info!("Initializing RabbitMQ queue listener");
                let listener = AmqpQueueListener::connect(config).await?;
                Ok(Arc::new(listener))
            }
            MessageQueueType::InMemory => {
                info!("Initializing in-memory queue listener");
                Ok(Arc::new(Self::in_memory(config)))
            }
        }
    }

    pub fn in_memory(config: &MessageQueueConfig) -> InMemoryQueueListener {
        let listener = InMemoryQueueListener::new(config.queue.clone());
        if config.access_key_name.is_empty() {
            return listener;
        }
        listener.with_access_keys(AccessKeys {
            key_name: config.access_key_name.clone(),
            key: config.access_key.clone(),
            endpoint: strip_credentials(&config.url),
            queue: config.queue.clone(),
        })
    }
}
