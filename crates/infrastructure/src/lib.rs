//! Concrete collaborators behind the jobgate traits: queue listeners
//! (RabbitMQ, in-memory) and workload backends (Kubernetes, Azure Batch).

pub mod amqp;
pub mod azure_batch;
pub mod in_memory_queue;
pub mod kubernetes;
pub mod listener_factory;
pub mod redact;

pub use amqp::{AmqpMessage, AmqpQueueListener};
pub use azure_batch::AzureBatchBackend;
pub use in_memory_queue::{DeadLetter, InMemoryMessage, InMemoryQueueListener};
pub use kubernetes::KubernetesBackend;
pub use listener_factory::QueueListenerFactory;
