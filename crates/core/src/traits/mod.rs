pub mod backend;
pub mod message;
pub mod provider;
pub mod queue;

pub use backend::WorkloadBackend;
pub use message::QueueMessage;
pub use provider::Provider;
pub use queue::QueueListener;
