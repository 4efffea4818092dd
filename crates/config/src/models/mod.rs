pub mod app_config;
pub mod data_plane;
pub mod dispatcher;
pub mod message_queue;
pub mod module;
pub mod observability;
pub mod providers;

pub use app_config::*;
pub use data_plane::*;
pub use dispatcher::*;
pub use message_queue::*;
pub use module::*;
pub use observability::*;
pub use providers::*;
