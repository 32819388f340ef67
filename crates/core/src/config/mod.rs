mod api;
mod app_config;
mod database;
mod dispatcher_node;
mod message_queue;

pub use api::{ApiConfig, LoggingConfig};
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use dispatcher_node::{DispatcherConfig, NodeConfig, WorkerConfig};
pub use message_queue::{MessageQueueConfig, MessageQueueType};
