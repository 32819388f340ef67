//! 基础设施层
//!
//! 提供领域仓储与消息队列的具体实现：
//! - PostgreSQL 仓储（规则、记录、分析配置、执行日志、节点）
//! - RabbitMQ 消息队列（生产环境）
//! - 内存消息队列（测试与单机部署）

pub mod database;
pub mod in_memory_queue;
pub mod message_queue;
pub mod message_queue_factory;

pub use database::DatabaseManager;
pub use in_memory_queue::InMemoryTaskQueue;
pub use message_queue::RabbitMqTaskQueue;
pub use message_queue_factory::create_task_queue;
