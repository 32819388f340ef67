//! 按配置构造任务队列实现

use std::sync::Arc;

use tracing::info;

use router_core::config::{MessageQueueConfig, MessageQueueType};
use router_core::RouterResult;
use router_domain::messaging::TaskQueue;

use crate::in_memory_queue::InMemoryTaskQueue;
use crate::message_queue::RabbitMqTaskQueue;

/// 创建配置指定类型的任务队列
pub async fn create_task_queue(config: &MessageQueueConfig) -> RouterResult<Arc<dyn TaskQueue>> {
    match config.r#type {
        MessageQueueType::Rabbitmq => {
            let queue = RabbitMqTaskQueue::connect(config).await?;
            Ok(Arc::new(queue))
        }
        MessageQueueType::InMemory => {
            info!("使用内存消息队列（单机部署模式）");
            Ok(Arc::new(InMemoryTaskQueue::new()))
        }
    }
}
