//! 任务队列端口

use async_trait::async_trait;

use router_core::RouterResult;

use crate::entities::TaskMessage;

/// 一次待确认的投递
#[derive(Debug, Clone)]
pub struct TaskDelivery {
    /// 确认/拒绝时使用的投递标签
    pub delivery_tag: u64,
    pub task: TaskMessage,
}

/// 任务队列抽象，RabbitMQ实现与内存实现共用
///
/// 发布侧：持久化发布，发布确认失败即视为发布失败，
/// 由派发器将对应日志行置为 failed。
/// 消费侧：拉取-确认模型，`nack(requeue=false)` 表示消息
/// 不可恢复（死信），不再投递。
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn publish_task(&self, routing_key: &str, task: &TaskMessage) -> RouterResult<()>;
    /// 拉取一条投递，队列为空返回 `None`
    async fn fetch_task(&self) -> RouterResult<Option<TaskDelivery>>;
    async fn ack(&self, delivery_tag: u64) -> RouterResult<()>;
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> RouterResult<()>;
    /// 队列当前深度，监控用
    async fn queue_depth(&self) -> RouterResult<u32>;
}
