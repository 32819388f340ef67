//! 任务消费
//!
//! 逐条拉取，成功显式ack；瞬时失败nack重回队列，
//! 重试次数达到上限后将日志行置failed并拒绝不重回（死信）。
//! 消息体在重投间不变，重试次数在进程内按task_id计数。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use router_core::RouterResult;
use router_domain::entities::ExecutionStatus;
use router_domain::messaging::{TaskDelivery, TaskQueue};
use router_domain::repositories::ExecutionLogRepository;

use crate::executor::ExecutorRegistry;

/// 从队列消费任务并回写执行状态
pub struct TaskConsumer {
    node_id: String,
    task_queue: Arc<dyn TaskQueue>,
    log_repo: Arc<dyn ExecutionLogRepository>,
    executors: Arc<ExecutorRegistry>,
    max_retries: u32,
    attempts: Mutex<HashMap<String, u32>>,
}

impl TaskConsumer {
    pub fn new(
        node_id: &str,
        task_queue: Arc<dyn TaskQueue>,
        log_repo: Arc<dyn ExecutionLogRepository>,
        executors: Arc<ExecutorRegistry>,
        max_retries: u32,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            task_queue,
            log_repo,
            executors,
            max_retries: max_retries.max(1),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// 拉取一条投递，无任务时返回None
    pub async fn fetch(&self) -> RouterResult<Option<TaskDelivery>> {
        self.task_queue.fetch_task().await
    }

    /// 拉取并完整处理一条任务；返回是否处理到了任务
    pub async fn poll_once(&self) -> RouterResult<bool> {
        match self.fetch().await? {
            Some(delivery) => {
                self.process(delivery).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 处理一条投递：执行、回写状态、ack/nack
    pub async fn process(&self, delivery: TaskDelivery) -> RouterResult<()> {
        let task = &delivery.task;

        // 本节点没有对应执行器时重试无意义，直接死信
        let Some(executor) = self.executors.get(&task.analysis_method_id) else {
            warn!(
                task_id = %task.task_id,
                analysis_method_id = %task.analysis_method_id,
                "没有支持该分析方法的执行器，任务进入死信"
            );
            self.log_repo
                .update_status(
                    &task.task_id,
                    ExecutionStatus::Failed,
                    Some(&format!(
                        "节点不支持分析方法: {}",
                        task.analysis_method_id
                    )),
                )
                .await?;
            self.task_queue.nack(delivery.delivery_tag, false).await?;
            return Ok(());
        };

        self.log_repo
            .update_status(&task.task_id, ExecutionStatus::Processing, None)
            .await?;
        self.log_repo
            .assign_node(&task.task_id, &self.node_id)
            .await?;
        debug!(
            task_id = %task.task_id,
            analysis_method_id = %task.analysis_method_id,
            "开始执行任务"
        );

        match executor.execute(task).await {
            Ok(()) => {
                self.log_repo
                    .update_status(&task.task_id, ExecutionStatus::Completed, None)
                    .await?;
                self.task_queue.ack(delivery.delivery_tag).await?;
                self.attempts.lock().await.remove(&task.task_id);
                info!(task_id = %task.task_id, "任务执行完成");
            }
            Err(err) => {
                let attempt = {
                    let mut attempts = self.attempts.lock().await;
                    let counter = attempts.entry(task.task_id.clone()).or_insert(0);
                    *counter += 1;
                    *counter
                };

                if attempt < self.max_retries {
                    warn!(
                        task_id = %task.task_id,
                        attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "任务执行失败，重回队列"
                    );
                    self.task_queue.nack(delivery.delivery_tag, true).await?;
                } else {
                    error!(
                        task_id = %task.task_id,
                        attempt,
                        error = %err,
                        "任务重试次数耗尽，进入死信"
                    );
                    self.log_repo
                        .update_status(
                            &task.task_id,
                            ExecutionStatus::Failed,
                            Some(&format!("执行失败（第{attempt}次尝试）: {err}")),
                        )
                        .await?;
                    self.task_queue.nack(delivery.delivery_tag, false).await?;
                    self.attempts.lock().await.remove(&task.task_id);
                }
            }
        }
        Ok(())
    }
}
