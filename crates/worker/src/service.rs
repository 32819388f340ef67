//! Worker服务装配
//!
//! 启动后并行运行两条循环：心跳上报与任务轮询。
//! 任务执行按 max_concurrent_tasks 并发派生，在途计数同时供
//! 心跳上报与拉取节流使用；停止时先停循环再等待在途任务完成。

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::time::interval;
use tracing::{error, info, warn};

use router_core::{AppConfig, RouterError, RouterResult};
use router_domain::entities::NodeInfo;
use router_domain::messaging::TaskQueue;
use router_domain::repositories::ExecutionLogRepository;
use router_domain::services::NodeRegistry;

use crate::consumer::TaskConsumer;
use crate::executor::ExecutorRegistry;
use crate::heartbeat::HeartbeatLoop;

/// 工作节点服务
pub struct WorkerService {
    node_id: String,
    node_registry: Arc<dyn NodeRegistry>,
    consumer: Arc<TaskConsumer>,
    heartbeat: Arc<HeartbeatLoop>,
    in_flight: Arc<AtomicI32>,
    max_concurrent_tasks: i32,
    poll_interval: Duration,
    shutdown_tx: RwLock<Option<broadcast::Sender<()>>>,
}

impl WorkerService {
    pub fn new(
        config: &AppConfig,
        node_registry: Arc<dyn NodeRegistry>,
        log_repo: Arc<dyn ExecutionLogRepository>,
        task_queue: Arc<dyn TaskQueue>,
        executors: Arc<ExecutorRegistry>,
    ) -> Self {
        let node_id = config.worker.node_id.clone();
        let in_flight = Arc::new(AtomicI32::new(0));

        let consumer = Arc::new(TaskConsumer::new(
            &node_id,
            task_queue,
            log_repo,
            executors.clone(),
            config.message_queue.max_retries,
        ));

        let info = NodeInfo {
            hostname: hostname::get()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            version: env!("CARGO_PKG_VERSION").to_string(),
            // 能力即已注册执行器能处理的分析方法
            capabilities: executors.supported_methods(),
            max_concurrent_tasks: config.worker.max_concurrent_tasks,
            tags: config.worker.tags.clone(),
        };
        let heartbeat = Arc::new(HeartbeatLoop::new(
            node_registry.clone(),
            &node_id,
            info,
            Duration::from_secs(config.node.heartbeat_interval_seconds),
            in_flight.clone(),
        ));

        Self {
            node_id,
            node_registry,
            consumer,
            heartbeat,
            in_flight,
            max_concurrent_tasks: config.worker.max_concurrent_tasks,
            poll_interval: Duration::from_millis(config.worker.poll_interval_ms),
            shutdown_tx: RwLock::new(None),
        }
    }

    /// 启动心跳与轮询循环；重复启动报错
    pub async fn start(&self) -> RouterResult<()> {
        let mut tx_guard = self.shutdown_tx.write().await;
        if tx_guard.is_some() {
            return Err(RouterError::Internal("Worker服务已在运行".to_string()));
        }

        info!(node_id = %self.node_id, "启动Worker服务");

        let (shutdown_tx, heartbeat_rx) = broadcast::channel(1);
        let poll_rx = shutdown_tx.subscribe();
        *tx_guard = Some(shutdown_tx);
        drop(tx_guard);

        let heartbeat = self.heartbeat.clone();
        tokio::spawn(async move {
            if let Err(err) = heartbeat.run(heartbeat_rx).await {
                error!(error = %err, "心跳循环异常退出");
            }
        });

        let consumer = self.consumer.clone();
        let in_flight = self.in_flight.clone();
        let max_concurrent = self.max_concurrent_tasks;
        let poll_interval = self.poll_interval;
        tokio::spawn(async move {
            Self::run_poll_loop(consumer, in_flight, max_concurrent, poll_interval, poll_rx).await;
        });

        info!(node_id = %self.node_id, "Worker服务启动完成");
        Ok(())
    }

    /// 停止循环、等待在途任务、注销节点
    pub async fn stop(&self) -> RouterResult<()> {
        let mut tx_guard = self.shutdown_tx.write().await;
        let Some(shutdown_tx) = tx_guard.take() else {
            return Ok(());
        };
        drop(tx_guard);

        info!(node_id = %self.node_id, "停止Worker服务");
        let _ = shutdown_tx.send(());

        // 最多等待30秒让在途任务收尾
        let mut waited = 0u32;
        while self.current_task_count() > 0 && waited < 30 {
            info!(
                node_id = %self.node_id,
                in_flight = self.current_task_count(),
                "等待在途任务完成"
            );
            tokio::time::sleep(Duration::from_secs(1)).await;
            waited += 1;
        }
        if self.current_task_count() > 0 {
            warn!(
                node_id = %self.node_id,
                in_flight = self.current_task_count(),
                "仍有在途任务未完成，继续停止"
            );
        }

        if let Err(err) = self.node_registry.unregister(&self.node_id).await {
            warn!(node_id = %self.node_id, error = %err, "节点注销失败");
        }

        info!(node_id = %self.node_id, "Worker服务已停止");
        Ok(())
    }

    pub fn current_task_count(&self) -> i32 {
        self.in_flight.load(Ordering::Relaxed)
    }

    async fn run_poll_loop(
        consumer: Arc<TaskConsumer>,
        in_flight: Arc<AtomicI32>,
        max_concurrent: i32,
        poll_interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut ticker = interval(poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    Self::drain_available(&consumer, &in_flight, max_concurrent).await;
                }
                _ = shutdown_rx.recv() => {
                    info!("任务轮询收到停止信号");
                    break;
                }
            }
        }
    }

    /// 在并发余量内持续拉取，队列取空或拉取出错即返回等下一轮
    async fn drain_available(
        consumer: &Arc<TaskConsumer>,
        in_flight: &Arc<AtomicI32>,
        max_concurrent: i32,
    ) {
        while in_flight.load(Ordering::Relaxed) < max_concurrent {
            match consumer.fetch().await {
                Ok(Some(delivery)) => {
                    in_flight.fetch_add(1, Ordering::Relaxed);
                    let consumer = consumer.clone();
                    let in_flight = in_flight.clone();
                    tokio::spawn(async move {
                        if let Err(err) = consumer.process(delivery).await {
                            error!(error = %err, "处理任务失败");
                        }
                        in_flight.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                Ok(None) => break,
                Err(err) => {
                    error!(error = %err, "拉取任务失败");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use router_dispatcher::HeartbeatRegistry;
    use router_domain::entities::{ExecutionLog, ExecutionStatus, TaskMessage};
    use router_testing_utils::{
        analysis_config, MockExecutionLogRepository, MockNodeRepository, MockTaskQueue,
        RuleBuilder,
    };

    use crate::executor::LoggingExecutor;

    fn worker_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.worker.enabled = true;
        config.worker.node_id = "node-svc".to_string();
        config.worker.poll_interval_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_worker_service_processes_published_task() {
        let node_repo = Arc::new(MockNodeRepository::new());
        let registry: Arc<dyn NodeRegistry> = Arc::new(HeartbeatRegistry::new(
            node_repo.clone(),
            Duration::from_secs(90),
        ));
        let log_repo = Arc::new(MockExecutionLogRepository::new());
        let queue = Arc::new(MockTaskQueue::new());

        let mut executors = ExecutorRegistry::new();
        executors.register(Arc::new(LoggingExecutor::new("fft")));

        let service = WorkerService::new(
            &worker_config(),
            registry,
            log_repo.clone(),
            queue.clone(),
            Arc::new(executors),
        );

        // 入队一条任务并落 pending 日志行
        let rule = RuleBuilder::new("R1").build();
        let config = analysis_config("cfg-fft", "fft", true);
        let task = TaskMessage::for_action("rec-1", &rule, &rule.actions[0], &config, "R1", None);
        log_repo.insert(ExecutionLog::from_task(&task));
        queue
            .publish_task(&task.routing_key("analysis"), &task)
            .await
            .expect("入队失败");

        service.start().await.expect("启动失败");
        // 重复启动被拒绝
        assert!(service.start().await.is_err());

        // 节点注册与任务处理都是异步的，给出宽裕的等待窗口
        let mut done = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let log = log_repo
                .find_by_task_id(&task.task_id)
                .await
                .expect("查询失败")
                .expect("日志行应存在");
            if log.status == ExecutionStatus::Completed {
                done = true;
                break;
            }
        }
        assert!(done, "任务应在等待窗口内完成");
        assert!(node_repo.get("node-svc").is_some());
        assert_eq!(queue.pending_count(), 0);

        service.stop().await.expect("停止失败");
        // 优雅停止后节点注销
        assert!(node_repo.get("node-svc").is_none());
        // 停止后可再次启动
        service.start().await.expect("二次启动失败");
        service.stop().await.expect("二次停止失败");
    }
}
