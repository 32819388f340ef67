//! 心跳上报
//!
//! 启动时注册一次，之后按固定间隔上报在途任务数。
//! 注册表返回false（节点记录不存在）时立即重新注册，循环继续。

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{error, info, warn};

use router_core::RouterResult;
use router_domain::entities::NodeInfo;
use router_domain::services::NodeRegistry;

/// 工作节点的注册与心跳循环
pub struct HeartbeatLoop {
    registry: Arc<dyn NodeRegistry>,
    node_id: String,
    info: NodeInfo,
    heartbeat_interval: Duration,
    in_flight: Arc<AtomicI32>,
}

impl HeartbeatLoop {
    pub fn new(
        registry: Arc<dyn NodeRegistry>,
        node_id: &str,
        info: NodeInfo,
        heartbeat_interval: Duration,
        in_flight: Arc<AtomicI32>,
    ) -> Self {
        Self {
            registry,
            node_id: node_id.to_string(),
            info,
            heartbeat_interval,
            in_flight,
        }
    }

    /// 注册并循环上报，直到收到停止信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> RouterResult<()> {
        self.registry.register(&self.node_id, &self.info).await?;

        let mut ticker = interval(self.heartbeat_interval);
        // 首个tick立即到期，刚注册过无需再发
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // 单次心跳失败不退出循环
                    if let Err(err) = self.beat_once().await {
                        error!(node_id = %self.node_id, error = %err, "心跳上报失败");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(node_id = %self.node_id, "心跳循环收到停止信号");
                    break;
                }
            }
        }
        Ok(())
    }

    /// 上报一次心跳；节点记录丢失时重新注册
    pub async fn beat_once(&self) -> RouterResult<()> {
        let current_tasks = self.in_flight.load(Ordering::Relaxed);
        let known = self
            .registry
            .heartbeat(&self.node_id, Some(current_tasks))
            .await?;
        if !known {
            warn!(node_id = %self.node_id, "节点记录不存在，重新注册");
            self.registry.register(&self.node_id, &self.info).await?;
        }
        Ok(())
    }
}
