//! 节点存活注册表
//!
//! 节点不持久化在线状态，读取时按 `now - last_heartbeat <= timeout`
//! 推导，心跳一停状态自然翻转。过期节点保留在表中供排障，
//! 只有显式调用 `remove_stale` 才会清除。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use router_core::RouterResult;
use router_domain::entities::{NodeInfo, NodeRecord, NodeStatistics, NodeStatusView};
use router_domain::repositories::NodeRepository;
use router_domain::services::NodeRegistry;

/// 基于心跳时间戳的注册表实现
pub struct HeartbeatRegistry {
    node_repo: Arc<dyn NodeRepository>,
    timeout: chrono::Duration,
}

impl HeartbeatRegistry {
    /// `timeout` 为心跳超时窗口，超过该时长未上报即视为离线
    pub fn new(node_repo: Arc<dyn NodeRepository>, timeout: Duration) -> Self {
        let timeout =
            chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::seconds(90));
        Self { node_repo, timeout }
    }
}

#[async_trait]
impl NodeRegistry for HeartbeatRegistry {
    async fn register(&self, node_id: &str, info: &NodeInfo) -> RouterResult<NodeRecord> {
        let record = self.node_repo.register(node_id, info).await?;
        info!(
            node_id,
            hostname = %record.info.hostname,
            capabilities = ?record.info.capabilities,
            "节点已注册"
        );
        Ok(record)
    }

    async fn heartbeat(&self, node_id: &str, current_tasks: Option<i32>) -> RouterResult<bool> {
        let known = self.node_repo.heartbeat(node_id, current_tasks).await?;
        if !known {
            warn!(node_id, "收到未注册节点的心跳");
        }
        Ok(known)
    }

    async fn is_alive(&self, node_id: &str) -> RouterResult<bool> {
        let now = Utc::now();
        Ok(self
            .node_repo
            .find_by_id(node_id)
            .await?
            .map(|record| record.is_alive(self.timeout, now))
            .unwrap_or(false))
    }

    async fn list_nodes(
        &self,
        online_only: bool,
        limit: Option<usize>,
    ) -> RouterResult<Vec<NodeStatusView>> {
        let now = Utc::now();
        let mut views: Vec<NodeStatusView> = self
            .node_repo
            .find_all()
            .await?
            .into_iter()
            .map(|record| NodeStatusView::from_record(record, self.timeout, now))
            .filter(|view| !online_only || view.online)
            .collect();
        if let Some(limit) = limit {
            views.truncate(limit);
        }
        Ok(views)
    }

    async fn statistics(&self) -> RouterResult<NodeStatistics> {
        let now = Utc::now();
        let mut stats = NodeStatistics::default();
        for record in self.node_repo.find_all().await? {
            stats.total += 1;
            if record.is_alive(self.timeout, now) {
                stats.online += 1;
            } else {
                stats.offline += 1;
            }
        }
        Ok(stats)
    }

    async fn unregister(&self, node_id: &str) -> RouterResult<bool> {
        let removed = self.node_repo.unregister(node_id).await?;
        if removed {
            info!(node_id, "节点已注销");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use router_testing_utils::{MockNodeRepository, NodeRecordBuilder};

    fn registry_with(repo: Arc<MockNodeRepository>, timeout_seconds: u64) -> HeartbeatRegistry {
        HeartbeatRegistry::new(repo, Duration::from_secs(timeout_seconds))
    }

    fn node_info() -> NodeInfo {
        NodeInfo {
            hostname: "worker-host".to_string(),
            version: "1.0.0".to_string(),
            capabilities: vec!["fft".to_string(), "rms".to_string()],
            max_concurrent_tasks: 4,
            tags: vec!["生产".to_string()],
        }
    }

    #[tokio::test]
    async fn test_register_then_alive() {
        let repo = Arc::new(MockNodeRepository::new());
        let registry = registry_with(repo.clone(), 90);

        let record = registry
            .register("node-a", &node_info())
            .await
            .expect("注册失败");
        assert_eq!(record.node_id, "node-a");
        assert_eq!(record.current_tasks, 0);
        assert!(registry.is_alive("node-a").await.expect("查询失败"));
    }

    #[tokio::test]
    async fn test_reregister_keeps_created_at_and_resets_load() {
        let repo = Arc::new(MockNodeRepository::new());
        let registry = registry_with(repo.clone(), 90);

        let first = registry
            .register("node-a", &node_info())
            .await
            .expect("注册失败");
        registry
            .heartbeat("node-a", Some(3))
            .await
            .expect("心跳失败");

        let mut updated = node_info();
        updated.capabilities.push("envelope".to_string());
        let second = registry
            .register("node-a", &updated)
            .await
            .expect("重注册失败");

        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.current_tasks, 0);
        assert!(second
            .info
            .capabilities
            .contains(&"envelope".to_string()));
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_node_returns_false() {
        let repo = Arc::new(MockNodeRepository::new());
        let registry = registry_with(repo, 90);

        let known = registry
            .heartbeat("node-ghost", Some(1))
            .await
            .expect("心跳调用失败");
        assert!(!known);
    }

    #[tokio::test]
    async fn test_liveness_derived_from_heartbeat_age() {
        let repo = Arc::new(MockNodeRepository::new());
        // 60秒超时：65秒前→离线，两次对比只差窗口设置
        repo.insert(NodeRecordBuilder::new("node-a").heartbeat_seconds_ago(65).build());

        let strict = registry_with(repo.clone(), 60);
        assert!(!strict.is_alive("node-a").await.expect("查询失败"));

        let lenient = registry_with(repo.clone(), 90);
        assert!(lenient.is_alive("node-a").await.expect("查询失败"));

        // 未知节点视为离线
        assert!(!strict.is_alive("node-missing").await.expect("查询失败"));
    }

    #[tokio::test]
    async fn test_list_nodes_filters_and_limits() {
        let repo = Arc::new(MockNodeRepository::new());
        repo.insert(NodeRecordBuilder::new("node-a").heartbeat_seconds_ago(5).build());
        repo.insert(NodeRecordBuilder::new("node-b").heartbeat_seconds_ago(10).build());
        repo.insert(
            NodeRecordBuilder::new("node-stale")
                .heartbeat_seconds_ago(300)
                .build(),
        );
        let registry = registry_with(repo, 90);

        let all = registry.list_nodes(false, None).await.expect("列举失败");
        assert_eq!(all.len(), 3);
        // 心跳新的在前
        assert_eq!(all[0].node_id, "node-a");
        assert!(!all.iter().find(|v| v.node_id == "node-stale").unwrap().online);

        let online = registry.list_nodes(true, None).await.expect("列举失败");
        assert_eq!(online.len(), 2);
        assert!(online.iter().all(|view| view.online));

        let limited = registry.list_nodes(false, Some(1)).await.expect("列举失败");
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].node_id, "node-a");
    }

    #[tokio::test]
    async fn test_statistics_totals_reconcile() {
        let repo = Arc::new(MockNodeRepository::new());
        repo.insert(NodeRecordBuilder::new("node-a").heartbeat_seconds_ago(5).build());
        repo.insert(
            NodeRecordBuilder::new("node-b")
                .heartbeat_seconds_ago(120)
                .build(),
        );
        repo.insert(
            NodeRecordBuilder::new("node-c")
                .heartbeat_seconds_ago(400)
                .build(),
        );
        let registry = registry_with(repo, 90);

        let stats = registry.statistics().await.expect("统计失败");
        assert_eq!(stats.total, 3);
        assert_eq!(stats.online, 1);
        assert_eq!(stats.offline, 2);
        assert_eq!(stats.total, stats.online + stats.offline);
    }

    #[tokio::test]
    async fn test_unregister_removes_node() {
        let repo = Arc::new(MockNodeRepository::new());
        let registry = registry_with(repo.clone(), 90);
        registry
            .register("node-a", &node_info())
            .await
            .expect("注册失败");

        assert!(registry.unregister("node-a").await.expect("注销失败"));
        assert!(!registry.unregister("node-a").await.expect("注销失败"));
        assert!(!registry.is_alive("node-a").await.expect("查询失败"));
    }

    #[tokio::test]
    async fn test_remove_stale_only_on_explicit_call() {
        let repo = Arc::new(MockNodeRepository::new());
        repo.insert(
            NodeRecordBuilder::new("node-stale")
                .heartbeat_seconds_ago(3600)
                .build(),
        );
        let registry = registry_with(repo.clone(), 90);

        // 离线不等于被删除
        let all = registry.list_nodes(false, None).await.expect("列举失败");
        assert_eq!(all.len(), 1);
        assert!(!all[0].online);

        let removed = repo
            .remove_stale(Utc::now() - ChronoDuration::seconds(600))
            .await
            .expect("清理失败");
        assert_eq!(removed, 1);
        assert!(registry
            .list_nodes(false, None)
            .await
            .expect("列举失败")
            .is_empty());
    }
}
