use serde::{Deserialize, Serialize};

use crate::errors::{RouterError, RouterResult};

/// 派发器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// 单次派发调用的时间上限，超时后放弃剩余动作（已发布任务不回滚）
    pub dispatch_timeout_seconds: u64,
    /// 回填未指定limit时的默认批量
    pub default_backfill_limit: u32,
    /// 预览未指定limit时的默认返回条数
    pub default_preview_limit: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout_seconds: 30,
            default_backfill_limit: 100,
            default_preview_limit: 100,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> RouterResult<()> {
        if self.dispatch_timeout_seconds == 0 {
            return Err(RouterError::Configuration(
                "dispatcher.dispatch_timeout_seconds 必须大于0".to_string(),
            ));
        }
        if self.default_backfill_limit == 0 {
            return Err(RouterError::Configuration(
                "dispatcher.default_backfill_limit 必须大于0".to_string(),
            ));
        }
        Ok(())
    }
}

/// 节点存活判定配置
///
/// 在线状态完全由心跳时间推导，不落库。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub heartbeat_interval_seconds: u64,
    pub heartbeat_timeout_seconds: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: 30,
            heartbeat_timeout_seconds: 90,
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> RouterResult<()> {
        if self.heartbeat_interval_seconds == 0 {
            return Err(RouterError::Configuration(
                "node.heartbeat_interval_seconds 必须大于0".to_string(),
            ));
        }
        // 超时必须留出余量，否则正常节点会在两次心跳之间被判离线
        if self.heartbeat_timeout_seconds <= self.heartbeat_interval_seconds {
            return Err(RouterError::Configuration(format!(
                "node.heartbeat_timeout_seconds ({}) 必须大于 heartbeat_interval_seconds ({})",
                self.heartbeat_timeout_seconds, self.heartbeat_interval_seconds
            )));
        }
        Ok(())
    }
}

/// 工作节点配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub node_id: String,
    pub max_concurrent_tasks: i32,
    /// 队列空闲时的轮询间隔
    pub poll_interval_ms: u64,
    /// 节点支持的分析能力标签
    pub capabilities: Vec<String>,
    pub tags: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            node_id: "node-001".to_string(),
            max_concurrent_tasks: 5,
            poll_interval_ms: 500,
            capabilities: vec!["generic".to_string()],
            tags: vec![],
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> RouterResult<()> {
        if self.enabled && self.node_id.trim().is_empty() {
            return Err(RouterError::Configuration(
                "worker.node_id 不能为空".to_string(),
            ));
        }
        if self.max_concurrent_tasks <= 0 {
            return Err(RouterError::Configuration(
                "worker.max_concurrent_tasks 必须大于0".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(RouterError::Configuration(
                "worker.poll_interval_ms 必须大于0".to_string(),
            ));
        }
        Ok(())
    }
}
