//! 仓储抽象
//!
//! 数据访问的抽象接口，遵循依赖倒置原则，
//! 单元测试以内存实现替换。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use router_core::RouterResult;

use crate::entities::{
    AnalysisConfig, ExecutionLog, ExecutionStatistics, ExecutionStatus, NodeInfo, NodeRecord,
    Recording,
};
use crate::rule::{DocumentFilter, RoutingRule};

/// 派发前对记录的原子占用结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// 本次调用成功占用，可以开始发布任务
    Claimed,
    /// 该派发入口已处理过此记录（幂等返回）
    AlreadyAssigned,
    /// 记录不存在
    NotFound,
}

/// 路由规则仓储抽象
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// 创建规则，rule_id 重复时返回错误
    async fn create(&self, rule: &RoutingRule) -> RouterResult<RoutingRule>;
    async fn find_by_rule_id(&self, rule_id: &str) -> RouterResult<Option<RoutingRule>>;
    /// 按派发入口查找规则
    async fn find_by_router_id(&self, router_id: &str) -> RouterResult<Option<RoutingRule>>;
    /// 按优先级降序返回全部（或仅启用的）规则
    async fn find_all(&self, enabled_only: bool) -> RouterResult<Vec<RoutingRule>>;
    async fn update(&self, rule: &RoutingRule) -> RouterResult<RoutingRule>;
    async fn delete(&self, rule_id: &str) -> RouterResult<bool>;
}

/// 感测记录仓储抽象
///
/// recordings 由采集侧维护，本系统只读取、
/// 以及原子更新派发标记两个字段。
#[async_trait]
pub trait RecordingRepository: Send + Sync {
    async fn find_by_uuid(&self, analyze_uuid: &str) -> RouterResult<Option<Recording>>;

    /// 原子占用：仅当 router_id 不在 assigned_router_ids 中时
    /// 追加并刷新 last_router_dispatch，整个判断+写入为单个条件更新
    async fn try_claim(&self, analyze_uuid: &str, router_id: &str) -> RouterResult<ClaimOutcome>;

    /// 占用补偿：全部发布失败时移除标记，使后续派发可从头重试
    async fn release_claim(&self, analyze_uuid: &str, router_id: &str) -> RouterResult<bool>;

    async fn count_matching(&self, filter: &DocumentFilter) -> RouterResult<u64>;
    async fn find_matching(
        &self,
        filter: &DocumentFilter,
        limit: Option<u32>,
    ) -> RouterResult<Vec<Recording>>;

    /// 与 find_matching 相同，但排除 assigned_router_ids 已含该
    /// router_id 的记录（回填查询）
    async fn count_unassigned(
        &self,
        filter: &DocumentFilter,
        router_id: &str,
    ) -> RouterResult<u64>;
    async fn find_unassigned(
        &self,
        filter: &DocumentFilter,
        router_id: &str,
        limit: Option<u32>,
    ) -> RouterResult<Vec<Recording>>;
}

/// 分析配置仓储抽象（只读）
#[async_trait]
pub trait AnalysisConfigRepository: Send + Sync {
    async fn find_by_config_id(&self, config_id: &str) -> RouterResult<Option<AnalysisConfig>>;
}

/// 执行日志仓储抽象
#[async_trait]
pub trait ExecutionLogRepository: Send + Sync {
    async fn create(&self, log: &ExecutionLog) -> RouterResult<ExecutionLog>;
    async fn find_by_task_id(&self, task_id: &str) -> RouterResult<Option<ExecutionLog>>;
    /// 按创建时间倒序分页
    async fn find_by_router_id(
        &self,
        router_id: &str,
        limit: i64,
        skip: i64,
    ) -> RouterResult<Vec<ExecutionLog>>;
    /// 状态迁移，时间戳只写一次语义见 `ExecutionLog::apply_status`；
    /// 返回是否有行被更新
    async fn update_status(
        &self,
        task_id: &str,
        status: ExecutionStatus,
        error_message: Option<&str>,
    ) -> RouterResult<bool>;
    /// 消费端领取任务时回填节点标识
    async fn assign_node(&self, task_id: &str, node_id: &str) -> RouterResult<bool>;
    async fn get_statistics(&self, router_id: &str) -> RouterResult<ExecutionStatistics>;
}

/// 节点存活仓储抽象
#[async_trait]
pub trait NodeRepository: Send + Sync {
    /// 注册即upsert：覆盖info、归零current_tasks、刷新心跳；
    /// created_at 仅在首次插入时写入
    async fn register(&self, node_id: &str, info: &NodeInfo) -> RouterResult<NodeRecord>;
    /// 刷新心跳；节点不存在时返回 false，调用方应重新注册
    async fn heartbeat(&self, node_id: &str, current_tasks: Option<i32>) -> RouterResult<bool>;
    async fn find_by_id(&self, node_id: &str) -> RouterResult<Option<NodeRecord>>;
    /// 按最近心跳倒序
    async fn find_all(&self) -> RouterResult<Vec<NodeRecord>>;
    async fn unregister(&self, node_id: &str) -> RouterResult<bool>;
    /// 显式保留操作：删除心跳早于给定时刻的记录。
    /// 绝不自动调度，仅供运维端点调用
    async fn remove_stale(&self, older_than: DateTime<Utc>) -> RouterResult<u64>;
}
