//! 服务抽象与结果类型
//!
//! API层只依赖这里的trait，具体实现由派发器crate提供并在装配时注入。

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use router_core::RouterResult;

use crate::entities::{NodeInfo, NodeRecord, NodeStatistics, NodeStatusView};
use crate::rule::Condition;

/// 预览/派发接口接受的条件文档
pub type RuleConditions = BTreeMap<String, Condition>;

/// 单次派发结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub analyze_uuid: String,
    pub router_id: String,
    pub created_task_ids: Vec<String>,
    /// 该记录此前已被本派发入口处理过（幂等返回，非错误）
    pub already_processed: bool,
    /// 因配置缺失/禁用而静默跳过的动作数
    pub skipped_configs: u32,
    /// 发布失败（对应日志行已置failed）的动作数
    pub publish_failures: u32,
}

impl DispatchOutcome {
    pub fn already_processed(analyze_uuid: &str, router_id: &str) -> Self {
        Self {
            analyze_uuid: analyze_uuid.to_string(),
            router_id: router_id.to_string(),
            created_task_ids: vec![],
            already_processed: true,
            skipped_configs: 0,
            publish_failures: 0,
        }
    }
}

/// 批量派发中单个派发入口的失败
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchFailure {
    pub router_id: String,
    pub error: String,
}

/// 批量派发结果，单个入口失败不中断其余
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDispatchOutcome {
    pub analyze_uuid: String,
    pub created_task_ids: Vec<String>,
    pub already_processed: Vec<String>,
    pub errors: Vec<DispatchFailure>,
    pub success: bool,
}

/// 回填中单条记录的失败
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillFailure {
    pub analyze_uuid: String,
    pub error: String,
}

/// 回填结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillOutcome {
    pub router_id: String,
    /// 满足条件且未被处理的记录总数（含本批之外的）
    pub total_matched: u64,
    /// 本批实际派发成功的记录数
    pub dispatched: u64,
    pub tasks_created: u64,
    pub failures: Vec<BackfillFailure>,
}

/// 预览返回的记录摘要
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingPreview {
    pub analyze_uuid: String,
    pub info_features: Value,
    pub assigned_router_ids: Vec<String>,
}

/// 条件预览结果，纯读取
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchPreview {
    pub total: u64,
    /// 前10条，便于界面速览
    pub sample: Vec<RecordingPreview>,
    pub records: Vec<RecordingPreview>,
}

/// 任务派发服务抽象
#[async_trait]
pub trait DispatchService: Send + Sync {
    /// 将一条记录按派发入口派发；幂等：重复调用返回 already_processed
    async fn dispatch_by_router_id(
        &self,
        analyze_uuid: &str,
        router_id: &str,
        sequence_order: Option<i32>,
    ) -> RouterResult<DispatchOutcome>;

    /// 批量派发；`sequential` 时为任务元数据标注1起始序号
    async fn dispatch_by_router_ids(
        &self,
        analyze_uuid: &str,
        router_ids: &[String],
        sequential: bool,
    ) -> RouterResult<BatchDispatchOutcome>;

    /// 回填历史记录；可重复执行，已处理记录自动排除
    async fn backfill_by_router_id(
        &self,
        router_id: &str,
        limit: Option<u32>,
    ) -> RouterResult<BackfillOutcome>;

    /// 预览条件命中的记录，不产生任何写入或发布
    async fn preview_matching_records(
        &self,
        conditions: &RuleConditions,
        limit: Option<u32>,
    ) -> RouterResult<MatchPreview>;
}

/// 节点存活注册表抽象
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    async fn register(&self, node_id: &str, info: &NodeInfo) -> RouterResult<NodeRecord>;
    /// 返回 false 表示节点未注册，调用方应重新注册
    async fn heartbeat(&self, node_id: &str, current_tasks: Option<i32>) -> RouterResult<bool>;
    /// 未知节点视为离线
    async fn is_alive(&self, node_id: &str) -> RouterResult<bool>;
    async fn list_nodes(
        &self,
        online_only: bool,
        limit: Option<usize>,
    ) -> RouterResult<Vec<NodeStatusView>>;
    async fn statistics(&self) -> RouterResult<NodeStatistics>;
    async fn unregister(&self, node_id: &str) -> RouterResult<bool>;
}
