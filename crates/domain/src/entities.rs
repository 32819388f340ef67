//! 核心实体定义

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::rule::{RoutingRule, RuleAction};

/// 感测记录（recordings 表由采集侧维护，本系统只更新派发标记）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub analyze_uuid: String,
    /// 属性袋，规则条件在其上求值
    pub info_features: Value,
    /// 已处理过本记录的派发入口，幂等判定依据
    #[serde(default)]
    pub assigned_router_ids: Vec<String>,
    pub last_router_dispatch: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Recording {
    pub fn is_assigned_to(&self, router_id: &str) -> bool {
        self.assigned_router_ids.iter().any(|id| id == router_id)
    }
}

/// 分析配置（analysis_configs 表由配置侧维护，此处只读）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub config_id: String,
    pub analysis_method_id: String,
    pub config_name: String,
    #[serde(default)]
    pub parameters: Value,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 任务消息的附加元数据，随消息发布并抄送到执行日志
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub rule_id: String,
    pub rule_name: String,
    pub router_id: String,
    pub config_name: String,
    /// 顺序派发时的1起始序号
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub sequence_order: Option<i32>,
}

/// 发布到消息队列的任务载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: String,
    pub analyze_uuid: String,
    pub analysis_method_id: String,
    pub config_id: String,
    pub target_instance: String,
    pub created_at: DateTime<Utc>,
    pub retry_count: i32,
    pub metadata: TaskMetadata,
}

impl TaskMessage {
    /// 为规则的一个动作构建任务，task_id 为新生成的UUID
    pub fn for_action(
        analyze_uuid: &str,
        rule: &RoutingRule,
        action: &RuleAction,
        config: &AnalysisConfig,
        router_id: &str,
        sequence_order: Option<i32>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            analyze_uuid: analyze_uuid.to_string(),
            analysis_method_id: action.analysis_method_id.clone(),
            config_id: action.config_id.clone(),
            target_instance: action.target_instance.clone(),
            created_at: Utc::now(),
            retry_count: 0,
            metadata: TaskMetadata {
                rule_id: rule.rule_id.clone(),
                rule_name: rule.rule_name.clone(),
                router_id: router_id.to_string(),
                config_name: config.config_name.clone(),
                sequence_order,
            },
        }
    }

    /// 发布用 routing key：`<prefix>.<analysis_method_id>`
    pub fn routing_key(&self, prefix: &str) -> String {
        format!("{}.{}", prefix, self.analysis_method_id)
    }
}

/// 任务执行状态，线格式为小写字符串
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Processing => "processing",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    /// 宽松解析：大小写归一，历史遗留的未知状态返回 `None`
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "pending" => Some(ExecutionStatus::Pending),
            "processing" => Some(ExecutionStatus::Processing),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 执行日志：每个已派发任务一行，发布前先落库
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub log_id: String,
    pub task_id: String,
    pub router_id: String,
    pub rule_id: String,
    pub analyze_uuid: String,
    pub analysis_method_id: String,
    pub config_id: String,
    pub target_instance: String,
    pub status: ExecutionStatus,
    /// 领取任务的节点，消费端回填
    pub node_id: Option<String>,
    pub error_message: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionLog {
    /// 从待发布的任务构建 pending 日志行
    pub fn from_task(task: &TaskMessage) -> Self {
        Self {
            log_id: Uuid::new_v4().to_string(),
            task_id: task.task_id.clone(),
            router_id: task.metadata.router_id.clone(),
            rule_id: task.metadata.rule_id.clone(),
            analyze_uuid: task.analyze_uuid.clone(),
            analysis_method_id: task.analysis_method_id.clone(),
            config_id: task.config_id.clone(),
            target_instance: task.target_instance.clone(),
            status: ExecutionStatus::Pending,
            node_id: None,
            error_message: None,
            metadata: serde_json::to_value(&task.metadata).unwrap_or(Value::Null),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// 状态迁移：`started_at` / `completed_at` 只写一次
    pub fn apply_status(
        &mut self,
        status: ExecutionStatus,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) {
        match status {
            ExecutionStatus::Processing => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
            }
            ExecutionStatus::Completed | ExecutionStatus::Failed => {
                if self.completed_at.is_none() {
                    self.completed_at = Some(now);
                }
            }
            ExecutionStatus::Pending => {}
        }
        self.status = status;
        if let Some(message) = error_message {
            self.error_message = Some(message);
        }
    }

    /// 处理耗时（秒），两个时间戳齐全才有值
    pub fn processing_seconds(&self) -> Option<f64> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        Some((completed - started).num_milliseconds() as f64 / 1000.0)
    }
}

/// 统计计算的原始行投影，`status` 保留存储中的原始字符串
/// 以便把历史遗留状态归入 unknown 桶
#[derive(Debug, Clone)]
pub struct StatusProjection {
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// 某个派发入口的执行统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionStatistics {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    /// 未识别的历史状态，计入此桶保证总数对账
    pub unknown: u64,
    /// completed / total * 100，保留两位小数
    pub success_rate: f64,
    pub last_execution: Option<DateTime<Utc>>,
    /// completed 且两时间戳齐全的行的平均处理秒数
    pub avg_processing_seconds: Option<f64>,
}

impl ExecutionStatistics {
    /// 从原始行投影聚合，是内存仓储与SQL聚合共同遵循的参考实现
    pub fn from_projections<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = StatusProjection>,
    {
        let mut stats = Self::default();
        let mut processing_total = 0.0;
        let mut processing_count = 0u64;

        for row in rows {
            stats.add_status_count(&row.status, 1);
            if stats.last_execution.map_or(true, |last| row.created_at > last) {
                stats.last_execution = Some(row.created_at);
            }
            if ExecutionStatus::parse(&row.status) == Some(ExecutionStatus::Completed) {
                if let (Some(started), Some(completed)) = (row.started_at, row.completed_at) {
                    processing_total += (completed - started).num_milliseconds() as f64 / 1000.0;
                    processing_count += 1;
                }
            }
        }

        if processing_count > 0 {
            stats.avg_processing_seconds = Some(processing_total / processing_count as f64);
        }
        stats.finalize();
        stats
    }

    pub fn add_status_count(&mut self, status: &str, count: u64) {
        self.total += count;
        match ExecutionStatus::parse(status) {
            Some(ExecutionStatus::Pending) => self.pending += count,
            Some(ExecutionStatus::Processing) => self.processing += count,
            Some(ExecutionStatus::Completed) => self.completed += count,
            Some(ExecutionStatus::Failed) => self.failed += count,
            None => self.unknown += count,
        }
    }

    /// 计数齐全后计算成功率
    pub fn finalize(&mut self) {
        self.success_rate = if self.total > 0 {
            let rate = self.completed as f64 / self.total as f64 * 100.0;
            (rate * 100.0).round() / 100.0
        } else {
            0.0
        };
    }
}

/// 节点静态信息，注册时上报
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub hostname: String,
    pub version: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub max_concurrent_tasks: i32,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// 节点存活记录
///
/// 不存储在线状态，在线与否由 `is_alive` 按心跳时间推导。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: String,
    pub info: NodeInfo,
    pub current_tasks: i32,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NodeRecord {
    /// 在线判定：`now - last_heartbeat <= timeout`
    pub fn is_alive(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_heartbeat <= timeout
    }
}

/// 节点读取视图，`online` 为读取时刻的推导值
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatusView {
    pub node_id: String,
    pub info: NodeInfo,
    pub current_tasks: i32,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub online: bool,
}

impl NodeStatusView {
    pub fn from_record(record: NodeRecord, timeout: Duration, now: DateTime<Utc>) -> Self {
        let online = record.is_alive(timeout, now);
        Self {
            node_id: record.node_id,
            info: record.info,
            current_tasks: record.current_tasks,
            last_heartbeat: record.last_heartbeat,
            created_at: record.created_at,
            online,
        }
    }
}

/// 节点总览统计，读取时刻推导，恒有 total = online + offline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStatistics {
    pub total: u64,
    pub online: u64,
    pub offline: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> TaskMessage {
        TaskMessage {
            task_id: "task-1".to_string(),
            analyze_uuid: "rec-1".to_string(),
            analysis_method_id: "fft".to_string(),
            config_id: "cfg-1".to_string(),
            target_instance: "primary".to_string(),
            created_at: Utc::now(),
            retry_count: 0,
            metadata: TaskMetadata {
                rule_id: "rule-1".to_string(),
                rule_name: "测试规则".to_string(),
                router_id: "R1".to_string(),
                config_name: "默认配置".to_string(),
                sequence_order: None,
            },
        }
    }

    #[test]
    fn test_routing_key_format() {
        let task = sample_task();
        assert_eq!(task.routing_key("analysis"), "analysis.fft");
    }

    #[test]
    fn test_task_message_wire_format() {
        let task = sample_task();
        let value = serde_json::to_value(&task).expect("序列化失败");
        assert_eq!(value["task_id"], "task-1");
        assert_eq!(value["retry_count"], 0);
        assert_eq!(value["metadata"]["router_id"], "R1");
        // 未设置序号时不出现在载荷中
        assert!(value["metadata"].get("sequence_order").is_none());
    }

    #[test]
    fn test_log_from_task_is_pending() {
        let task = sample_task();
        let log = ExecutionLog::from_task(&task);
        assert_eq!(log.status, ExecutionStatus::Pending);
        assert_eq!(log.task_id, "task-1");
        assert_eq!(log.router_id, "R1");
        assert!(log.started_at.is_none());
        assert!(log.completed_at.is_none());
    }

    #[test]
    fn test_status_timestamps_write_once() {
        let task = sample_task();
        let mut log = ExecutionLog::from_task(&task);

        let t1 = Utc::now();
        log.apply_status(ExecutionStatus::Processing, None, t1);
        assert_eq!(log.started_at, Some(t1));

        // 重复进入 processing 不覆盖 started_at
        let t2 = t1 + Duration::seconds(5);
        log.apply_status(ExecutionStatus::Processing, None, t2);
        assert_eq!(log.started_at, Some(t1));

        log.apply_status(ExecutionStatus::Completed, None, t2);
        assert_eq!(log.completed_at, Some(t2));

        let t3 = t2 + Duration::seconds(5);
        log.apply_status(ExecutionStatus::Failed, Some("晚到的失败".to_string()), t3);
        assert_eq!(log.completed_at, Some(t2));
        assert_eq!(log.processing_seconds(), Some(5.0));
    }

    #[test]
    fn test_publish_failure_goes_failed_without_started_at() {
        let task = sample_task();
        let mut log = ExecutionLog::from_task(&task);
        log.apply_status(
            ExecutionStatus::Failed,
            Some("消息队列发布失败".to_string()),
            Utc::now(),
        );
        assert_eq!(log.status, ExecutionStatus::Failed);
        assert!(log.started_at.is_none());
        assert!(log.completed_at.is_some());
        assert!(log.processing_seconds().is_none());
    }

    #[test]
    fn test_status_parse_is_lenient() {
        assert_eq!(
            ExecutionStatus::parse("Completed"),
            Some(ExecutionStatus::Completed)
        );
        assert_eq!(ExecutionStatus::parse("running"), None);
    }

    #[test]
    fn test_statistics_reconcile_with_legacy_statuses() {
        let now = Utc::now();
        let row = |status: &str, started: Option<i64>, completed: Option<i64>| StatusProjection {
            status: status.to_string(),
            created_at: now,
            started_at: started.map(|s| now + Duration::seconds(s)),
            completed_at: completed.map(|s| now + Duration::seconds(s)),
        };

        let stats = ExecutionStatistics::from_projections(vec![
            row("pending", None, None),
            row("completed", Some(0), Some(10)),
            row("completed", Some(0), Some(20)),
            // 历史遗留状态进入 unknown 桶
            row("running", Some(0), None),
            row("failed", Some(0), Some(1)),
        ]);

        assert_eq!(stats.total, 5);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.unknown, 1);
        assert_eq!(
            stats.total,
            stats.pending + stats.processing + stats.completed + stats.failed + stats.unknown
        );
        assert_eq!(stats.success_rate, 40.0);
        assert_eq!(stats.avg_processing_seconds, Some(15.0));
    }

    #[test]
    fn test_statistics_empty_set() {
        let stats = ExecutionStatistics::from_projections(vec![]);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert!(stats.last_execution.is_none());
        assert!(stats.avg_processing_seconds.is_none());
    }

    #[test]
    fn test_node_liveness_is_derived_from_heartbeat_age() {
        let now = Utc::now();
        let record = NodeRecord {
            node_id: "node-1".to_string(),
            info: NodeInfo {
                hostname: "edge-7".to_string(),
                version: "1.0.0".to_string(),
                capabilities: vec!["generic".to_string()],
                max_concurrent_tasks: 5,
                tags: vec![],
            },
            current_tasks: 0,
            last_heartbeat: now - Duration::seconds(65),
            created_at: now - Duration::days(1),
            updated_at: now,
        };

        // 心跳已65秒，超时60秒 => 离线
        assert!(!record.is_alive(Duration::seconds(60), now));
        assert!(record.is_alive(Duration::seconds(70), now));

        let view = NodeStatusView::from_record(record, Duration::seconds(60), now);
        assert!(!view.online);
    }
}
