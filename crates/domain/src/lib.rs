//! 领域层：实体、规则匹配引擎、仓储与服务抽象
//!
//! 本层不依赖任何具体存储或消息队列实现，
//! 所有副作用通过 `repositories` 与 `messaging` 中的抽象注入。

pub mod entities;
pub mod messaging;
pub mod repositories;
pub mod rule;
pub mod services;

pub use entities::{
    AnalysisConfig, ExecutionLog, ExecutionStatistics, ExecutionStatus, NodeInfo, NodeRecord,
    NodeStatistics, NodeStatusView, Recording, StatusProjection, TaskMessage, TaskMetadata,
};
pub use messaging::{TaskDelivery, TaskQueue};
pub use repositories::{
    AnalysisConfigRepository, ClaimOutcome, ExecutionLogRepository, NodeRepository,
    RecordingRepository, RuleRepository,
};
pub use rule::{
    compile_conditions, resolve_path, Condition, DocumentFilter, RoutingRule, RuleAction,
    ATTRIBUTE_BAG,
};
pub use services::{
    BackfillFailure, BackfillOutcome, BatchDispatchOutcome, DispatchFailure, DispatchOutcome,
    DispatchService, MatchPreview, NodeRegistry, RecordingPreview, RuleConditions,
};
