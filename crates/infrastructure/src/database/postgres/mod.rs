//! PostgreSQL 仓储实现
//!
//! recordings 与 analysis_configs 在生产环境由采集/配置侧维护，
//! 对应仓储只做读取与派发标记更新，不负责建表以外的写入。

pub mod analysis_config_repository;
pub mod execution_log_repository;
pub mod filter_sql;
pub mod node_repository;
pub mod recording_repository;
pub mod rule_repository;

pub use analysis_config_repository::PostgresAnalysisConfigRepository;
pub use execution_log_repository::PostgresExecutionLogRepository;
pub use node_repository::PostgresNodeRepository;
pub use recording_repository::PostgresRecordingRepository;
pub use rule_repository::PostgresRuleRepository;
