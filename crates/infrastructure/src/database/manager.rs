//! 数据库连接管理

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use router_core::config::DatabaseConfig;
use router_core::{RouterError, RouterResult};
use router_domain::repositories::{
    AnalysisConfigRepository, ExecutionLogRepository, NodeRepository, RecordingRepository,
    RuleRepository,
};

use super::postgres::{
    PostgresAnalysisConfigRepository, PostgresExecutionLogRepository, PostgresNodeRepository,
    PostgresRecordingRepository, PostgresRuleRepository,
};

/// 连接池与仓储工厂
pub struct DatabaseManager {
    pool: PgPool,
}

impl DatabaseManager {
    /// 建立连接池，按配置决定是否执行迁移
    pub async fn connect(config: &DatabaseConfig) -> RouterResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;
        info!("数据库连接池已建立: max_connections={}", config.max_connections);

        let manager = Self { pool };
        if config.auto_migrate {
            manager.run_migrations().await?;
        }
        Ok(manager)
    }

    pub async fn run_migrations(&self) -> RouterResult<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RouterError::Configuration(format!("数据库迁移失败: {e}")))?;
        info!("数据库迁移完成");
        Ok(())
    }

    pub async fn health_check(&self) -> RouterResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("数据库连接池已关闭");
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn rule_repository(&self) -> Arc<dyn RuleRepository> {
        Arc::new(PostgresRuleRepository::new(self.pool.clone()))
    }

    pub fn recording_repository(&self) -> Arc<dyn RecordingRepository> {
        Arc::new(PostgresRecordingRepository::new(self.pool.clone()))
    }

    pub fn analysis_config_repository(&self) -> Arc<dyn AnalysisConfigRepository> {
        Arc::new(PostgresAnalysisConfigRepository::new(self.pool.clone()))
    }

    pub fn execution_log_repository(&self) -> Arc<dyn ExecutionLogRepository> {
        Arc::new(PostgresExecutionLogRepository::new(self.pool.clone()))
    }

    pub fn node_repository(&self) -> Arc<dyn NodeRepository> {
        Arc::new(PostgresNodeRepository::new(self.pool.clone()))
    }
}
