//! 分析配置的 PostgreSQL 仓储（只读）

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use router_core::RouterResult;
use router_domain::entities::AnalysisConfig;
use router_domain::repositories::AnalysisConfigRepository;

pub struct PostgresAnalysisConfigRepository {
    pool: PgPool,
}

impl PostgresAnalysisConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_config(row: &sqlx::postgres::PgRow) -> RouterResult<AnalysisConfig> {
        Ok(AnalysisConfig {
            config_id: row.try_get("config_id")?,
            analysis_method_id: row.try_get("analysis_method_id")?,
            config_name: row.try_get("config_name")?,
            parameters: row.try_get("parameters")?,
            enabled: row.try_get("enabled")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl AnalysisConfigRepository for PostgresAnalysisConfigRepository {
    async fn find_by_config_id(&self, config_id: &str) -> RouterResult<Option<AnalysisConfig>> {
        let row = sqlx::query(
            r#"
            SELECT config_id, analysis_method_id, config_name, parameters, enabled,
                   created_at, updated_at
            FROM analysis_configs
            WHERE config_id = $1
            "#,
        )
        .bind(config_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::row_to_config(&row)).transpose()
    }
}
