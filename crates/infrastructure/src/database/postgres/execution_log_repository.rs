//! 执行日志的 PostgreSQL 仓储
//!
//! `started_at` / `completed_at` 的只写一次语义在 UPDATE 的
//! CASE 表达式内实现，消费端重复投递同一任务不会改写首次时间戳。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::debug;

use router_core::{RouterError, RouterResult};
use router_domain::entities::{ExecutionLog, ExecutionStatistics, ExecutionStatus};
use router_domain::repositories::ExecutionLogRepository;

pub struct PostgresExecutionLogRepository {
    pool: PgPool,
}

const LOG_COLUMNS: &str = "log_id, task_id, router_id, rule_id, analyze_uuid, \
     analysis_method_id, config_id, target_instance, status, node_id, error_message, \
     metadata, created_at, started_at, completed_at";

impl PostgresExecutionLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_log(row: &sqlx::postgres::PgRow) -> RouterResult<ExecutionLog> {
        let raw_status: String = row.try_get("status")?;
        let status = ExecutionStatus::parse(&raw_status)
            .ok_or_else(|| RouterError::Serialization(format!("未知的执行状态: {raw_status}")))?;

        Ok(ExecutionLog {
            log_id: row.try_get("log_id")?,
            task_id: row.try_get("task_id")?,
            router_id: row.try_get("router_id")?,
            rule_id: row.try_get("rule_id")?,
            analyze_uuid: row.try_get("analyze_uuid")?,
            analysis_method_id: row.try_get("analysis_method_id")?,
            config_id: row.try_get("config_id")?,
            target_instance: row.try_get("target_instance")?,
            status,
            node_id: row.try_get("node_id")?,
            error_message: row.try_get("error_message")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

#[async_trait]
impl ExecutionLogRepository for PostgresExecutionLogRepository {
    async fn create(&self, log: &ExecutionLog) -> RouterResult<ExecutionLog> {
        let sql = format!(
            r#"
            INSERT INTO execution_logs
                (log_id, task_id, router_id, rule_id, analyze_uuid, analysis_method_id,
                 config_id, target_instance, status, node_id, error_message, metadata,
                 created_at, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {LOG_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(&log.log_id)
            .bind(&log.task_id)
            .bind(&log.router_id)
            .bind(&log.rule_id)
            .bind(&log.analyze_uuid)
            .bind(&log.analysis_method_id)
            .bind(&log.config_id)
            .bind(&log.target_instance)
            .bind(log.status.as_str())
            .bind(&log.node_id)
            .bind(&log.error_message)
            .bind(&log.metadata)
            .bind(log.created_at)
            .bind(log.started_at)
            .bind(log.completed_at)
            .fetch_one(&self.pool)
            .await?;

        debug!("创建执行日志: task_id={}", log.task_id);
        Self::row_to_log(&row)
    }

    async fn find_by_task_id(&self, task_id: &str) -> RouterResult<Option<ExecutionLog>> {
        let sql = format!("SELECT {LOG_COLUMNS} FROM execution_logs WHERE task_id = $1");
        let row = sqlx::query(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| Self::row_to_log(&row)).transpose()
    }

    async fn find_by_router_id(
        &self,
        router_id: &str,
        limit: i64,
        skip: i64,
    ) -> RouterResult<Vec<ExecutionLog>> {
        let sql = format!(
            r#"
            SELECT {LOG_COLUMNS}
            FROM execution_logs
            WHERE router_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(router_id)
            .bind(limit)
            .bind(skip)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_log).collect()
    }

    async fn update_status(
        &self,
        task_id: &str,
        status: ExecutionStatus,
        error_message: Option<&str>,
    ) -> RouterResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE execution_logs
            SET status = $2,
                error_message = COALESCE($3, error_message),
                started_at = CASE
                    WHEN $2 = 'processing' AND started_at IS NULL THEN NOW()
                    ELSE started_at
                END,
                completed_at = CASE
                    WHEN $2 IN ('completed', 'failed') AND completed_at IS NULL THEN NOW()
                    ELSE completed_at
                END
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn assign_node(&self, task_id: &str, node_id: &str) -> RouterResult<bool> {
        let result = sqlx::query("UPDATE execution_logs SET node_id = $2 WHERE task_id = $1")
            .bind(task_id)
            .bind(node_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_statistics(&self, router_id: &str) -> RouterResult<ExecutionStatistics> {
        // 按状态桶聚合；历史遗留状态归入 unknown 桶保证总数对账
        let rows = sqlx::query(
            r#"
            SELECT
                CASE WHEN LOWER(status) IN ('pending', 'processing', 'completed', 'failed')
                     THEN LOWER(status) ELSE 'unknown' END AS bucket,
                COUNT(*) AS bucket_count,
                MAX(created_at) AS last_created,
                AVG(
                    CASE WHEN LOWER(status) = 'completed'
                              AND started_at IS NOT NULL
                              AND completed_at IS NOT NULL
                         THEN EXTRACT(EPOCH FROM (completed_at - started_at))::double precision
                    END
                ) AS avg_seconds
            FROM execution_logs
            WHERE router_id = $1
            GROUP BY 1
            "#,
        )
        .bind(router_id)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = ExecutionStatistics::default();
        for row in &rows {
            let bucket: String = row.try_get("bucket")?;
            let count: i64 = row.try_get("bucket_count")?;
            stats.add_status_count(&bucket, count as u64);

            let last_created: DateTime<Utc> = row.try_get("last_created")?;
            if stats
                .last_execution
                .map_or(true, |last| last_created > last)
            {
                stats.last_execution = Some(last_created);
            }

            if bucket == "completed" {
                if let Some(avg) = row.try_get::<Option<f64>, _>("avg_seconds")? {
                    stats.avg_processing_seconds = Some(avg);
                }
            }
        }
        stats.finalize();
        Ok(stats)
    }
}
