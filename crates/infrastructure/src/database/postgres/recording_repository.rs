//! 感测记录的 PostgreSQL 仓储
//!
//! 占用依靠单条条件 UPDATE 实现原子性：判断"未被占用"与追加
//! 标记在同一语句内完成，并发派发同一 router_id 时只有一方
//! 的 rows_affected 为 1。

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::debug;

use router_core::RouterResult;
use router_domain::entities::Recording;
use router_domain::repositories::{ClaimOutcome, RecordingRepository};
use router_domain::rule::DocumentFilter;

use super::filter_sql::{bind_filter_params, bind_filter_params_scalar, FilterSql};

pub struct PostgresRecordingRepository {
    pool: PgPool,
}

impl PostgresRecordingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_recording(row: &sqlx::postgres::PgRow) -> RouterResult<Recording> {
        Ok(Recording {
            analyze_uuid: row.try_get("analyze_uuid")?,
            info_features: row.try_get("info_features")?,
            assigned_router_ids: row.try_get("assigned_router_ids")?,
            last_router_dispatch: row.try_get("last_router_dispatch")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

const RECORDING_COLUMNS: &str =
    "analyze_uuid, info_features, assigned_router_ids, last_router_dispatch, created_at";

#[async_trait]
impl RecordingRepository for PostgresRecordingRepository {
    async fn find_by_uuid(&self, analyze_uuid: &str) -> RouterResult<Option<Recording>> {
        let sql = format!("SELECT {RECORDING_COLUMNS} FROM recordings WHERE analyze_uuid = $1");
        let row = sqlx::query(&sql)
            .bind(analyze_uuid)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| Self::row_to_recording(&row)).transpose()
    }

    async fn try_claim(&self, analyze_uuid: &str, router_id: &str) -> RouterResult<ClaimOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE recordings
            SET assigned_router_ids = array_append(assigned_router_ids, $2),
                last_router_dispatch = NOW()
            WHERE analyze_uuid = $1
              AND NOT ($2 = ANY(assigned_router_ids))
            "#,
        )
        .bind(analyze_uuid)
        .bind(router_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!("记录占用成功: {} <- {}", analyze_uuid, router_id);
            return Ok(ClaimOutcome::Claimed);
        }

        // 没有行被更新：区分"已被占用"与"记录不存在"
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM recordings WHERE analyze_uuid = $1)")
                .bind(analyze_uuid)
                .fetch_one(&self.pool)
                .await?;

        Ok(if exists {
            ClaimOutcome::AlreadyAssigned
        } else {
            ClaimOutcome::NotFound
        })
    }

    async fn release_claim(&self, analyze_uuid: &str, router_id: &str) -> RouterResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE recordings
            SET assigned_router_ids = array_remove(assigned_router_ids, $2)
            WHERE analyze_uuid = $1
              AND $2 = ANY(assigned_router_ids)
            "#,
        )
        .bind(analyze_uuid)
        .bind(router_id)
        .execute(&self.pool)
        .await?;

        let released = result.rows_affected() > 0;
        if released {
            debug!("记录占用已释放: {} -> {}", analyze_uuid, router_id);
        }
        Ok(released)
    }

    async fn count_matching(&self, filter: &DocumentFilter) -> RouterResult<u64> {
        let filter_sql = FilterSql::compile(filter, 1);
        let mut sql = String::from("SELECT COUNT(*) FROM recordings WHERE TRUE");
        filter_sql.append_to(&mut sql);

        let count: i64 = bind_filter_params_scalar(sqlx::query_scalar(&sql), &filter_sql.params)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn find_matching(
        &self,
        filter: &DocumentFilter,
        limit: Option<u32>,
    ) -> RouterResult<Vec<Recording>> {
        let filter_sql = FilterSql::compile(filter, 1);
        let mut sql = format!("SELECT {RECORDING_COLUMNS} FROM recordings WHERE TRUE");
        filter_sql.append_to(&mut sql);
        sql.push_str(" ORDER BY created_at ASC");
        if limit.is_some() {
            let index = filter_sql.params.len() + 1;
            sql.push_str(&format!(" LIMIT ${index}"));
        }

        let mut query = bind_filter_params(sqlx::query(&sql), &filter_sql.params);
        if let Some(limit) = limit {
            query = query.bind(limit as i64);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_recording).collect()
    }

    async fn count_unassigned(
        &self,
        filter: &DocumentFilter,
        router_id: &str,
    ) -> RouterResult<u64> {
        let filter_sql = FilterSql::compile(filter, 2);
        let mut sql =
            String::from("SELECT COUNT(*) FROM recordings WHERE NOT ($1 = ANY(assigned_router_ids))");
        filter_sql.append_to(&mut sql);

        let count: i64 = bind_filter_params_scalar(
            sqlx::query_scalar(&sql).bind(router_id),
            &filter_sql.params,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn find_unassigned(
        &self,
        filter: &DocumentFilter,
        router_id: &str,
        limit: Option<u32>,
    ) -> RouterResult<Vec<Recording>> {
        let filter_sql = FilterSql::compile(filter, 2);
        let mut sql = format!(
            "SELECT {RECORDING_COLUMNS} FROM recordings WHERE NOT ($1 = ANY(assigned_router_ids))"
        );
        filter_sql.append_to(&mut sql);
        // 回填从最旧的记录开始补
        sql.push_str(" ORDER BY created_at ASC");
        if limit.is_some() {
            let index = filter_sql.params.len() + 2;
            sql.push_str(&format!(" LIMIT ${index}"));
        }

        let mut query = bind_filter_params(sqlx::query(&sql).bind(router_id), &filter_sql.params);
        if let Some(limit) = limit {
            query = query.bind(limit as i64);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_recording).collect()
    }
}
