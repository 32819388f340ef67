//! 节点存活记录的 PostgreSQL 仓储
//!
//! 表中不存储在线状态，在线与否由读取方按心跳时间推导。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::debug;

use router_core::{RouterError, RouterResult};
use router_domain::entities::{NodeInfo, NodeRecord};
use router_domain::repositories::NodeRepository;

pub struct PostgresNodeRepository {
    pool: PgPool,
}

const NODE_COLUMNS: &str =
    "node_id, info, current_tasks, last_heartbeat, created_at, updated_at";

impl PostgresNodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_node(row: &sqlx::postgres::PgRow) -> RouterResult<NodeRecord> {
        let info: serde_json::Value = row.try_get("info")?;
        let info: NodeInfo = serde_json::from_value(info)
            .map_err(|e| RouterError::Serialization(format!("节点信息反序列化失败: {e}")))?;

        Ok(NodeRecord {
            node_id: row.try_get("node_id")?,
            info,
            current_tasks: row.try_get("current_tasks")?,
            last_heartbeat: row.try_get("last_heartbeat")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl NodeRepository for PostgresNodeRepository {
    async fn register(&self, node_id: &str, info: &NodeInfo) -> RouterResult<NodeRecord> {
        let info_json = serde_json::to_value(info)
            .map_err(|e| RouterError::Serialization(format!("节点信息序列化失败: {e}")))?;

        // 重复注册覆盖 info、归零负载并刷新心跳，created_at 保持首次值
        let sql = format!(
            r#"
            INSERT INTO nodes (node_id, info, current_tasks, last_heartbeat, created_at, updated_at)
            VALUES ($1, $2, 0, NOW(), NOW(), NOW())
            ON CONFLICT (node_id) DO UPDATE SET
                info = EXCLUDED.info,
                current_tasks = 0,
                last_heartbeat = NOW(),
                updated_at = NOW()
            RETURNING {NODE_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(node_id)
            .bind(&info_json)
            .fetch_one(&self.pool)
            .await?;

        debug!("节点注册: {}", node_id);
        Self::row_to_node(&row)
    }

    async fn heartbeat(&self, node_id: &str, current_tasks: Option<i32>) -> RouterResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE nodes
            SET last_heartbeat = NOW(),
                updated_at = NOW(),
                current_tasks = COALESCE($2, current_tasks)
            WHERE node_id = $1
            "#,
        )
        .bind(node_id)
        .bind(current_tasks)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_by_id(&self, node_id: &str) -> RouterResult<Option<NodeRecord>> {
        let sql = format!("SELECT {NODE_COLUMNS} FROM nodes WHERE node_id = $1");
        let row = sqlx::query(&sql)
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| Self::row_to_node(&row)).transpose()
    }

    async fn find_all(&self) -> RouterResult<Vec<NodeRecord>> {
        let sql = format!("SELECT {NODE_COLUMNS} FROM nodes ORDER BY last_heartbeat DESC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_node).collect()
    }

    async fn unregister(&self, node_id: &str) -> RouterResult<bool> {
        let result = sqlx::query("DELETE FROM nodes WHERE node_id = $1")
            .bind(node_id)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            debug!("节点注销: {}", node_id);
        }
        Ok(removed)
    }

    async fn remove_stale(&self, older_than: DateTime<Utc>) -> RouterResult<u64> {
        let result = sqlx::query("DELETE FROM nodes WHERE last_heartbeat < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            debug!("清理过期节点: {} 个", removed);
        }
        Ok(removed)
    }
}
