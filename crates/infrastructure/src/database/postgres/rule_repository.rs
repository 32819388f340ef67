//! 路由规则的 PostgreSQL 仓储

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::debug;

use router_core::{RouterError, RouterResult};
use router_domain::repositories::RuleRepository;
use router_domain::rule::{Condition, RoutingRule, RuleAction};

/// 规则仓储，conditions 与 actions 以 JSONB 存储
pub struct PostgresRuleRepository {
    pool: PgPool,
}

impl PostgresRuleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_rule(row: &sqlx::postgres::PgRow) -> RouterResult<RoutingRule> {
        let conditions: serde_json::Value = row.try_get("conditions")?;
        let conditions: BTreeMap<String, Condition> = serde_json::from_value(conditions)
            .map_err(|e| RouterError::Serialization(format!("规则条件反序列化失败: {e}")))?;
        let actions: serde_json::Value = row.try_get("actions")?;
        let actions: Vec<RuleAction> = serde_json::from_value(actions)
            .map_err(|e| RouterError::Serialization(format!("规则动作反序列化失败: {e}")))?;

        Ok(RoutingRule {
            rule_id: row.try_get("rule_id")?,
            rule_name: row.try_get("rule_name")?,
            description: row.try_get("description")?,
            conditions,
            actions,
            router_ids: row.try_get("router_ids")?,
            priority: row.try_get("priority")?,
            enabled: row.try_get("enabled")?,
            backfill_enabled: row.try_get("backfill_enabled")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn encode_rule(rule: &RoutingRule) -> RouterResult<(serde_json::Value, serde_json::Value)> {
        let conditions = serde_json::to_value(&rule.conditions)
            .map_err(|e| RouterError::Serialization(format!("规则条件序列化失败: {e}")))?;
        let actions = serde_json::to_value(&rule.actions)
            .map_err(|e| RouterError::Serialization(format!("规则动作序列化失败: {e}")))?;
        Ok((conditions, actions))
    }
}

#[async_trait]
impl RuleRepository for PostgresRuleRepository {
    async fn create(&self, rule: &RoutingRule) -> RouterResult<RoutingRule> {
        let (conditions, actions) = Self::encode_rule(rule)?;

        let row = sqlx::query(
            r#"
            INSERT INTO routing_rules
                (rule_id, rule_name, description, conditions, actions, router_ids,
                 priority, enabled, backfill_enabled, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
            RETURNING rule_id, rule_name, description, conditions, actions, router_ids,
                      priority, enabled, backfill_enabled, created_at, updated_at
            "#,
        )
        .bind(&rule.rule_id)
        .bind(&rule.rule_name)
        .bind(&rule.description)
        .bind(&conditions)
        .bind(&actions)
        .bind(&rule.router_ids)
        .bind(rule.priority)
        .bind(rule.enabled)
        .bind(rule.backfill_enabled)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if e.as_database_error()
                .is_some_and(|db| db.is_unique_violation())
            {
                RouterError::InvalidRule(format!("rule_id 已存在: {}", rule.rule_id))
            } else {
                RouterError::Database(e)
            }
        })?;

        debug!("创建路由规则: {}", rule.rule_id);
        Self::row_to_rule(&row)
    }

    async fn find_by_rule_id(&self, rule_id: &str) -> RouterResult<Option<RoutingRule>> {
        let row = sqlx::query(
            r#"
            SELECT rule_id, rule_name, description, conditions, actions, router_ids,
                   priority, enabled, backfill_enabled, created_at, updated_at
            FROM routing_rules
            WHERE rule_id = $1
            "#,
        )
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::row_to_rule(&row)).transpose()
    }

    async fn find_by_router_id(&self, router_id: &str) -> RouterResult<Option<RoutingRule>> {
        // 同一派发入口挂了多条规则时取优先级最高的一条
        let row = sqlx::query(
            r#"
            SELECT rule_id, rule_name, description, conditions, actions, router_ids,
                   priority, enabled, backfill_enabled, created_at, updated_at
            FROM routing_rules
            WHERE $1 = ANY(router_ids)
            ORDER BY priority DESC, rule_id ASC
            LIMIT 1
            "#,
        )
        .bind(router_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::row_to_rule(&row)).transpose()
    }

    async fn find_all(&self, enabled_only: bool) -> RouterResult<Vec<RoutingRule>> {
        let sql = if enabled_only {
            r#"
            SELECT rule_id, rule_name, description, conditions, actions, router_ids,
                   priority, enabled, backfill_enabled, created_at, updated_at
            FROM routing_rules
            WHERE enabled
            ORDER BY priority DESC, rule_id ASC
            "#
        } else {
            r#"
            SELECT rule_id, rule_name, description, conditions, actions, router_ids,
                   priority, enabled, backfill_enabled, created_at, updated_at
            FROM routing_rules
            ORDER BY priority DESC, rule_id ASC
            "#
        };

        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_rule).collect()
    }

    async fn update(&self, rule: &RoutingRule) -> RouterResult<RoutingRule> {
        let (conditions, actions) = Self::encode_rule(rule)?;

        let row = sqlx::query(
            r#"
            UPDATE routing_rules
            SET rule_name = $2, description = $3, conditions = $4, actions = $5,
                router_ids = $6, priority = $7, enabled = $8, backfill_enabled = $9,
                updated_at = NOW()
            WHERE rule_id = $1
            RETURNING rule_id, rule_name, description, conditions, actions, router_ids,
                      priority, enabled, backfill_enabled, created_at, updated_at
            "#,
        )
        .bind(&rule.rule_id)
        .bind(&rule.rule_name)
        .bind(&rule.description)
        .bind(&conditions)
        .bind(&actions)
        .bind(&rule.router_ids)
        .bind(rule.priority)
        .bind(rule.enabled)
        .bind(rule.backfill_enabled)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                debug!("更新路由规则: {}", rule.rule_id);
                Self::row_to_rule(&row)
            }
            None => Err(RouterError::RuleNotFound {
                router_id: rule.rule_id.clone(),
            }),
        }
    }

    async fn delete(&self, rule_id: &str) -> RouterResult<bool> {
        let result = sqlx::query("DELETE FROM routing_rules WHERE rule_id = $1")
            .bind(rule_id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            debug!("删除路由规则: {}", rule_id);
        }
        Ok(deleted)
    }
}
