use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use router_core::RouterError;
use router_domain::rule::{Condition, RoutingRule, RuleAction};
use router_domain::services::RuleConditions;

use crate::{
    error::{ApiError, ApiResult},
    response::{created, success, ApiResponse},
    routes::AppState,
};

/// 执行记录分页上限
const MAX_EXECUTION_PAGE: i64 = 500;

/// 规则创建/更新请求
#[derive(Debug, Deserialize)]
pub struct RuleRequest {
    pub rule_id: String,
    pub rule_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub conditions: BTreeMap<String, Condition>,
    pub actions: Vec<RuleAction>,
    #[serde(default)]
    pub router_ids: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub backfill_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl RuleRequest {
    fn into_rule(self) -> RoutingRule {
        let now = chrono::Utc::now();
        let mut rule = RoutingRule {
            rule_id: self.rule_id,
            rule_name: self.rule_name,
            description: self.description,
            conditions: self.conditions,
            actions: self.actions,
            router_ids: self.router_ids,
            priority: self.priority,
            enabled: self.enabled,
            backfill_enabled: self.backfill_enabled,
            created_at: now,
            updated_at: now,
        };
        rule.normalize();
        rule
    }
}

/// 规则列表查询参数
#[derive(Debug, Deserialize)]
pub struct RuleListQuery {
    #[serde(default)]
    pub enabled_only: bool,
}

/// 匹配测试请求：对一个属性袋试算命中的规则
#[derive(Debug, Deserialize)]
pub struct MatchRequest {
    pub info_features: Value,
}

/// 回填请求
#[derive(Debug, Deserialize, Default)]
pub struct BackfillRequest {
    pub limit: Option<u32>,
}

/// 条件预览请求
#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub conditions: RuleConditions,
    pub limit: Option<u32>,
}

/// 执行记录分页参数
#[derive(Debug, Deserialize)]
pub struct ExecutionQuery {
    pub limit: Option<i64>,
    pub skip: Option<i64>,
}

/// 创建路由规则
pub async fn create_rule(
    State(state): State<AppState>,
    Json(request): Json<RuleRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let rule = request.into_rule();
    rule.validate()?;

    let stored = state.rule_repo.create(&rule).await?;
    Ok(created(stored))
}

/// 获取规则列表，按优先级降序
pub async fn list_rules(
    State(state): State<AppState>,
    Query(query): Query<RuleListQuery>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let rules = state.rule_repo.find_all(query.enabled_only).await?;
    Ok(success(rules))
}

/// 获取单条规则
pub async fn get_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let rule = state
        .rule_repo
        .find_by_rule_id(&rule_id)
        .await?
        .ok_or(RouterError::RuleNotFound { router_id: rule_id })?;
    Ok(success(rule))
}

/// 更新规则
pub async fn update_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
    Json(request): Json<RuleRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    if request.rule_id != rule_id {
        return Err(ApiError::BadRequest(format!(
            "路径与请求体的 rule_id 不一致: {} / {}",
            rule_id, request.rule_id
        )));
    }

    let rule = request.into_rule();
    rule.validate()?;

    let stored = state.rule_repo.update(&rule).await?;
    Ok(success(stored))
}

/// 删除规则
pub async fn delete_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let deleted = state.rule_repo.delete(&rule_id).await?;
    if !deleted {
        return Err(RouterError::RuleNotFound { router_id: rule_id }.into());
    }
    Ok(ApiResponse::success_with_message(format!(
        "规则已删除: {rule_id}"
    )))
}

/// 对一个属性袋试算命中的启用规则，按优先级降序返回
pub async fn match_rules(
    State(state): State<AppState>,
    Json(request): Json<MatchRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let matched: Vec<_> = state
        .rule_repo
        .find_all(true)
        .await?
        .into_iter()
        .filter(|rule| rule.matches(&request.info_features))
        .collect();
    Ok(success(matched))
}

/// 回填：把历史上满足规则条件且未处理的记录补派发
pub async fn backfill_router(
    State(state): State<AppState>,
    Path(router_id): Path<String>,
    Json(request): Json<BackfillRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let outcome = state
        .dispatch_service
        .backfill_by_router_id(&router_id, request.limit)
        .await?;
    Ok(success(outcome))
}

/// 预览条件命中的记录，不触发任何派发
pub async fn preview_matches(
    State(state): State<AppState>,
    Json(request): Json<PreviewRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let preview = state
        .dispatch_service
        .preview_matching_records(&request.conditions, request.limit)
        .await?;
    Ok(success(preview))
}

/// 派发入口的执行统计
pub async fn router_statistics(
    State(state): State<AppState>,
    Path(router_id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let statistics = state.log_repo.get_statistics(&router_id).await?;
    Ok(success(statistics))
}

/// 派发入口的执行记录，按创建时间倒序分页
pub async fn router_executions(
    State(state): State<AppState>,
    Path(router_id): Path<String>,
    Query(query): Query<ExecutionQuery>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let limit = query.limit.unwrap_or(50);
    if limit < 1 || limit > MAX_EXECUTION_PAGE {
        return Err(RouterError::InvalidParameter(format!(
            "limit 必须在 1..={MAX_EXECUTION_PAGE} 之间: {limit}"
        ))
        .into());
    }
    let skip = query.skip.unwrap_or(0);
    if skip < 0 {
        return Err(RouterError::InvalidParameter(format!("skip 不能为负数: {skip}")).into());
    }

    let logs = state.log_repo.find_by_router_id(&router_id, limit, skip).await?;
    Ok(success(logs))
}
