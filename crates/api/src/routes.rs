use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use router_domain::repositories::{ExecutionLogRepository, RuleRepository};
use router_domain::services::{DispatchService, NodeRegistry};

use crate::handlers::{
    dispatch::dispatch_recording,
    nodes::{list_nodes, node_heartbeat, node_statistics, register_node, unregister_node},
    root::{health_check, service_banner},
    routing::{
        backfill_router, create_rule, delete_rule, get_rule, list_rules, match_rules,
        preview_matches, router_executions, router_statistics, update_rule,
    },
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub dispatch_service: Arc<dyn DispatchService>,
    pub node_registry: Arc<dyn NodeRegistry>,
    pub rule_repo: Arc<dyn RuleRepository>,
    pub log_repo: Arc<dyn ExecutionLogRepository>,
}

/// 创建API路由
///
/// 规则子树统一使用 `{rule_id}` 占位符；派发入口默认以 rule_id
/// 命名，回填/统计/执行记录端点按派发入口解释该段。
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(service_banner))
        .route("/health", get(health_check))
        // 派发
        .route("/api/dispatch", post(dispatch_recording))
        // 规则管理与派发入口操作
        .route("/api/routing/rules", get(list_rules).post(create_rule))
        .route("/api/routing/rules/match", post(match_rules))
        .route(
            "/api/routing/rules/{rule_id}",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
        .route("/api/routing/rules/{rule_id}/backfill", post(backfill_router))
        .route(
            "/api/routing/rules/{rule_id}/statistics",
            get(router_statistics),
        )
        .route(
            "/api/routing/rules/{rule_id}/executions",
            get(router_executions),
        )
        .route("/api/routing/preview", post(preview_matches))
        // 节点管理
        .route("/api/nodes", get(list_nodes))
        .route("/api/nodes/statistics", get(node_statistics))
        .route("/api/nodes/{node_id}", delete(unregister_node))
        .route("/api/nodes/{node_id}/register", post(register_node))
        .route("/api/nodes/{node_id}/heartbeat", post(node_heartbeat))
        .with_state(state)
}
