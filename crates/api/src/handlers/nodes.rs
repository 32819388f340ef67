use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use router_core::RouterError;
use router_domain::entities::NodeInfo;

use crate::{error::ApiResult, response::success, routes::AppState};

/// 心跳请求
#[derive(Debug, Deserialize, Default)]
pub struct HeartbeatRequest {
    /// 节点当前并发任务数，不传则保持原值
    pub current_tasks: Option<i32>,
}

/// 节点列表查询参数
#[derive(Debug, Deserialize)]
pub struct NodeListQuery {
    #[serde(default)]
    pub online_only: bool,
    pub limit: Option<usize>,
}

/// 注册节点，重复注册视为重新上线
pub async fn register_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(info): Json<NodeInfo>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let record = state.node_registry.register(&node_id, &info).await?;
    Ok(success(record))
}

/// 节点心跳；未注册的节点返回404，调用方应重新注册
pub async fn node_heartbeat(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(request): Json<HeartbeatRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let known = state
        .node_registry
        .heartbeat(&node_id, request.current_tasks)
        .await?;
    if !known {
        return Err(RouterError::NodeNotFound { node_id }.into());
    }
    Ok(success(serde_json::json!({ "node_id": node_id, "alive": true })))
}

/// 获取节点列表，按最近心跳倒序
pub async fn list_nodes(
    State(state): State<AppState>,
    Query(query): Query<NodeListQuery>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let nodes = state
        .node_registry
        .list_nodes(query.online_only, query.limit)
        .await?;
    Ok(success(nodes))
}

/// 节点在线/离线统计
pub async fn node_statistics(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let statistics = state.node_registry.statistics().await?;
    Ok(success(statistics))
}

/// 注销节点
pub async fn unregister_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let removed = state.node_registry.unregister(&node_id).await?;
    if !removed {
        return Err(RouterError::NodeNotFound { node_id }.into());
    }
    Ok(success(serde_json::json!({ "node_id": node_id, "removed": true })))
}
