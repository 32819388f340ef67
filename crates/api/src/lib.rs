//! # Router API
//!
//! 路由系统的HTTP触发面，基于Axum构建：
//! - 手动派发与历史回填
//! - 路由规则管理与条件预览
//! - 分析节点注册、心跳与统计
//!
//! 所有端点返回统一的 `ApiResponse<T>` 信封；错误经 `ApiError`
//! 映射为HTTP状态码。认证与限流不在本层处理。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;

use router_domain::repositories::{ExecutionLogRepository, RuleRepository};
use router_domain::services::{DispatchService, NodeRegistry};

use middleware::{cors_layer, request_logging, trace_layer};
pub use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(
    dispatch_service: Arc<dyn DispatchService>,
    node_registry: Arc<dyn NodeRegistry>,
    rule_repo: Arc<dyn RuleRepository>,
    log_repo: Arc<dyn ExecutionLogRepository>,
) -> Router {
    let state = AppState {
        dispatch_service,
        node_registry,
        rule_repo,
        log_repo,
    };

    create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(cors_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    )
}
