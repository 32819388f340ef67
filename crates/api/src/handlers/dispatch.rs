use axum::{extract::State, Json};
use serde::Deserialize;

use crate::{
    error::{ApiError, ApiResult},
    response::success,
    routes::AppState,
};

/// 派发请求
///
/// 单个入口失败不会使整个请求失败，逐入口结果在响应体内返回。
#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub analyze_uuid: String,
    pub router_ids: Vec<String>,
    /// 按顺序为各入口创建的任务标注1起始序号
    #[serde(default)]
    pub sequential: bool,
}

/// 手动派发一条感测记录到若干派发入口
pub async fn dispatch_recording(
    State(state): State<AppState>,
    Json(request): Json<DispatchRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    if request.analyze_uuid.trim().is_empty() {
        return Err(ApiError::BadRequest("analyze_uuid 不能为空".to_string()));
    }
    if request.router_ids.is_empty() {
        return Err(ApiError::BadRequest("router_ids 不能为空".to_string()));
    }

    let outcome = state
        .dispatch_service
        .dispatch_by_router_ids(
            &request.analyze_uuid,
            &request.router_ids,
            request.sequential,
        )
        .await?;

    Ok(success(outcome))
}
