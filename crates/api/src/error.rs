//! API 错误与HTTP状态码映射

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use router_core::RouterError;

use crate::response::ApiResponse;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("路由错误: {0}")]
    Router(#[from] RouterError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

fn status_for(error: &RouterError) -> StatusCode {
    match error {
        RouterError::RuleNotFound { .. }
        | RouterError::RecordingNotFound { .. }
        | RouterError::ConfigNotFound { .. }
        | RouterError::NodeNotFound { .. }
        | RouterError::ExecutionLogNotFound { .. } => StatusCode::NOT_FOUND,
        RouterError::RuleDisabled { .. }
        | RouterError::BackfillDisabled { .. }
        | RouterError::InvalidRule(_)
        | RouterError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
        // 全部动作发布失败：上游（消息队列）不可用
        RouterError::NoTasksCreated { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Router(error) => (status_for(error), error.to_string()),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
        };

        if status.is_server_error() {
            tracing::error!("请求处理失败({}): {}", status.as_u16(), message);
        }

        (status, ApiResponse::error(message)).into_response()
    }
}
