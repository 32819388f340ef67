use axum::Json;
use serde_json::{json, Value};

/// 根路径处理器 - 返回服务状态和端点速览
pub async fn service_banner() -> Json<Value> {
    Json(json!({
        "name": "感测记录分析任务路由系统",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "dispatch": "POST /api/dispatch",
            "rules": "/api/routing/rules",
            "preview": "POST /api/routing/preview",
            "nodes": "/api/nodes",
            "health": "GET /health"
        },
        "timestamp": chrono::Utc::now(),
    }))
}

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "analysis-task-router",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_service_banner() {
        let response = service_banner().await;
        let banner = response.0;

        assert_eq!(banner["status"], "running");
        assert_eq!(banner["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(banner["endpoints"]["dispatch"], "POST /api/dispatch");
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = health_check().await;
        let health = response.0;

        assert_eq!(health["status"], "ok");
        assert_eq!(health["service"], "analysis-task-router");
    }
}
