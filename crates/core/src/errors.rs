use thiserror::Error;

/// 路由系统错误类型定义
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据存储不可用: {0}")]
    DatastoreUnavailable(String),

    #[error("路由规则未找到: {router_id}")]
    RuleNotFound { router_id: String },

    #[error("路由规则已禁用: {router_id}")]
    RuleDisabled { router_id: String },

    #[error("路由规则未启用回填: {router_id}")]
    BackfillDisabled { router_id: String },

    #[error("感测记录未找到: {analyze_uuid}")]
    RecordingNotFound { analyze_uuid: String },

    #[error("分析配置未找到: {config_id}")]
    ConfigNotFound { config_id: String },

    #[error("未能创建任何任务: {router_id}")]
    NoTasksCreated { router_id: String },

    #[error("节点未找到: {node_id}")]
    NodeNotFound { node_id: String },

    #[error("执行日志未找到: {task_id}")]
    ExecutionLogNotFound { task_id: String },

    #[error("无效的路由规则: {0}")]
    InvalidRule(String),

    #[error("无效的参数: {0}")]
    InvalidParameter(String),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type RouterResult<T> = std::result::Result<T, RouterError>;

impl From<serde_json::Error> for RouterError {
    fn from(err: serde_json::Error) -> Self {
        RouterError::Serialization(err.to_string())
    }
}

impl RouterError {
    /// 判断错误是否可以安全重试（派发侧的占位语义保证重试幂等）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RouterError::Database(_)
                | RouterError::DatastoreUnavailable(_)
                | RouterError::MessageQueue(_)
                | RouterError::NoTasksCreated { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RouterError::RuleNotFound {
            router_id: "R1".to_string(),
        };
        assert_eq!(err.to_string(), "路由规则未找到: R1");

        let err = RouterError::NoTasksCreated {
            router_id: "R2".to_string(),
        };
        assert!(err.to_string().contains("R2"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(RouterError::MessageQueue("连接断开".to_string()).is_retryable());
        assert!(RouterError::NoTasksCreated {
            router_id: "R1".to_string()
        }
        .is_retryable());
        assert!(!RouterError::RuleDisabled {
            router_id: "R1".to_string()
        }
        .is_retryable());
        assert!(!RouterError::InvalidRule("缺少动作".to_string()).is_retryable());
    }
}
