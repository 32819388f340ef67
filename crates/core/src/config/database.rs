use serde::{Deserialize, Serialize};

use crate::errors::{RouterError, RouterResult};

/// 数据库连接配置
///
/// recordings 与 analysis_configs 两张表在生产环境由采集侧维护，
/// 本系统只读取并更新 recordings 的派发标记字段。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    /// 启动时自动执行迁移（本地/嵌入式部署使用）
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/analysis_router".to_string(),
            max_connections: 10,
            min_connections: 1,
            connection_timeout_seconds: 30,
            idle_timeout_seconds: 600,
            auto_migrate: false,
        }
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> RouterResult<()> {
        if self.url.trim().is_empty() {
            return Err(RouterError::Configuration(
                "database.url 不能为空".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(RouterError::Configuration(
                "database.max_connections 必须大于0".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(RouterError::Configuration(
                "database.min_connections 不能大于 max_connections".to_string(),
            ));
        }
        Ok(())
    }
}
