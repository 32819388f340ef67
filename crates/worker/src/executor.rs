//! 分析执行器注册表
//!
//! 数值分析管线不在本仓库内，部署方按分析方法注册各自的执行器。
//! 内置的日志执行器用于嵌入模式与联调。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use router_core::RouterResult;
use router_domain::entities::TaskMessage;

/// 单个分析方法的执行器
#[async_trait]
pub trait AnalysisExecutor: Send + Sync {
    /// 执行器负责的分析方法标识
    fn analysis_method_id(&self) -> &str;

    /// 执行任务；返回Err视为一次可重试的执行失败
    async fn execute(&self, task: &TaskMessage) -> RouterResult<()>;
}

/// 按分析方法索引的执行器集合
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn AnalysisExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同一分析方法重复注册时后注册者生效
    pub fn register(&mut self, executor: Arc<dyn AnalysisExecutor>) {
        let method = executor.analysis_method_id().to_string();
        info!(analysis_method_id = %method, "注册分析执行器");
        self.executors.insert(method, executor);
    }

    pub fn get(&self, analysis_method_id: &str) -> Option<Arc<dyn AnalysisExecutor>> {
        self.executors.get(analysis_method_id).cloned()
    }

    /// 已注册的分析方法，作为节点能力上报
    pub fn supported_methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.executors.keys().cloned().collect();
        methods.sort();
        methods
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

/// 只记录日志的占位执行器
pub struct LoggingExecutor {
    analysis_method_id: String,
}

impl LoggingExecutor {
    pub fn new(analysis_method_id: &str) -> Self {
        Self {
            analysis_method_id: analysis_method_id.to_string(),
        }
    }
}

#[async_trait]
impl AnalysisExecutor for LoggingExecutor {
    fn analysis_method_id(&self) -> &str {
        &self.analysis_method_id
    }

    async fn execute(&self, task: &TaskMessage) -> RouterResult<()> {
        info!(
            task_id = %task.task_id,
            analyze_uuid = %task.analyze_uuid,
            config_id = %task.config_id,
            "日志执行器处理任务"
        );
        Ok(())
    }
}
