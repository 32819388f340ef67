//! 工作节点：消费分析任务、回写执行状态、按心跳上报存活

pub mod consumer;
pub mod executor;
pub mod heartbeat;
pub mod service;

pub use consumer::TaskConsumer;
pub use executor::{AnalysisExecutor, ExecutorRegistry, LoggingExecutor};
pub use heartbeat::HeartbeatLoop;
pub use service::WorkerService;
