//! 派发器：规则解析、任务扇出与节点注册表
//!
//! `TaskDispatcher` 实现派发/回填/预览，`HeartbeatRegistry`
//! 提供节点存活视图。两者都只依赖领域层抽象。

pub mod node_registry;
pub mod task_dispatcher;

pub use node_registry::HeartbeatRegistry;
pub use task_dispatcher::{DispatcherSettings, TaskDispatcher};
