//! 感测数据分析任务路由系统的应用装配层
//!
//! 业务逻辑都在 `crates/` 下的库中，这里只做按模式装配与
//! 进程生命周期管理。

pub mod app;
pub mod shutdown;
