//! 数据库访问层

pub mod manager;
pub mod postgres;

pub use manager::DatabaseManager;
