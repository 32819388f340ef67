//! Test doubles shared across the workspace.
//!
//! The mock repositories are faithful in-memory implementations of the
//! domain traits (atomic claim under one lock, write-once timestamps,
//! derived orderings), so service tests exercise the real contracts
//! without a database or broker.

pub mod builders;
pub mod mocks;

pub use builders::{analysis_config, NodeRecordBuilder, RecordingBuilder, RuleBuilder};
pub use mocks::{
    matches_document_filter, MockAnalysisConfigRepository, MockExecutionLogRepository,
    MockNodeRepository, MockRecordingRepository, MockRuleRepository, MockTaskQueue,
};
