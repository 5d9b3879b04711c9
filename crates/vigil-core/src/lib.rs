//! Core types and shared contracts for the Vigil compliance pipeline.

pub mod audit;
pub mod report;
pub mod rule;

pub use audit::{AuditError, AuditSink, NullAuditSink};
pub use report::{RunStatus, RunSummary, ViolationResult};
pub use rule::{Operator, PolicyRule, RuleError, RuleType, ThresholdValue, fingerprint};
