//! Violation report records produced by a pipeline run.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rule::PolicyRule;

/// How many matching records a [`ViolationResult`] carries for display.
pub const MAX_SAMPLE_ROWS: usize = 5;

/// Terminal status of one rule in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Blocked,
    SqlError,
    Skipped,
}

/// Outcome of checking one rule against the dataset.
///
/// A completed run produces exactly one of these per rule in store order, so
/// consumers can always compare "rules attempted" against "rules succeeded".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationResult {
    pub rule_id: String,
    pub rule_description: String,
    /// The compiled query, kept for auditability. Empty when compilation
    /// was skipped.
    pub sql: String,
    /// Exact match count from the count query — not the sample length.
    pub violation_count: u64,
    pub sample_violations: Vec<Value>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ViolationResult {
    pub fn success(
        rule: &PolicyRule,
        sql: String,
        violation_count: u64,
        mut sample_violations: Vec<Value>,
    ) -> Self {
        sample_violations.truncate(MAX_SAMPLE_ROWS);
        Self {
            rule_id: rule.id.clone(),
            rule_description: rule.description.clone(),
            sql,
            violation_count,
            sample_violations,
            status: RunStatus::Success,
            reason: None,
        }
    }

    pub fn blocked(rule: &PolicyRule, sql: String, reason: String) -> Self {
        Self::failed(rule, sql, RunStatus::Blocked, reason)
    }

    pub fn sql_error(rule: &PolicyRule, sql: String, reason: String) -> Self {
        Self::failed(rule, sql, RunStatus::SqlError, reason)
    }

    pub fn skipped(rule: &PolicyRule, reason: &str) -> Self {
        Self::failed(rule, String::new(), RunStatus::Skipped, reason.to_string())
    }

    fn failed(rule: &PolicyRule, sql: String, status: RunStatus, reason: String) -> Self {
        Self {
            rule_id: rule.id.clone(),
            rule_description: rule.description.clone(),
            sql,
            violation_count: 0,
            sample_violations: Vec::new(),
            status,
            reason: Some(reason),
        }
    }
}

/// Audit payload summarising one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub rules_checked: usize,
    pub rules_triggered: usize,
    pub total_violations: u64,
    pub duration_s: f64,
}

impl RunSummary {
    pub fn from_report(report: &[ViolationResult], duration_s: f64) -> Self {
        Self {
            rules_checked: report.len(),
            rules_triggered: report.iter().filter(|r| r.violation_count > 0).count(),
            total_violations: report.iter().map(|r| r.violation_count).sum(),
            duration_s,
        }
    }
}
