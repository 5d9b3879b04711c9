//! Full-run driver: compile → validate → execute → record, one rule at a
//! time, in store order.
//!
//! Per-rule faults are converted into result records and never abort the run;
//! only infrastructure faults (missing database, connection failure) do. A
//! completed run always yields one result per rule, so a consumer can detect
//! silent rule loss by length alone.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};
use vigil_core::{AuditSink, PolicyRule, RunSummary, ViolationResult};
use vigil_store::{
    DEFAULT_ROW_CAP, ReportRepository, ResolvedSchema, RuleRepository, Sandbox, StoreError,
};

use crate::error::EngineError;
use crate::{compile, validate};

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// DuckDB file holding the transaction dataset.
    pub database: PathBuf,
    /// Table the compiled queries read, optionally catalog-qualified
    /// (e.g. `aml.transactions`).
    pub table: String,
    /// Row cap for sandbox sample queries.
    pub row_cap: usize,
    /// Write to the live report slot instead of the main one.
    pub live: bool,
}

impl RunConfig {
    pub fn new(database: PathBuf, table: String) -> Self {
        Self {
            database,
            table,
            row_cap: DEFAULT_ROW_CAP,
            live: false,
        }
    }

    /// Bare table name for schema resolution, without the catalog qualifier.
    fn bare_table(&self) -> &str {
        self.table.rsplit('.').next().unwrap_or(&self.table)
    }
}

/// Run every stored rule against the dataset and persist the report.
///
/// The read-only connection is held for the whole run and dropped at the end;
/// a concurrent live-ingestion writer is tolerated through the sandbox's
/// bounded open retries.
pub fn run_report(
    rules: &RuleRepository,
    reports: &ReportRepository,
    audit: &dyn AuditSink,
    config: &RunConfig,
) -> Result<Vec<ViolationResult>, EngineError> {
    let rule_set = rules.load()?;
    if rule_set.is_empty() {
        warn!("rule store is empty; the report will be empty");
    }
    info!(rules = rule_set.len(), table = %config.table, "starting report run");

    let started = Instant::now();
    let sandbox = Sandbox::open_with(
        &config.database,
        config.row_cap,
        8,
        Duration::from_secs(2),
    )?;
    let schema = ResolvedSchema::resolve(sandbox.connection(), config.bare_table())?;

    let mut report = Vec::with_capacity(rule_set.len());
    for rule in &rule_set {
        report.push(process_rule(rule, &schema, &sandbox, &config.table));
    }
    drop(sandbox);

    reports.save(&report, config.live)?;
    let summary = RunSummary::from_report(&report, started.elapsed().as_secs_f64());
    info!(
        rules_checked = summary.rules_checked,
        rules_triggered = summary.rules_triggered,
        total_violations = summary.total_violations,
        "report run complete"
    );
    let event = if config.live { "live_sweep" } else { "pipeline_run" };
    audit.record(event, serde_json::to_value(&summary)?)?;
    Ok(report)
}

/// Re-run the pipeline on a fixed interval, writing to the live report slot.
///
/// A failed sweep (e.g. the dataset locked past the retry budget) is logged
/// and the loop continues; `max_sweeps` bounds the loop for tests.
pub fn watch(
    rules: &RuleRepository,
    reports: &ReportRepository,
    audit: &dyn AuditSink,
    config: &RunConfig,
    interval: Duration,
    max_sweeps: Option<u64>,
) -> Result<(), EngineError> {
    let config = RunConfig {
        live: true,
        ..config.clone()
    };
    let mut sweeps = 0u64;
    loop {
        match run_report(rules, reports, audit, &config) {
            Ok(report) => info!(sweep = sweeps, results = report.len(), "live sweep complete"),
            Err(err) => error!(sweep = sweeps, %err, "live sweep failed"),
        }
        sweeps += 1;
        if max_sweeps.is_some_and(|max| sweeps >= max) {
            return Ok(());
        }
        thread::sleep(interval);
    }
}

fn process_rule(
    rule: &PolicyRule,
    schema: &ResolvedSchema,
    sandbox: &Sandbox,
    table: &str,
) -> ViolationResult {
    let Some(sql) = compile::compile(rule, schema, table) else {
        info!(rule_id = %rule.id, "skipped: condition field missing or unmapped");
        return ViolationResult::skipped(
            rule,
            "condition field is empty or not present in the dataset",
        );
    };

    let verdict = validate::validate(&sql);
    if !verdict.valid {
        let reason = verdict.reason.unwrap_or_else(|| "rejected".to_string());
        warn!(rule_id = %rule.id, reason, "query blocked before execution");
        return ViolationResult::blocked(rule, sql, reason);
    }

    match sandbox.execute(&sql) {
        Ok(outcome) => {
            info!(
                rule_id = %rule.id,
                violations = outcome.violation_count,
                "rule checked"
            );
            ViolationResult::success(rule, sql, outcome.violation_count, outcome.samples)
        }
        Err(err @ StoreError::DuckDb(_)) => {
            error!(rule_id = %rule.id, %err, "query failed in the engine");
            ViolationResult::sql_error(rule, sql, err.to_string())
        }
        Err(err) => {
            error!(rule_id = %rule.id, %err, "query execution fault");
            ViolationResult::sql_error(rule, sql, err.to_string())
        }
    }
}
