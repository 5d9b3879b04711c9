use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use vigil_engine::{RunConfig, run_report, validate, watch};
use vigil_store::{JsonlAuditSink, ReportRepository, RuleRepository};

#[derive(Parser)]
#[command(name = "vigil", version, about = "Policy-to-enforcement compliance engine")]
struct Cli {
    /// Directory holding the rule store, reports, version archives, and the
    /// audit log.
    #[arg(long, env = "VIGIL_RULES_DIR", default_value = "rules")]
    rules_dir: PathBuf,

    /// DuckDB file holding the transaction dataset.
    #[arg(long, env = "VIGIL_DATABASE", default_value = "data/aml.db")]
    database: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a candidate-rule JSON file into the rule store.
    Ingest {
        /// File containing a JSON array of candidate rule records.
        file: PathBuf,
        /// Source document label, recorded in the version manifest.
        #[arg(long, default_value = "unknown")]
        source: String,
    },
    /// Compile, validate, and execute every stored rule; write the report.
    Run {
        #[arg(long, default_value = "aml.transactions")]
        table: String,
        #[arg(long, default_value_t = 100)]
        row_cap: usize,
    },
    /// Re-run the pipeline against the live table on a fixed interval.
    Watch {
        #[arg(long, default_value = "aml.transactions_live")]
        table: String,
        #[arg(long, default_value_t = 20)]
        interval_secs: u64,
        #[arg(long, default_value_t = 100)]
        row_cap: usize,
    },
    /// List the rules currently in the store.
    Rules,
    /// List archived rule-store versions.
    Versions,
    /// Validate a query string against the read-only policy.
    Check { sql: String },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    tracing::info!("vigil v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let rules = RuleRepository::new(&cli.rules_dir);
    let reports = ReportRepository::new(&cli.rules_dir);
    let audit = JsonlAuditSink::new(cli.rules_dir.join("audit_log.jsonl"));

    match cli.command {
        Command::Ingest { file, source } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let records: Vec<serde_json::Value> =
                serde_json::from_str(&text).context("candidate rule file must be a JSON array")?;
            let outcome = rules.submit(records, &source)?;
            for rejected in &outcome.rejected {
                eprintln!("rejected: {rejected}");
            }
            if let Some(snapshot) = &outcome.snapshot {
                println!(
                    "archived previous store as v{} ({} rules)",
                    snapshot.version, snapshot.rule_count
                );
            }
            println!(
                "{} added, {} skipped as duplicates, {} rejected",
                outcome.added,
                outcome.skipped,
                outcome.rejected.len()
            );
        }
        Command::Run { table, row_cap } => {
            let config = RunConfig {
                database: cli.database,
                table,
                row_cap,
                live: false,
            };
            let report = run_report(&rules, &reports, &audit, &config)?;
            for result in &report {
                println!(
                    "{:10} {:9?} {:>8} violation(s)  {}",
                    result.rule_id, result.status, result.violation_count, result.rule_description
                );
            }
            let triggered = report.iter().filter(|r| r.violation_count > 0).count();
            println!("{triggered}/{} rules triggered", report.len());
        }
        Command::Watch {
            table,
            interval_secs,
            row_cap,
        } => {
            let config = RunConfig {
                database: cli.database,
                table,
                row_cap,
                live: true,
            };
            watch(
                &rules,
                &reports,
                &audit,
                &config,
                Duration::from_secs(interval_secs),
                None,
            )?;
        }
        Command::Rules => {
            for rule in rules.load()? {
                println!(
                    "{:10} {} {} {}  [{}]",
                    rule.id,
                    rule.condition_field,
                    rule.operator,
                    rule.threshold_value,
                    rule.fingerprint.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Versions => {
            for entry in rules.manifest()? {
                println!(
                    "v{:<4} {}  {} rules  {}  ({})",
                    entry.version, entry.timestamp, entry.rule_count, entry.archive, entry.source
                );
            }
        }
        Command::Check { sql } => {
            let verdict = validate(&sql);
            println!("{}", serde_json::to_string(&verdict)?);
            if !verdict.valid {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
