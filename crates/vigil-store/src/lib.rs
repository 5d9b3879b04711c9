//! Storage layer: read-only DuckDB sandbox, schema resolution, rule and
//! report repositories, and the JSONL audit sink.

mod audit;
mod error;
mod repo;
mod reports;
mod sandbox;
mod schema;

pub use audit::JsonlAuditSink;
pub use error::StoreError;
pub use repo::{RuleRepository, SubmitOutcome, VersionEntry};
pub use reports::ReportRepository;
pub use sandbox::{DEFAULT_ROW_CAP, QueryOutcome, Sandbox};
pub use schema::{PREFERRED_COLUMNS, ResolvedSchema};
