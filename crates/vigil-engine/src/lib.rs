//! The rule-to-query pipeline: deterministic compilation, layered read-only
//! validation, sandboxed execution, and report assembly.

pub mod compile;
mod error;
pub mod pipeline;
pub mod validate;

pub use error::EngineError;
pub use pipeline::{RunConfig, run_report, watch};
pub use validate::{Verdict, validate};
