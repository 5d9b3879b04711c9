//! Audit event seam.
//!
//! The core only emits events through [`AuditSink::record`]; storage and
//! retention belong to whichever sink implementation is plugged in.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit payload error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Append-only event sink. Implementations must never rewrite past events.
pub trait AuditSink {
    fn record(&self, event_type: &str, payload: Value) -> Result<(), AuditError>;
}

/// Sink that drops every event. For tests and audit-disabled runs.
#[derive(Debug, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event_type: &str, _payload: Value) -> Result<(), AuditError> {
        Ok(())
    }
}
