//! Append-only JSONL audit sink.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use serde_json::Value;
use vigil_core::audit::{AuditError, AuditSink};

/// One JSON object per line: `{ts, event_type, payload}`. Lines are only ever
/// appended; rewriting history is not part of the interface.
pub struct JsonlAuditSink {
    path: PathBuf,
}

impl JsonlAuditSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, event_type: &str, payload: Value) -> Result<(), AuditError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::json!({
            "ts": Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            "event_type": event_type,
            "payload": payload,
        });
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}
