//! Violation report persistence.
//!
//! A run replaces the prior report wholesale — overwrite semantics, never
//! append. The live slot keeps watch-mode sweeps from clobbering the last
//! full-dataset report.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;
use vigil_core::ViolationResult;

use crate::StoreError;
use crate::repo::write_json_atomic;

pub struct ReportRepository {
    report_path: PathBuf,
    live_path: PathBuf,
}

impl ReportRepository {
    pub fn new(dir: &Path) -> Self {
        Self {
            report_path: dir.join("violation_report.json"),
            live_path: dir.join("violation_report_live.json"),
        }
    }

    pub fn save(&self, report: &[ViolationResult], live: bool) -> Result<(), StoreError> {
        let path = self.path(live);
        write_json_atomic(path, &report)?;
        info!(results = report.len(), live, "violation report written");
        Ok(())
    }

    pub fn load(&self, live: bool) -> Result<Vec<ViolationResult>, StoreError> {
        let path = self.path(live);
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    fn path(&self, live: bool) -> &Path {
        if live { &self.live_path } else { &self.report_path }
    }
}
