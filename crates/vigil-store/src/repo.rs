//! JSON-file rule repository with fingerprint dedup and versioned snapshots.
//!
//! All writes are atomic whole-replace (write to a temp file in the same
//! directory, then rename). There is no cross-process lock: the repository
//! assumes a single writer at a time.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::info;
use vigil_core::{PolicyRule, fingerprint};

use crate::StoreError;

/// A snapshot is taken before any mutating write whose incoming batch shares
/// less than this fraction of fingerprints with the existing store.
const VERSION_OVERLAP_THRESHOLD: f64 = 0.5;

/// One entry in the version manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: u64,
    pub timestamp: String,
    /// Label for the document the incoming batch came from.
    pub source: String,
    /// Rule count of the archived (pre-write) store.
    pub rule_count: usize,
    /// Archive file name under `versions/`.
    pub archive: String,
}

/// Result of submitting one candidate batch.
#[derive(Debug, Default)]
pub struct SubmitOutcome {
    pub added: usize,
    pub skipped: usize,
    /// Per-record validation failures; a bad record never fails the batch.
    pub rejected: Vec<String>,
    pub snapshot: Option<VersionEntry>,
}

pub struct RuleRepository {
    rules_path: PathBuf,
    versions_dir: PathBuf,
    manifest_path: PathBuf,
}

impl RuleRepository {
    pub fn new(dir: &Path) -> Self {
        Self {
            rules_path: dir.join("policy_rules.json"),
            versions_dir: dir.join("versions"),
            manifest_path: dir.join("policy_versions.json"),
        }
    }

    /// Current rule set, in stored order. An absent store is empty, not an
    /// error.
    pub fn load(&self) -> Result<Vec<PolicyRule>, StoreError> {
        if !self.rules_path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.rules_path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Validate, fingerprint, deduplicate, and append a batch of candidate
    /// records from the extraction collaborator.
    ///
    /// A rule whose fingerprint already exists is skipped even if its wording
    /// differs; the first-seen id wins. When the batch introduces new
    /// fingerprints, or overlaps the existing store below 50%, the current
    /// store is archived first.
    pub fn submit(&self, records: Vec<Value>, source: &str) -> Result<SubmitOutcome, StoreError> {
        let mut outcome = SubmitOutcome::default();
        let mut incoming = Vec::new();
        for (idx, record) in records.into_iter().enumerate() {
            match PolicyRule::from_record(record) {
                Ok(rule) => incoming.push(rule),
                Err(err) => outcome.rejected.push(format!("record #{idx}: {err}")),
            }
        }

        let mut rules = self.load()?;
        let mut seen: HashSet<String> = rules
            .iter()
            .filter_map(|r| r.fingerprint.clone())
            .collect();
        let incoming_fps: HashSet<String> = incoming.iter().map(fingerprint).collect();

        if self.rules_path.exists() && snapshot_due(&seen, &incoming_fps) {
            outcome.snapshot = Some(self.snapshot(source, rules.len())?);
        }

        for mut rule in incoming {
            let fp = fingerprint(&rule);
            if seen.contains(&fp) {
                outcome.skipped += 1;
                continue;
            }
            rule.fingerprint = Some(fp.clone());
            seen.insert(fp);
            rules.push(rule);
            outcome.added += 1;
        }

        self.save(&rules)?;
        info!(
            added = outcome.added,
            skipped = outcome.skipped,
            rejected = outcome.rejected.len(),
            total = rules.len(),
            "rule store updated"
        );
        Ok(outcome)
    }

    /// Atomic whole-replace of the rule store.
    pub fn save(&self, rules: &[PolicyRule]) -> Result<(), StoreError> {
        write_json_atomic(&self.rules_path, rules)
    }

    /// The version manifest, filtered to entries whose archive still exists.
    pub fn manifest(&self) -> Result<Vec<VersionEntry>, StoreError> {
        let mut entries = self.raw_manifest()?;
        entries.retain(|e| self.versions_dir.join(&e.archive).exists());
        Ok(entries)
    }

    /// Rule set archived at a specific version, or empty when unknown.
    pub fn rules_at_version(&self, version: u64) -> Result<Vec<PolicyRule>, StoreError> {
        for entry in self.manifest()? {
            if entry.version == version {
                let text = fs::read_to_string(self.versions_dir.join(&entry.archive))?;
                return Ok(serde_json::from_str(&text)?);
            }
        }
        Ok(Vec::new())
    }

    fn raw_manifest(&self) -> Result<Vec<VersionEntry>, StoreError> {
        if !self.manifest_path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.manifest_path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Archive the current store and append a manifest entry.
    fn snapshot(&self, source: &str, rule_count: usize) -> Result<VersionEntry, StoreError> {
        fs::create_dir_all(&self.versions_dir)?;
        let version = self.next_version()?;
        let now = Utc::now();
        let archive = format!(
            "policy_rules_v{version}__{}.json",
            now.format("%Y%m%dT%H%M%SZ")
        );
        fs::copy(&self.rules_path, self.versions_dir.join(&archive))?;

        let entry = VersionEntry {
            version,
            timestamp: now.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            source: source.to_string(),
            rule_count,
            archive,
        };
        let mut manifest = self.raw_manifest()?;
        manifest.push(entry.clone());
        write_json_atomic(&self.manifest_path, &manifest)?;
        info!(version, rule_count, "archived rule store snapshot");
        Ok(entry)
    }

    /// Next version number from the raw manifest. Versions are monotonic and
    /// never reused, even when an archive file was removed by hand.
    fn next_version(&self) -> Result<u64, StoreError> {
        let entries = self.raw_manifest()?;
        Ok(entries.iter().map(|e| e.version).max().unwrap_or(0) + 1)
    }
}

fn snapshot_due(existing: &HashSet<String>, incoming: &HashSet<String>) -> bool {
    if existing.is_empty() {
        return true;
    }
    if incoming.difference(existing).next().is_some() {
        return true;
    }
    let overlap = incoming.intersection(existing).count() as f64;
    let denom = existing.len().max(incoming.len()) as f64;
    overlap / denom < VERSION_OVERLAP_THRESHOLD
}

/// Write-to-temp then rename, in the target's directory so the rename stays
/// on one filesystem.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::Other(format!("no parent directory for {}", path.display())))?;
    fs::create_dir_all(dir)?;
    let tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(tmp.as_file(), value)?;
    tmp.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str, field: &str, threshold: Value) -> Value {
        serde_json::json!({
            "id": id,
            "rule_type": "threshold",
            "description": format!("rule {id}"),
            "condition_field": field,
            "operator": ">",
            "threshold_value": threshold,
            "sql_hint": "",
        })
    }

    #[test]
    fn first_submit_adds_without_snapshot() {
        let tmp = TempDir::new().unwrap();
        let repo = RuleRepository::new(tmp.path());

        let outcome = repo
            .submit(
                vec![
                    record("RULE_001", "Amount_Paid", Value::from(10_000)),
                    record("RULE_002", "Payment_Format", Value::from("Cash")),
                ],
                "policy.pdf",
            )
            .unwrap();
        assert_eq!(outcome.added, 2);
        assert_eq!(outcome.skipped, 0);
        assert!(outcome.snapshot.is_none());
        assert_eq!(repo.load().unwrap().len(), 2);
    }

    #[test]
    fn resubmission_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let repo = RuleRepository::new(tmp.path());
        let batch = vec![
            record("RULE_001", "Amount_Paid", Value::from(10_000)),
            record("RULE_002", "Payment_Format", Value::from("Cash")),
        ];

        repo.submit(batch.clone(), "policy.pdf").unwrap();
        let second = repo.submit(batch, "policy.pdf").unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.skipped, 2);
        // Unchanged batch: no new version either.
        assert!(second.snapshot.is_none());
        assert!(repo.manifest().unwrap().is_empty());
    }

    #[test]
    fn reworded_duplicate_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let repo = RuleRepository::new(tmp.path());

        repo.submit(
            vec![record("RULE_001", "Amount_Paid", Value::from(10_000))],
            "a.pdf",
        )
        .unwrap();
        let mut reworded = record("RULE_777", "Amount_Paid", Value::from(10_000));
        reworded["description"] = Value::from("entirely different wording");
        let outcome = repo.submit(vec![reworded], "a.pdf").unwrap();
        assert_eq!(outcome.added, 0);
        assert_eq!(outcome.skipped, 1);
        // First-seen id wins.
        assert_eq!(repo.load().unwrap()[0].id, "RULE_001");
    }

    #[test]
    fn mostly_new_batch_triggers_one_version() {
        let tmp = TempDir::new().unwrap();
        let repo = RuleRepository::new(tmp.path());

        repo.submit(
            vec![record("RULE_001", "Amount_Paid", Value::from(10_000))],
            "a.pdf",
        )
        .unwrap();
        let outcome = repo
            .submit(
                vec![
                    record("RULE_010", "Amount_Received", Value::from(5_000)),
                    record("RULE_011", "Payment_Format", Value::from("Wire")),
                ],
                "b.pdf",
            )
            .unwrap();

        let snapshot = outcome.snapshot.expect("new fingerprints must snapshot");
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.rule_count, 1);
        assert_eq!(snapshot.source, "b.pdf");

        let manifest = repo.manifest().unwrap();
        assert_eq!(manifest.len(), 1);
        // The archive holds the pre-write store.
        assert_eq!(repo.rules_at_version(1).unwrap().len(), 1);
    }

    #[test]
    fn version_numbers_increment_strictly() {
        let tmp = TempDir::new().unwrap();
        let repo = RuleRepository::new(tmp.path());

        repo.submit(
            vec![record("RULE_001", "Amount_Paid", Value::from(1))],
            "a.pdf",
        )
        .unwrap();
        for n in 2..5u64 {
            let outcome = repo
                .submit(
                    vec![record("RULE_00X", "Amount_Paid", Value::from(n))],
                    "a.pdf",
                )
                .unwrap();
            assert_eq!(outcome.snapshot.unwrap().version, n - 1);
        }
    }

    #[test]
    fn malformed_records_are_rejected_individually() {
        let tmp = TempDir::new().unwrap();
        let repo = RuleRepository::new(tmp.path());

        let outcome = repo
            .submit(
                vec![
                    record("RULE_001", "Amount_Paid", Value::from(10_000)),
                    serde_json::json!({ "id": "RULE_BAD" }),
                ],
                "a.pdf",
            )
            .unwrap();
        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.rejected.len(), 1);
        assert!(outcome.rejected[0].contains("record #1"));
    }

    #[test]
    fn manifest_filters_missing_archives() {
        let tmp = TempDir::new().unwrap();
        let repo = RuleRepository::new(tmp.path());

        repo.submit(
            vec![record("RULE_001", "Amount_Paid", Value::from(1))],
            "a.pdf",
        )
        .unwrap();
        repo.submit(
            vec![record("RULE_002", "Amount_Paid", Value::from(2))],
            "a.pdf",
        )
        .unwrap();
        let manifest = repo.manifest().unwrap();
        assert_eq!(manifest.len(), 1);

        fs::remove_file(tmp.path().join("versions").join(&manifest[0].archive)).unwrap();
        assert!(repo.manifest().unwrap().is_empty());

        // Versions still advance past the removed archive.
        let outcome = repo
            .submit(
                vec![record("RULE_003", "Amount_Paid", Value::from(3))],
                "a.pdf",
            )
            .unwrap();
        assert_eq!(outcome.snapshot.unwrap().version, 2);
    }
}
