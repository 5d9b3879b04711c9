//! Schema resolution for the transaction dataset.
//!
//! CSV ingestion may rename columns per file, so nothing here assumes a fixed
//! schema: the resolver reads the table's actual column set once per
//! connection and binds semantic roles to it by exact case-insensitive match.
//! No fuzzy matching — silently binding a rule to the wrong column is worse
//! than reporting the role absent.

use std::collections::HashMap;

use duckdb::Connection;
use duckdb::arrow::array::{Array, StringArray};
use duckdb::arrow::record_batch::RecordBatch;
use tracing::{info, warn};

use crate::StoreError;

/// Display columns for violation samples, in priority order. Filtered down to
/// the columns that actually exist.
pub const PREFERRED_COLUMNS: &[&str] = &[
    "From_Bank",
    "From_Account",
    "To_Bank",
    "To_Account",
    "Amount_Paid",
    "Amount_Received",
    "Payment_Currency",
    "Receiving_Currency",
    "Payment_Format",
    "Timestamp",
    "Is_Laundering",
];

/// Semantic roles a rule's `condition_field` may name, with candidate column
/// names in preference order.
const ROLE_CANDIDATES: &[(&str, &[&str])] = &[
    ("amount_paid", &["Amount_Paid", "Amount", "Transaction_Amount"]),
    ("amount_received", &["Amount_Received", "Received_Amount"]),
    ("payment_format", &["Payment_Format", "Payment_Type", "Format"]),
    ("payment_currency", &["Payment_Currency", "Currency"]),
    ("receiving_currency", &["Receiving_Currency", "Received_Currency"]),
    ("from_bank", &["From_Bank", "Sender_Bank"]),
    ("to_bank", &["To_Bank", "Receiver_Bank"]),
    ("from_account", &["From_Account", "Sender_Account"]),
    ("to_account", &["To_Account", "Receiver_Account"]),
    ("timestamp", &["Timestamp", "Date", "Transaction_Date"]),
    ("is_laundering", &["Is_Laundering", "Laundering_Flag"]),
];

/// The actual column set of one table, with role bindings.
#[derive(Debug, Clone)]
pub struct ResolvedSchema {
    /// lowercase name → actual name
    by_lower: HashMap<String, String>,
    /// role → actual name, for roles whose candidate list matched
    roles: HashMap<String, String>,
}

impl ResolvedSchema {
    /// Resolve against the live connection. An absent table yields an empty
    /// schema (every lookup misses), not an error — per-rule handling decides
    /// what that means.
    pub fn resolve(conn: &Connection, table: &str) -> Result<Self, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT column_name FROM information_schema.columns \
             WHERE lower(table_name) = lower(?) ORDER BY ordinal_position",
        )?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([table])?.collect();
        let mut actual = Vec::new();
        for batch in &batches {
            let col = batch
                .column(0)
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| StoreError::Other("column_name not utf8".into()))?;
            for i in 0..col.len() {
                actual.push(col.value(i).to_string());
            }
        }
        if actual.is_empty() {
            warn!(table, "table has no columns; every rule field will miss");
        } else {
            info!(table, columns = actual.len(), "resolved dataset schema");
        }
        Ok(Self::from_columns(&actual))
    }

    /// Build a schema from a known column list. Also the test seam.
    pub fn from_columns<S: AsRef<str>>(columns: &[S]) -> Self {
        let by_lower: HashMap<String, String> = columns
            .iter()
            .map(|c| (c.as_ref().to_ascii_lowercase(), c.as_ref().to_string()))
            .collect();
        let mut roles = HashMap::new();
        for (role, candidates) in ROLE_CANDIDATES {
            for candidate in *candidates {
                if let Some(actual) = by_lower.get(&candidate.to_ascii_lowercase()) {
                    roles.insert((*role).to_string(), actual.clone());
                    break;
                }
            }
        }
        Self { by_lower, roles }
    }

    /// Map a literal column name or a semantic role ("amount paid") to the
    /// actual column name. `None` means the rule cannot be compiled against
    /// this dataset.
    pub fn column(&self, field: &str) -> Option<&str> {
        let key = field.trim().to_ascii_lowercase();
        if let Some(actual) = self.by_lower.get(&key) {
            return Some(actual);
        }
        let role = key.replace([' ', '-'], "_");
        self.roles.get(&role).map(String::as_str)
    }

    /// SELECT column list: preferred display columns present in the table,
    /// falling back to `*` when none match.
    pub fn select_columns(&self) -> String {
        let matched: Vec<&str> = PREFERRED_COLUMNS
            .iter()
            .filter_map(|c| self.by_lower.get(&c.to_ascii_lowercase()))
            .map(String::as_str)
            .collect();
        if matched.is_empty() {
            "*".to_string()
        } else {
            matched.join(", ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn literal_lookup_is_case_insensitive() {
        let schema = ResolvedSchema::from_columns(&["Amount_Paid", "Payment_Format"]);
        assert_eq!(schema.column("amount_paid"), Some("Amount_Paid"));
        assert_eq!(schema.column("AMOUNT_PAID"), Some("Amount_Paid"));
        assert_eq!(schema.column("Amount_Received"), None);
    }

    #[test]
    fn semantic_role_binds_first_matching_candidate() {
        // Renamed dataset: no Amount_Paid, but a fallback candidate exists.
        let schema = ResolvedSchema::from_columns(&["transaction_amount", "payment_type"]);
        assert_eq!(schema.column("amount paid"), Some("transaction_amount"));
        assert_eq!(schema.column("payment format"), Some("payment_type"));
    }

    #[test]
    fn no_fuzzy_matching() {
        let schema = ResolvedSchema::from_columns(&["Amount_Paid_USD"]);
        // Close but not equal: must not bind.
        assert_eq!(schema.column("Amount_Paid"), None);
        assert_eq!(schema.column("amount paid"), None);
    }

    #[test]
    fn select_columns_filters_to_existing() {
        let schema = ResolvedSchema::from_columns(&["Amount_Paid", "Payment_Format", "Extra"]);
        assert_eq!(schema.select_columns(), "Amount_Paid, Payment_Format");

        let empty = ResolvedSchema::from_columns::<&str>(&[]);
        assert_eq!(empty.select_columns(), "*");
    }

    #[test]
    fn resolves_from_live_connection() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("t.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE transactions (Amount_Paid DOUBLE, Payment_Format VARCHAR)",
        )
        .unwrap();

        let schema = ResolvedSchema::resolve(&conn, "transactions").unwrap();
        assert_eq!(schema.column("Amount_Paid"), Some("Amount_Paid"));
        assert_eq!(schema.select_columns(), "Amount_Paid, Payment_Format");

        let missing = ResolvedSchema::resolve(&conn, "absent_table").unwrap();
        assert_eq!(missing.column("Amount_Paid"), None);
        assert_eq!(missing.select_columns(), "*");
    }
}
