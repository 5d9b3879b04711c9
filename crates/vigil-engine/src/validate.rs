//! Layered read-only validation for compiled queries.
//!
//! Purely textual — validation never executes anything, holds no state, and
//! returns the same verdict for the same text regardless of call order. The
//! first failing layer names the rejection reason.
//!
//! An admitted query starts with SELECT, contains no blocklisted keyword as a
//! standalone token, and is a single statement. That does not make it
//! semantically harmless (UNION-based reads of other tables pass); the
//! sandbox's read-only connection is the independent second line of defence.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// DDL/DML and administrative keywords rejected anywhere in a query, even
/// inside subqueries.
pub const BLOCKED_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "CREATE", "ALTER", "TRUNCATE", "REPLACE", "MERGE",
    "EXEC", "EXECUTE", "CALL", "GRANT", "REVOKE", "COPY", "ATTACH", "DETACH", "LOAD", "IMPORT",
    "EXPORT",
];

static SELECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*SELECT\b").expect("valid SELECT pattern"));
static BLOCK_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid block comment pattern"));
static LINE_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--[^\n]*").expect("valid line comment pattern"));
static BLOCKLIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = BLOCKED_KEYWORDS.join("|");
    Regex::new(&format!(r"(?i)\b({alternation})\b")).expect("valid blocklist pattern")
});

/// Admit/reject decision for one query text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Verdict {
    fn admit() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn reject(reason: String) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }
}

/// Validate a query against the read-only policy.
///
/// Layers, in order, short-circuiting on the first failure:
/// 1. comment stripping (block comments before line comments, so a line
///    comment cannot hide inside a block comment boundary)
/// 2. allowlist: the cleaned text must begin with `SELECT`
/// 3. blocklist: word-boundary scan for [`BLOCKED_KEYWORDS`]
/// 4. single statement: at most one non-empty `;`-separated fragment
pub fn validate(sql: &str) -> Verdict {
    if sql.trim().is_empty() {
        return Verdict::reject("empty query".to_string());
    }

    let cleaned = BLOCK_COMMENT_RE.replace_all(sql, " ");
    let cleaned = LINE_COMMENT_RE.replace_all(&cleaned, " ");
    let cleaned = cleaned.trim();

    if !SELECT_RE.is_match(cleaned) {
        let leading = cleaned
            .split_whitespace()
            .next()
            .unwrap_or("(empty)")
            .to_ascii_uppercase();
        return Verdict::reject(format!(
            "statement begins with '{leading}', not SELECT; only read-only SELECT statements are permitted"
        ));
    }

    if let Some(found) = BLOCKLIST_RE.captures(cleaned) {
        return Verdict::reject(format!(
            "blocked keyword '{}' detected; read-only queries only",
            found[1].to_ascii_uppercase()
        ));
    }

    let statements = cleaned.split(';').filter(|s| !s.trim().is_empty()).count();
    if statements > 1 {
        return Verdict::reject(format!(
            "multiple statements detected ({statements} separated by ';'); a single SELECT is permitted"
        ));
    }

    Verdict::admit()
}
