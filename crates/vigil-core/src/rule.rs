//! Structured policy rules extracted from regulatory documents.
//!
//! A [`PolicyRule`] is the unit the pipeline operates on: one machine-checkable
//! condition (`condition_field`, `operator`, `threshold_value`) plus free-text
//! carried through for human review. Rules are deduplicated by a semantic
//! [`fingerprint`] so re-extraction of a reworded document does not multiply
//! the store.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("rule record field '{0}' is empty")]
    EmptyField(&'static str),

    #[error("malformed rule record: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Comparison operator of a rule condition.
///
/// `==` and `!=` from extraction output normalise to `=` and `<>` on parse, so
/// fingerprints treat them as the same operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Operator {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
    In,
    NotIn,
}

impl Operator {
    pub fn parse(s: &str) -> Result<Self, RuleError> {
        match s.trim().to_ascii_uppercase().as_str() {
            ">" => Ok(Self::Gt),
            "<" => Ok(Self::Lt),
            ">=" => Ok(Self::Ge),
            "<=" => Ok(Self::Le),
            "=" | "==" => Ok(Self::Eq),
            "<>" | "!=" => Ok(Self::Ne),
            "IN" => Ok(Self::In),
            "NOT IN" => Ok(Self::NotIn),
            other => Err(RuleError::UnknownOperator(other.to_string())),
        }
    }

    /// SQL spelling of the operator.
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql())
    }
}

impl TryFrom<String> for Operator {
    type Error = RuleError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.sql().to_string()
    }
}

/// Categorical rule tag. Informational only — it never affects compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Threshold,
    Pattern,
    Frequency,
    Jurisdiction,
    Ratio,
    #[serde(untagged)]
    Other(String),
}

/// Threshold of a rule condition: a scalar or a list literal.
///
/// The tagged form keeps literal rendering and operator forcing exhaustive;
/// the untagged serde layout matches the extraction collaborator's JSON
/// (`10000`, `"Cash"`, `["Cash", "Cheque"]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdValue {
    Number(f64),
    Text(String),
    List(Vec<ThresholdValue>),
}

impl ThresholdValue {
    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }
}

impl fmt::Display for ThresholdValue {
    /// Canonical display form, used as the fingerprint key segment.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// One structured compliance condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: String,
    pub rule_type: RuleType,
    pub description: String,
    pub condition_field: String,
    pub operator: Operator,
    pub threshold_value: ThresholdValue,
    #[serde(default)]
    pub sql_hint: String,
    /// Derived dedup key; set by the rule store on write.
    #[serde(rename = "_fingerprint", default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl PolicyRule {
    /// Per-record validation for a candidate record from the extraction
    /// collaborator. A bad record is rejected individually, never batch-fatal.
    pub fn from_record(record: serde_json::Value) -> Result<Self, RuleError> {
        let rule: PolicyRule = serde_json::from_value(record)?;
        if rule.id.trim().is_empty() {
            return Err(RuleError::EmptyField("id"));
        }
        Ok(rule)
    }
}

/// First 16 hex characters of SHA-256 over the rule's semantic key.
///
/// Two rules with the same `(condition_field, operator, threshold_value)` get
/// equal fingerprints regardless of `id` or wording.
pub fn fingerprint(rule: &PolicyRule) -> String {
    let key = format!(
        "{}.{}.{}",
        rule.condition_field, rule.operator, rule.threshold_value
    );
    let digest = Sha256::digest(key.as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}
