//! Deterministic rule-to-query compilation.
//!
//! One structured rule becomes one read-only SELECT against the resolved
//! schema. Compilation is pure string assembly over already-validated parts;
//! the sandbox adds the row cap and the validator rules on the result, so no
//! LIMIT or semicolon appears here.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;
use vigil_core::{Operator, PolicyRule, ThresholdValue};
use vigil_store::ResolvedSchema;

/// Secondary-condition patterns recognised in free-text hints.
///
/// Best-effort enrichment: a hint whose condition is not in this table
/// silently compiles with only the primary condition. An enumerable table,
/// not ad hoc scanning, so coverage can list every supported clause shape.
static HINT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)Payment_Format\s*=\s*'[^']*'",
        r"(?i)Payment_Currency\s*!=\s*Receiving_Currency",
        r"(?i)Is_Laundering\s*=\s*1",
        r"(?i)Amount_Paid\s*%\s*1000\s*=\s*0",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid hint pattern"))
    .collect()
});

/// Compile one rule against the resolved schema.
///
/// Returns `None` when the rule has an empty `condition_field` or the field
/// maps to no column in this dataset — the caller records those as skipped
/// rather than failing the run.
pub fn compile(rule: &PolicyRule, schema: &ResolvedSchema, table_ref: &str) -> Option<String> {
    let field = rule.condition_field.trim();
    if field.is_empty() {
        return None;
    }
    let column = schema.column(field)?;

    // A list literal implies a membership test: anything but NOT IN compiles
    // to IN.
    let operator = if rule.threshold_value.is_list() && rule.operator != Operator::NotIn {
        Operator::In
    } else {
        rule.operator
    };

    let mut conditions = vec![format!(
        "{column} {} {}",
        operator.sql(),
        render_literal(&rule.threshold_value)
    )];
    for pattern in HINT_PATTERNS.iter() {
        if let Some(found) = pattern.find(&rule.sql_hint) {
            let clause = found.as_str().trim();
            let present = conditions.join(" ").to_ascii_uppercase();
            if !present.contains(&clause.to_ascii_uppercase()) {
                debug!(rule_id = %rule.id, clause, "hint pattern matched");
                conditions.push(clause.to_string());
            }
        }
    }

    Some(format!(
        "SELECT {} FROM {} WHERE {}",
        schema.select_columns(),
        table_ref,
        conditions.join(" AND ")
    ))
}

/// Render a threshold as a SQL literal. Strings are single-quoted with
/// embedded quotes doubled; numbers render as their decimal text; lists as a
/// parenthesised, comma-separated literal list.
fn render_literal(value: &ThresholdValue) -> String {
    match value {
        ThresholdValue::Number(n) => n.to_string(),
        ThresholdValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
        ThresholdValue::List(items) => {
            let parts: Vec<String> = items.iter().map(render_literal).collect();
            format!("({})", parts.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::RuleType;

    fn schema() -> ResolvedSchema {
        ResolvedSchema::from_columns(&[
            "Amount_Paid",
            "Payment_Format",
            "Payment_Currency",
            "Receiving_Currency",
            "Is_Laundering",
        ])
    }

    fn rule(field: &str, operator: Operator, threshold: ThresholdValue) -> PolicyRule {
        PolicyRule {
            id: "RULE_001".to_string(),
            rule_type: RuleType::Threshold,
            description: "d".to_string(),
            condition_field: field.to_string(),
            operator,
            threshold_value: threshold,
            sql_hint: String::new(),
            fingerprint: None,
        }
    }

    #[test]
    fn threshold_rule_compiles() {
        let r = rule("Amount_Paid", Operator::Gt, ThresholdValue::Number(10_000.0));
        let sql = compile(&r, &schema(), "aml.transactions").unwrap();
        assert!(sql.starts_with("SELECT "));
        assert!(sql.contains("FROM aml.transactions WHERE Amount_Paid > 10000"));
        assert!(!sql.contains("LIMIT"));
        assert!(!sql.ends_with(';'));
    }

    #[test]
    fn empty_or_unmapped_field_is_unsupported() {
        let r = rule("", Operator::Gt, ThresholdValue::Number(1.0));
        assert!(compile(&r, &schema(), "t").is_none());

        let r = rule("No_Such_Column", Operator::Gt, ThresholdValue::Number(1.0));
        assert!(compile(&r, &schema(), "t").is_none());
    }

    #[test]
    fn semantic_field_binds_to_actual_column() {
        let r = rule("amount paid", Operator::Ge, ThresholdValue::Number(500.0));
        let sql = compile(&r, &schema(), "t").unwrap();
        assert!(sql.contains("WHERE Amount_Paid >= 500"));
    }

    #[test]
    fn list_threshold_forces_membership_test() {
        let list = ThresholdValue::List(vec![
            ThresholdValue::Text("Cash".to_string()),
            ThresholdValue::Text("Cheque".to_string()),
        ]);
        let r = rule("Payment_Format", Operator::Eq, list.clone());
        let sql = compile(&r, &schema(), "t").unwrap();
        assert!(sql.contains("Payment_Format IN ('Cash', 'Cheque')"));

        // NOT IN is already a membership test; it is not inverted.
        let r = rule("Payment_Format", Operator::NotIn, list);
        let sql = compile(&r, &schema(), "t").unwrap();
        assert!(sql.contains("Payment_Format NOT IN ('Cash', 'Cheque')"));
    }

    #[test]
    fn string_literal_quotes_are_doubled() {
        let r = rule(
            "Payment_Format",
            Operator::Eq,
            ThresholdValue::Text("O'Brien".to_string()),
        );
        let sql = compile(&r, &schema(), "t").unwrap();
        assert!(sql.contains("Payment_Format = 'O''Brien'"));
    }

    #[test]
    fn hint_appends_secondary_condition() {
        let mut r = rule("Amount_Paid", Operator::Gt, ThresholdValue::Number(9_000.0));
        r.sql_hint = "also require Payment_Format = 'Cash' for this check".to_string();
        let sql = compile(&r, &schema(), "t").unwrap();
        assert!(sql.contains("Amount_Paid > 9000 AND Payment_Format = 'Cash'"));
    }

    #[test]
    fn hint_already_in_primary_is_not_duplicated() {
        let mut r = rule(
            "Is_Laundering",
            Operator::Eq,
            ThresholdValue::Number(1.0),
        );
        r.sql_hint = "Is_Laundering = 1".to_string();
        let sql = compile(&r, &schema(), "t").unwrap();
        assert_eq!(sql.matches("Is_Laundering = 1").count(), 1);
    }

    #[test]
    fn uncovered_hint_is_silently_ignored() {
        let mut r = rule("Amount_Paid", Operator::Gt, ThresholdValue::Number(1.0));
        r.sql_hint = "and the moon is full".to_string();
        let sql = compile(&r, &schema(), "t").unwrap();
        assert!(!sql.contains("moon"));
        assert!(sql.contains("WHERE Amount_Paid > 1"));
    }

    #[test]
    fn currency_mismatch_hint_matches() {
        let mut r = rule("Amount_Paid", Operator::Gt, ThresholdValue::Number(0.0));
        r.sql_hint = "flag when Payment_Currency != Receiving_Currency".to_string();
        let sql = compile(&r, &schema(), "t").unwrap();
        assert!(sql.contains("AND Payment_Currency != Receiving_Currency"));
    }
}
