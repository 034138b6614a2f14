//! Edge condition evaluation.
//!
//! Conditions are conjunctions of string comparisons:
//! `outcome == success && context.attempts != "3"`. Supported operators are
//! `=`, `==` (both equality) and `!=`. Terms join with `&&`. Values may be
//! bare words or double-quoted strings; comparison is always string equality
//! against the resolved key.

use gantry_types::{GantryError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub key: String,
    pub op: Op,
    pub value: String,
}

/// Parse a condition string into its comparison terms. Errors on empty
/// terms, missing operators, or empty keys.
pub fn parse_condition(condition: &str) -> Result<Vec<Comparison>> {
    let mut terms = Vec::new();
    for part in split_conjunction(condition) {
        let part = part.trim();
        if part.is_empty() {
            return Err(syntax_error(condition, "empty term in conjunction"));
        }
        terms.push(parse_comparison(condition, part)?);
    }
    if terms.is_empty() {
        return Err(syntax_error(condition, "condition is empty"));
    }
    Ok(terms)
}

/// Evaluate a condition against a key resolver. A missing key compares as
/// unequal to every value, so `==` is false and `!=` is true.
pub fn evaluate<F>(condition: &str, resolve: F) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    for term in parse_condition(condition)? {
        let actual = resolve(&term.key);
        let matched = match (&actual, term.op) {
            (Some(v), Op::Eq) => *v == term.value,
            (Some(v), Op::Ne) => *v != term.value,
            (None, Op::Eq) => false,
            (None, Op::Ne) => true,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Check a condition parses, without evaluating it. Used by the linter.
pub fn validate_condition(condition: &str) -> Result<()> {
    parse_condition(condition).map(|_| ())
}

fn parse_comparison(full: &str, term: &str) -> Result<Comparison> {
    let (idx, op, op_len) = find_operator(term)
        .ok_or_else(|| syntax_error(full, format!("no operator in term '{}'", term)))?;

    let key = term[..idx].trim();
    if key.is_empty() {
        return Err(syntax_error(full, format!("missing key in term '{}'", term)));
    }

    let value = unquote(term[idx + op_len..].trim());

    Ok(Comparison {
        key: key.to_string(),
        op,
        value,
    })
}

/// Locate the comparison operator, skipping anything inside double quotes.
/// Returns (byte index, operator, operator length).
fn find_operator(term: &str) -> Option<(usize, Op, usize)> {
    let bytes = term.as_bytes();
    let mut in_quote = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => in_quote = !in_quote,
            b'!' if !in_quote && i + 1 < bytes.len() && bytes[i + 1] == b'=' => {
                return Some((i, Op::Ne, 2));
            }
            b'=' if !in_quote => {
                if i + 1 < bytes.len() && bytes[i + 1] == b'=' {
                    return Some((i, Op::Eq, 2));
                }
                return Some((i, Op::Eq, 1));
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Split on `&&` outside double quotes.
fn split_conjunction(condition: &str) -> Vec<&str> {
    let bytes = condition.as_bytes();
    let mut parts = Vec::new();
    let mut in_quote = false;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => in_quote = !in_quote,
            b'&' if !in_quote && i + 1 < bytes.len() && bytes[i + 1] == b'&' => {
                parts.push(&condition[start..i]);
                i += 2;
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&condition[start..]);
    parts
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}

fn syntax_error(condition: &str, message: impl Into<String>) -> GantryError {
    GantryError::ConditionSyntax {
        condition: condition.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolver(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn eval(cond: &str, pairs: &[(&str, &str)]) -> bool {
        let map = resolver(pairs);
        evaluate(cond, |k| map.get(k).cloned()).unwrap()
    }

    #[test]
    fn single_equals_matches() {
        assert!(eval("outcome = success", &[("outcome", "success")]));
        assert!(!eval("outcome = success", &[("outcome", "fail")]));
    }

    #[test]
    fn double_equals_is_same_as_single() {
        assert!(eval("outcome == success", &[("outcome", "success")]));
        assert!(!eval("outcome == success", &[("outcome", "fail")]));
    }

    #[test]
    fn not_equals() {
        assert!(eval("outcome != fail", &[("outcome", "success")]));
        assert!(!eval("outcome != fail", &[("outcome", "fail")]));
    }

    #[test]
    fn missing_key_fails_eq_passes_ne() {
        assert!(!eval("context.flag = true", &[]));
        assert!(eval("context.flag != true", &[]));
    }

    #[test]
    fn quoted_values_unquoted() {
        assert!(eval(r#"status = "in progress""#, &[("status", "in progress")]));
    }

    #[test]
    fn conjunction_requires_all_terms() {
        let pairs = [("outcome", "success"), ("preferred_label", "ship")];
        assert!(eval("outcome = success && preferred_label = ship", &pairs));
        assert!(!eval("outcome = success && preferred_label = hold", &pairs));
    }

    #[test]
    fn operators_inside_quotes_ignored() {
        assert!(eval(r#"note = "a != b""#, &[("note", "a != b")]));
    }

    #[test]
    fn ampersands_inside_quotes_do_not_split() {
        assert!(eval(r#"name = "a && b""#, &[("name", "a && b")]));
    }

    #[test]
    fn missing_operator_is_syntax_error() {
        let err = evaluate("outcome success", |_| None).unwrap_err();
        assert!(matches!(
            err,
            gantry_types::GantryError::ConditionSyntax { .. }
        ));
    }

    #[test]
    fn empty_term_is_syntax_error() {
        assert!(evaluate("outcome = ok && ", |_| None).is_err());
        assert!(evaluate("", |_| None).is_err());
    }

    #[test]
    fn validate_accepts_well_formed() {
        assert!(validate_condition("outcome = success && x != y").is_ok());
        assert!(validate_condition("bare_word").is_err());
    }

    #[test]
    fn empty_value_allowed() {
        assert!(eval("note = ", &[("note", "")]));
        assert!(eval(r#"note = """#, &[("note", "")]));
    }
}
