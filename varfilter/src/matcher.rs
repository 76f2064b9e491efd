//! In-memory evaluation of parsed filter clauses against JSON values.
//!
//! Matching is total: a path or type mismatch is "no match" for that
//! element, never an error, so heterogeneous array contents are safe to
//! traverse.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::parser::{Clause, Literal, Segment, VarsFilter};

/// Whether every clause of the filter matches the given variable mapping
/// (AND semantics). The mapping type matches `fi_core::types::VariableMap`.
#[must_use]
pub fn filter_matches(filter: &VarsFilter, vars: &BTreeMap<String, Value>) -> bool {
    filter.clauses().iter().all(|clause| clause_matches(clause, vars))
}

/// Whether one clause matches: the mapping holds the clause's key and some
/// value at the clause's path compares equal to the literal.
#[must_use]
pub fn clause_matches(clause: &Clause, vars: &BTreeMap<String, Value>) -> bool {
    vars.get(&clause.key)
        .is_some_and(|value| value_matches(value, &clause.path, &clause.value))
}

fn value_matches(value: &Value, path: &[Segment], target: &Literal) -> bool {
    let Some((segment, rest)) = path.split_first() else {
        return literal_eq(value, target);
    };

    match segment {
        Segment::Key(key) => value
            .as_object()
            .and_then(|object| object.get(key))
            .is_some_and(|inner| value_matches(inner, rest, target)),
        Segment::Index(index) => value
            .as_array()
            .and_then(|items| items.get(*index))
            .is_some_and(|inner| value_matches(inner, rest, target)),
        Segment::Any => match value {
            Value::Array(items) => items.iter().any(|inner| value_matches(inner, rest, target)),
            Value::Object(members) => members
                .values()
                .any(|inner| value_matches(inner, rest, target)),
            _ => false,
        },
    }
}

/// Strict JSON-type equality. Integer literals additionally match whole
/// float representations of the same number (`4096` matches `4096.0`).
fn literal_eq(value: &Value, target: &Literal) -> bool {
    match (value, target) {
        (Value::String(s), Literal::Str(t)) => s == t,
        (Value::Bool(b), Literal::Bool(t)) => b == t,
        (Value::Null, Literal::Null) => true,
        (Value::Number(n), Literal::Int(t)) => match n.as_i64() {
            Some(i) => i == *t,
            None => n.as_f64() == Some(*t as f64),
        },
        (Value::Number(n), Literal::Float(t)) => n.as_f64() == Some(*t),
        _ => false,
    }
}
