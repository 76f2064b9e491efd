//! Rendering of parsed clauses as Postgres jsonpath expressions.
//!
//! The storage crate evaluates one clause per stored variable row with
//! `jsonb_path_exists(value, $n::jsonpath)`, keying the row lookup on the
//! clause's top-level key. The rendered path is therefore relative to the
//! stored value (`$`), not to the whole mapping.

use std::fmt::Write;

use crate::parser::{Clause, Literal, Segment};

/// Render the clause's path-below-key and comparison as one jsonpath
/// expression, e.g. `$.disks[*].size ? (@ == 4096)`.
#[must_use]
pub fn clause_jsonpath(clause: &Clause) -> String {
    let mut path = String::from("$");
    for segment in &clause.path {
        match segment {
            Segment::Key(key) if is_plain_ident(key) => {
                let _ = write!(path, ".{key}");
            }
            Segment::Key(key) => {
                let _ = write!(path, ".\"{}\"", escape(key));
            }
            Segment::Index(index) => {
                let _ = write!(path, "[{index}]");
            }
            Segment::Any => path.push_str("[*]"),
        }
    }
    format!("{path} ? (@ == {})", render_literal(&clause.value))
}

fn render_literal(literal: &Literal) -> String {
    match literal {
        Literal::Str(s) => format!("\"{}\"", escape(s)),
        Literal::Int(i) => i.to_string(),
        Literal::Float(f) => {
            // Keep a decimal point so the jsonpath literal stays a float.
            if f.fract() == 0.0 && f.is_finite() {
                format!("{f:.1}")
            } else {
                f.to_string()
            }
        }
        Literal::Bool(b) => b.to_string(),
        Literal::Null => "null".to_string(),
    }
}

fn is_plain_ident(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn escape(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}
