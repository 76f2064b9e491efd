use thiserror::Error;

/// Filter expression parse failures. The storage layer surfaces these as
/// `BadRequest`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterParseError {
    #[error("empty filter expression")]
    Empty,

    #[error("unterminated quote in filter expression")]
    UnterminatedQuote,

    #[error("missing ':' separator in clause: {clause}")]
    MissingSeparator { clause: String },

    #[error("empty path segment in clause: {clause}")]
    EmptySegment { clause: String },

    #[error("invalid array index in clause: {clause}")]
    InvalidIndex { clause: String },

    #[error("unexpected character {ch:?} in clause: {clause}")]
    UnexpectedChar { ch: char, clause: String },

    #[error("empty value in clause: {clause}")]
    EmptyValue { clause: String },
}

/// One step into a stored JSON value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal object key.
    Key(String),
    /// Bracketed integer array index.
    Index(usize),
    /// `[*]` or bare `*`: any array element (or object member) matches.
    Any,
}

/// A typed comparison literal, interpreted from the value side of a clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

/// One `key[.path][index]:value` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    /// Top-level variable key (the first path segment).
    pub key: String,
    /// Remaining path below the key; empty for plain `key:value`.
    pub path: Vec<Segment>,
    pub value: Literal,
}

/// A full filter expression: clauses combined with AND semantics.
#[derive(Debug, Clone, PartialEq)]
pub struct VarsFilter {
    clauses: Vec<Clause>,
}

impl VarsFilter {
    pub fn parse(input: &str) -> Result<Self, FilterParseError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(FilterParseError::Empty);
        }

        let clauses = split_clauses(input)?
            .into_iter()
            .map(|clause| parse_clause(&clause))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { clauses })
    }

    #[must_use]
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }
}

impl std::str::FromStr for VarsFilter {
    type Err = FilterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Split on commas that are not inside double quotes. Quotes honor `\"`
/// and `\\` escapes.
fn split_clauses(input: &str) -> Result<Vec<String>, FilterParseError> {
    let mut clauses = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for ch in input.chars() {
        if in_quotes {
            current.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_quotes = false;
            }
        } else if ch == '"' {
            in_quotes = true;
            current.push(ch);
        } else if ch == ',' {
            clauses.push(current.trim().to_string());
            current = String::new();
        } else {
            current.push(ch);
        }
    }
    if in_quotes {
        return Err(FilterParseError::UnterminatedQuote);
    }
    clauses.push(current.trim().to_string());
    Ok(clauses)
}

fn parse_clause(src: &str) -> Result<Clause, FilterParseError> {
    let (path_src, value_src) = split_separator(src)?;

    let segments = parse_path(path_src.trim(), src)?;
    let Some((Segment::Key(key), path)) = segments.split_first().map(|(h, t)| (h.clone(), t)) else {
        return Err(FilterParseError::EmptySegment {
            clause: src.to_string(),
        });
    };

    let value = parse_value(value_src.trim(), src)?;
    Ok(Clause {
        key,
        path: path.to_vec(),
        value,
    })
}

/// Find the `:` separating path from value, skipping quoted stretches.
fn split_separator(src: &str) -> Result<(&str, &str), FilterParseError> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (idx, ch) in src.char_indices() {
        if in_quotes {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_quotes = false;
            }
        } else if ch == '"' {
            in_quotes = true;
        } else if ch == ':' {
            return Ok((&src[..idx], &src[idx + 1..]));
        }
    }
    Err(FilterParseError::MissingSeparator {
        clause: src.to_string(),
    })
}

fn parse_path(path_src: &str, clause: &str) -> Result<Vec<Segment>, FilterParseError> {
    let chars: Vec<char> = path_src.chars().collect();
    let mut segments = Vec::new();
    let mut pos = 0;

    loop {
        // One named segment: quoted, wildcard, or bare identifier.
        if pos >= chars.len() {
            return Err(FilterParseError::EmptySegment {
                clause: clause.to_string(),
            });
        }
        if chars[pos] == '"' {
            let (content, next) = read_quoted(&chars, pos)?;
            segments.push(Segment::Key(content));
            pos = next;
        } else if chars[pos] == '*' && matches!(chars.get(pos + 1), None | Some(&'.') | Some(&'[')) {
            segments.push(Segment::Any);
            pos += 1;
        } else {
            let start = pos;
            while pos < chars.len() && chars[pos] != '.' && chars[pos] != '[' {
                pos += 1;
            }
            if start == pos {
                return Err(FilterParseError::EmptySegment {
                    clause: clause.to_string(),
                });
            }
            segments.push(Segment::Key(chars[start..pos].iter().collect()));
        }

        // Zero or more `[n]` / `[*]` suffixes.
        while pos < chars.len() && chars[pos] == '[' {
            let close = chars[pos..]
                .iter()
                .position(|&c| c == ']')
                .map(|offset| pos + offset)
                .ok_or_else(|| FilterParseError::InvalidIndex {
                    clause: clause.to_string(),
                })?;
            let inner: String = chars[pos + 1..close].iter().collect();
            if inner == "*" {
                segments.push(Segment::Any);
            } else {
                let index =
                    inner
                        .parse::<usize>()
                        .map_err(|_| FilterParseError::InvalidIndex {
                            clause: clause.to_string(),
                        })?;
                segments.push(Segment::Index(index));
            }
            pos = close + 1;
        }

        if pos >= chars.len() {
            return Ok(segments);
        }
        if chars[pos] == '.' {
            pos += 1;
            continue;
        }
        return Err(FilterParseError::UnexpectedChar {
            ch: chars[pos],
            clause: clause.to_string(),
        });
    }
}

/// Read a double-quoted stretch starting at `open`, returning the unescaped
/// content and the position just past the closing quote.
fn read_quoted(chars: &[char], open: usize) -> Result<(String, usize), FilterParseError> {
    let mut content = String::new();
    let mut pos = open + 1;
    while pos < chars.len() {
        match chars[pos] {
            '\\' if pos + 1 < chars.len() => {
                content.push(chars[pos + 1]);
                pos += 2;
            }
            '"' => return Ok((content, pos + 1)),
            ch => {
                content.push(ch);
                pos += 1;
            }
        }
    }
    Err(FilterParseError::UnterminatedQuote)
}

/// Interpret the value side. Quoted literals are always strings; unquoted
/// literals try null, bool, int, float before falling back to string.
fn parse_value(value_src: &str, clause: &str) -> Result<Literal, FilterParseError> {
    if value_src.is_empty() {
        return Err(FilterParseError::EmptyValue {
            clause: clause.to_string(),
        });
    }
    if value_src.starts_with('"') {
        let chars: Vec<char> = value_src.chars().collect();
        let (content, next) = read_quoted(&chars, 0)?;
        if next != chars.len() {
            return Err(FilterParseError::UnexpectedChar {
                ch: chars[next],
                clause: clause.to_string(),
            });
        }
        return Ok(Literal::Str(content));
    }
    Ok(match value_src {
        "null" => Literal::Null,
        "true" => Literal::Bool(true),
        "false" => Literal::Bool(false),
        other => {
            if let Ok(int) = other.parse::<i64>() {
                Literal::Int(int)
            } else if let Ok(float) = other.parse::<f64>() {
                Literal::Float(float)
            } else {
                Literal::Str(other.to_string())
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_key_value() {
        let filter = VarsFilter::parse("datacenter:ORD1").unwrap();
        assert_eq!(
            filter.clauses(),
            &[Clause {
                key: "datacenter".to_string(),
                path: vec![],
                value: Literal::Str("ORD1".to_string()),
            }]
        );
    }

    #[test]
    fn test_nested_path_with_index_and_wildcard() {
        let filter = VarsFilter::parse("hardware_profiles.disks[*].size:4096").unwrap();
        let clause = &filter.clauses()[0];
        assert_eq!(clause.key, "hardware_profiles");
        assert_eq!(
            clause.path,
            vec![
                Segment::Key("disks".to_string()),
                Segment::Any,
                Segment::Key("size".to_string()),
            ]
        );
        assert_eq!(clause.value, Literal::Int(4096));
    }

    #[test]
    fn test_exact_index_and_bare_wildcard() {
        let filter = VarsFilter::parse("ports[0]:22,tags.*:gold").unwrap();
        assert_eq!(filter.clauses()[0].path, vec![Segment::Index(0)]);
        assert_eq!(filter.clauses()[1].path, vec![Segment::Any]);
    }

    #[test]
    fn test_quoted_segments_and_values() {
        let filter = VarsFilter::parse(r#""dotted.key".inner:true,"note":"a, quoted: value""#)
            .unwrap();
        let first = &filter.clauses()[0];
        assert_eq!(first.key, "dotted.key");
        assert_eq!(first.path, vec![Segment::Key("inner".to_string())]);
        assert_eq!(first.value, Literal::Bool(true));

        let second = &filter.clauses()[1];
        assert_eq!(second.key, "note");
        assert_eq!(second.value, Literal::Str("a, quoted: value".to_string()));
    }

    #[test]
    fn test_value_typing() {
        let cases = [
            ("k:1", Literal::Int(1)),
            ("k:2.5", Literal::Float(2.5)),
            ("k:true", Literal::Bool(true)),
            ("k:null", Literal::Null),
            ("k:ORD1", Literal::Str("ORD1".to_string())),
            (r#"k:"1""#, Literal::Str("1".to_string())),
            (r#"k:"null""#, Literal::Str("null".to_string())),
        ];
        for (src, expected) in cases {
            let filter = VarsFilter::parse(src).unwrap();
            assert_eq!(filter.clauses()[0].value, expected, "case {src}");
        }
    }

    #[test]
    fn test_multiple_clauses_are_anded() {
        let filter = VarsFilter::parse("a:1,b.c:2,d[3]:x").unwrap();
        assert_eq!(filter.clauses().len(), 3);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(VarsFilter::parse("  "), Err(FilterParseError::Empty));
        assert!(matches!(
            VarsFilter::parse("novalue"),
            Err(FilterParseError::MissingSeparator { .. })
        ));
        assert!(matches!(
            VarsFilter::parse("a..b:1"),
            Err(FilterParseError::EmptySegment { .. })
        ));
        assert!(matches!(
            VarsFilter::parse("a[x]:1"),
            Err(FilterParseError::InvalidIndex { .. })
        ));
        assert!(matches!(
            VarsFilter::parse("a[1:2"),
            Err(FilterParseError::InvalidIndex { .. })
        ));
        assert!(matches!(
            VarsFilter::parse("a:"),
            Err(FilterParseError::EmptyValue { .. })
        ));
        assert_eq!(
            VarsFilter::parse(r#""open:1"#),
            Err(FilterParseError::UnterminatedQuote)
        );
    }
}
