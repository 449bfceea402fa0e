//! The predicate language accepted by [`Transaction::walk_info`](super::Transaction::walk_info).
//!
//! A filter is a comma separated conjunction of clauses, each one of:
//!
//! - `field` (the field is present),
//! - `field==value`,
//! - `field!=value`,
//!
//! where `field` is `name`, `kind`, `parent` or `labels.<key>`. Label keys and
//! values may be double quoted, e.g. `labels."containerd.io/snapshot.ref"==sha256:abc`.
//! Several filters are combined with a logical or, and an empty filter list
//! matches every snapshot.

use crate::info::Info;
use crate::{Error, Result};

#[derive(Debug, PartialEq)]
enum Field {
    Name,
    Kind,
    Parent,
    Label(String),
}

#[derive(Debug, PartialEq)]
enum Operator {
    Present,
    Equal(String),
    NotEqual(String),
}

#[derive(Debug, PartialEq)]
struct Clause {
    field: Field,
    operator: Operator,
}

/// A parsed list of filters, combined with a logical or.
#[derive(Debug, Default)]
pub struct Filters {
    alternatives: Vec<Vec<Clause>>,
}

impl Filters {
    /// Parse every filter string.
    pub fn parse(filters: &[String]) -> Result<Self> {
        let alternatives = filters
            .iter()
            .map(|filter| parse_filter(filter))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { alternatives })
    }

    pub fn matches(&self, info: &Info) -> bool {
        self.alternatives.is_empty()
            || self
                .alternatives
                .iter()
                .any(|clauses| clauses.iter().all(|clause| clause.matches(info)))
    }
}

impl Clause {
    fn matches(&self, info: &Info) -> bool {
        let value = match &self.field {
            Field::Name => Some(info.name.clone()),
            Field::Kind => Some(info.kind.to_string()),
            Field::Parent => info.parent.clone(),
            Field::Label(key) => info.labels.get(key).cloned(),
        };

        match &self.operator {
            Operator::Present => value.is_some(),
            Operator::Equal(expected) => value.as_deref() == Some(expected.as_str()),
            Operator::NotEqual(expected) => value.as_deref() != Some(expected.as_str()),
        }
    }
}

fn invalid(filter: &str, reason: &str) -> Error {
    Error::InvalidArgument(format!("invalid filter {:?}: {}", filter, reason))
}

fn parse_filter(filter: &str) -> Result<Vec<Clause>> {
    if filter.trim().is_empty() {
        return Ok(Vec::new());
    }

    split_clauses(filter)?
        .into_iter()
        .map(|clause| parse_clause(filter, clause))
        .collect()
}

/// Split on commas which are not inside double quotes.
fn split_clauses(filter: &str) -> Result<Vec<&str>> {
    let mut clauses = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;

    for (i, b) in filter.bytes().enumerate() {
        match b {
            _ if escaped => escaped = false,
            b'\\' if quoted => escaped = true,
            b'"' => quoted = !quoted,
            b',' if !quoted => {
                clauses.push(&filter[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    if quoted {
        return Err(invalid(filter, "unterminated quote"));
    }
    clauses.push(&filter[start..]);

    Ok(clauses)
}

/// Find the first `==` or `!=` outside quotes.
fn find_operator(clause: &str) -> Option<(usize, bool)> {
    let bytes = clause.as_bytes();
    let mut quoted = false;
    let mut escaped = false;

    for i in 0..bytes.len() {
        match bytes[i] {
            _ if escaped => escaped = false,
            b'\\' if quoted => escaped = true,
            b'"' => quoted = !quoted,
            b'=' | b'!' if !quoted && bytes.get(i + 1) == Some(&b'=') => {
                return Some((i, bytes[i] == b'='));
            }
            _ => {}
        }
    }

    None
}

fn unquote(filter: &str, s: &str) -> Result<String> {
    let s = s.trim();
    let inner = match s.strip_prefix('"') {
        Some(rest) => rest
            .strip_suffix('"')
            .ok_or_else(|| invalid(filter, "unterminated quote"))?,
        None => return Ok(s.to_string()),
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            out.extend(chars.next());
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

fn parse_field(filter: &str, field: &str) -> Result<Field> {
    match field.trim() {
        "" => Err(invalid(filter, "empty field")),
        "name" => Ok(Field::Name),
        "kind" => Ok(Field::Kind),
        "parent" => Ok(Field::Parent),
        other => match other.strip_prefix("labels.") {
            Some(key) if !key.is_empty() => Ok(Field::Label(unquote(filter, key)?)),
            _ => Err(invalid(filter, &format!("unknown field {}", other))),
        },
    }
}

fn parse_clause(filter: &str, clause: &str) -> Result<Clause> {
    let (field, operator) = match find_operator(clause) {
        Some((at, equal)) => {
            let value = unquote(filter, &clause[at + 2..])?;
            let operator = if equal {
                Operator::Equal(value)
            } else {
                Operator::NotEqual(value)
            };
            (&clause[..at], operator)
        }
        None => (clause, Operator::Present),
    };

    Ok(Clause {
        field: parse_field(filter, field)?,
        operator,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::Kind;
    use std::collections::HashMap;

    fn info(name: &str, kind: Kind, parent: Option<&str>, labels: &[(&str, &str)]) -> Info {
        Info {
            name: name.to_string(),
            kind,
            parent: parent.map(str::to_string),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            ..Default::default()
        }
    }

    fn filters(list: &[&str]) -> Filters {
        Filters::parse(&list.iter().map(|s| s.to_string()).collect::<Vec<_>>()).unwrap()
    }

    #[test]
    fn test_empty_filters_match_everything() {
        let base = info("base", Kind::Committed, None, &[]);
        assert!(filters(&[]).matches(&base));
        assert!(filters(&[""]).matches(&base));
    }

    #[test]
    fn test_fields() {
        let layer = info(
            "layer",
            Kind::Committed,
            Some("base"),
            &[("containerd.io/snapshot.ref", "sha256:abc")],
        );

        assert!(filters(&["name==layer"]).matches(&layer));
        assert!(!filters(&["name!=layer"]).matches(&layer));
        assert!(filters(&["kind==committed,parent==base"]).matches(&layer));
        assert!(!filters(&["kind==active,parent==base"]).matches(&layer));
        assert!(filters(&["parent"]).matches(&layer));
        assert!(filters(&[r#"labels."containerd.io/snapshot.ref""#]).matches(&layer));
        assert!(filters(&[r#"labels."containerd.io/snapshot.ref"=="sha256:abc""#]).matches(&layer));
        assert!(!filters(&["labels.missing"]).matches(&layer));
        assert!(filters(&["labels.missing!=x"]).matches(&layer));
    }

    #[test]
    fn test_filters_are_or_combined() {
        let active = info("a", Kind::Active, None, &[]);
        assert!(filters(&["kind==view", "name==a"]).matches(&active));
        assert!(!filters(&["kind==view", "name==b"]).matches(&active));
    }

    #[test]
    fn test_quoted_values_keep_commas() {
        let labelled = info("a", Kind::Active, None, &[("list", "x,y")]);
        assert!(filters(&[r#"labels.list=="x,y",name==a"#]).matches(&labelled));
    }

    #[test]
    fn test_invalid_filters() {
        for filter in ["unknown==x", "labels.", "name==a,", r#"labels."oops==x"#, "==x"] {
            let result = Filters::parse(&[filter.to_string()]);
            assert!(
                matches!(result, Err(Error::InvalidArgument(_))),
                "filter {:?} should be rejected",
                filter
            );
        }
    }
}
