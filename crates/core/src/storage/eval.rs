//! In-process predicate evaluation.
//!
//! Absent fields never match anything, including `is_null`: only a field that
//! is present and null is null.

use std::cmp::Ordering;

use regex::Regex;

use crate::query::{Operator, Predicate};
use crate::value::{Row, Value};

/// True when `row` satisfies every predicate.
pub fn matches(row: &Row, predicates: &[Predicate]) -> bool {
    predicates.iter().all(|p| matches_one(row, p))
}

fn matches_one(row: &Row, predicate: &Predicate) -> bool {
    let Some(actual) = row.get(predicate.field()) else {
        return false;
    };
    let expected = predicate.value();

    match predicate.op() {
        Operator::IsNull => actual.is_null(),
        Operator::IsNotNull => !actual.is_null(),
        Operator::Eq => actual.compare(expected) == Some(Ordering::Equal),
        Operator::Ne => matches!(actual.compare(expected), Some(Ordering::Less | Ordering::Greater)),
        Operator::Gt => actual.compare(expected) == Some(Ordering::Greater),
        Operator::Gte => matches!(actual.compare(expected), Some(Ordering::Greater | Ordering::Equal)),
        Operator::Lt => actual.compare(expected) == Some(Ordering::Less),
        Operator::Lte => matches!(actual.compare(expected), Some(Ordering::Less | Ordering::Equal)),
        Operator::In => match expected {
            Value::List(items) => items.iter().any(|item| actual.compare(item) == Some(Ordering::Equal)),
            _ => false,
        },
        Operator::Like => match (actual, expected) {
            (Value::Text(text), Value::Text(pattern)) => {
                like_to_regex(pattern).is_some_and(|re| re.is_match(&text.to_ascii_lowercase()))
            }
            _ => false,
        },
    }
}

/// Translate a SQL `LIKE` pattern (`%`, `_`) into an anchored regex over
/// ASCII-lowercased text.
///
/// Case folding is ASCII-only, as in SQLite: `É` and `é` stay distinct.
pub fn like_to_regex(pattern: &str) -> Option<Regex> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push_str("(?s)^");
    let mut buf = [0u8; 4];
    for c in pattern.to_ascii_lowercase().chars() {
        match c {
            '%' => source.push_str(".*"),
            '_' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    source.push('$');
    Regex::new(&source).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    fn p(keyword: &str, value: impl Into<Value>) -> Predicate {
        Predicate::parse(keyword, value.into()).unwrap()
    }

    #[test]
    fn test_is_null_requires_present_null() {
        let with_null = row(&[("age", Value::Null)]);
        let absent = row(&[("name", Value::from("x"))]);
        let with_value = row(&[("age", Value::Int(3))]);

        let is_null = [p("age", Value::Null)];
        assert!(matches(&with_null, &is_null));
        assert!(!matches(&absent, &is_null));
        assert!(!matches(&with_value, &is_null));
    }

    #[test]
    fn test_comparisons() {
        let r = row(&[("age", Value::Int(30)), ("score", Value::Float(2.5))]);
        assert!(matches(&r, &[p("age__gte", 30), p("age__lt", 31)]));
        assert!(!matches(&r, &[p("age__gt", 30)]));
        assert!(matches(&r, &[p("score__gt", 2)]));
        assert!(matches(&r, &[p("age__ne", 29)]));
    }

    #[test]
    fn test_null_never_compares() {
        let r = row(&[("age", Value::Null)]);
        assert!(!matches(&r, &[p("age__ne", 5)]));
        assert!(!matches(&r, &[p("age__lt", 5)]));
    }

    #[test]
    fn test_in() {
        let r = row(&[("status", Value::from("active"))]);
        assert!(matches(&r, &[p("status__in", vec!["active", "trial"])]));
        assert!(!matches(&r, &[p("status__in", Vec::<&str>::new())]));
    }

    #[test]
    fn test_like() {
        let r = row(&[("name", Value::from("Ada Lovelace"))]);
        assert!(matches(&r, &[p("name__like", "ada%")]));
        assert!(matches(&r, &[p("name__like", "%love%")]));
        assert!(matches(&r, &[p("name__like", "Ad_ Lovelace")]));
        assert!(!matches(&r, &[p("name__like", "ada")]));
        assert!(!matches(&r, &[p("name__like", "a.a%")]));
    }

    #[test]
    fn test_like_folds_ascii_only() {
        let r = row(&[("name", Value::from("Élan"))]);
        assert!(!matches(&r, &[p("name__like", "é%")]));
        assert!(matches(&r, &[p("name__like", "ÉLAN")]));
        assert!(matches(&r, &[p("name__like", "_lan")]));
    }
}
