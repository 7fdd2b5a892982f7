//! Attribute predicates for temporal queries

use crate::core::record::{AttributeSet, AttributeValue};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Filter over an entity's attributes.
///
/// Comparisons against a field the entity does not have are false;
/// `IsNull` treats a missing field as null.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Predicate {
    /// Matches everything
    #[default]
    All,
    Eq(String, AttributeValue),
    NotEq(String, AttributeValue),
    In(String, Vec<AttributeValue>),
    NotIn(String, Vec<AttributeValue>),
    GreaterThan(String, AttributeValue),
    GreaterThanOrEq(String, AttributeValue),
    LessThan(String, AttributeValue),
    LessThanOrEq(String, AttributeValue),
    /// Inclusive on both ends
    Between(String, AttributeValue, AttributeValue),
    IsNull(String),
    IsNotNull(String),
    StartsWith(String, String),
    EndsWith(String, String),
    Contains(String, String),
    /// `*` matches any run of characters, `?` exactly one
    Wildcard(String, String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Predicate::Eq(field.into(), value.into())
    }

    pub fn not_eq(field: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Predicate::NotEq(field.into(), value.into())
    }

    pub fn is_in<V: Into<AttributeValue>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Predicate::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn not_in<V: Into<AttributeValue>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Predicate::NotIn(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Predicate::GreaterThan(field.into(), value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Predicate::GreaterThanOrEq(field.into(), value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Predicate::LessThan(field.into(), value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Predicate::LessThanOrEq(field.into(), value.into())
    }

    pub fn between(
        field: impl Into<String>,
        low: impl Into<AttributeValue>,
        high: impl Into<AttributeValue>,
    ) -> Self {
        Predicate::Between(field.into(), low.into(), high.into())
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Predicate::IsNull(field.into())
    }

    pub fn is_not_null(field: impl Into<String>) -> Self {
        Predicate::IsNotNull(field.into())
    }

    pub fn starts_with(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Predicate::StartsWith(field.into(), prefix.into())
    }

    pub fn ends_with(field: impl Into<String>, suffix: impl Into<String>) -> Self {
        Predicate::EndsWith(field.into(), suffix.into())
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Predicate::Contains(field.into(), needle.into())
    }

    pub fn wildcard(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Predicate::Wildcard(field.into(), pattern.into())
    }

    /// Conjunction, flattening nested `And`s
    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::All, p) | (p, Predicate::All) => p,
            (Predicate::And(mut left), Predicate::And(right)) => {
                left.extend(right);
                Predicate::And(left)
            }
            (Predicate::And(mut left), p) => {
                left.push(p);
                Predicate::And(left)
            }
            (p, q) => Predicate::And(vec![p, q]),
        }
    }

    /// Disjunction, flattening nested `Or`s
    pub fn or(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::Or(mut left), Predicate::Or(right)) => {
                left.extend(right);
                Predicate::Or(left)
            }
            (Predicate::Or(mut left), p) => {
                left.push(p);
                Predicate::Or(left)
            }
            (p, q) => Predicate::Or(vec![p, q]),
        }
    }

    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Evaluate against one attribute set
    pub fn matches<A: AttributeSet>(&self, attributes: &A) -> bool {
        let cmp = |field: &str, value: &AttributeValue| {
            attributes
                .attribute(field)
                .filter(|v| !v.is_null())
                .and_then(|v| v.compare(value))
        };
        let text = |field: &str, test: &dyn Fn(&str) -> bool| {
            matches!(attributes.attribute(field), Some(AttributeValue::Text(t)) if test(t.as_str()))
        };
        match self {
            Predicate::All => true,
            Predicate::Eq(f, v) => cmp(f, v) == Some(Ordering::Equal),
            Predicate::NotEq(f, v) => matches!(cmp(f, v), Some(o) if o != Ordering::Equal),
            Predicate::In(f, vs) => vs.iter().any(|v| cmp(f, v) == Some(Ordering::Equal)),
            Predicate::NotIn(f, vs) => {
                attributes.attribute(f).map_or(false, |v| !v.is_null())
                    && vs.iter().all(|v| cmp(f, v) != Some(Ordering::Equal))
            }
            Predicate::GreaterThan(f, v) => cmp(f, v) == Some(Ordering::Greater),
            Predicate::GreaterThanOrEq(f, v) => {
                matches!(cmp(f, v), Some(Ordering::Greater | Ordering::Equal))
            }
            Predicate::LessThan(f, v) => cmp(f, v) == Some(Ordering::Less),
            Predicate::LessThanOrEq(f, v) => {
                matches!(cmp(f, v), Some(Ordering::Less | Ordering::Equal))
            }
            Predicate::Between(f, low, high) => {
                matches!(cmp(f, low), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(cmp(f, high), Some(Ordering::Less | Ordering::Equal))
            }
            Predicate::IsNull(f) => attributes.attribute(f).map_or(true, |v| v.is_null()),
            Predicate::IsNotNull(f) => attributes.attribute(f).map_or(false, |v| !v.is_null()),
            Predicate::StartsWith(f, prefix) => text(f, &|t| t.starts_with(prefix.as_str())),
            Predicate::EndsWith(f, suffix) => text(f, &|t| t.ends_with(suffix.as_str())),
            Predicate::Contains(f, needle) => text(f, &|t| t.contains(needle.as_str())),
            Predicate::Wildcard(f, pattern) => text(f, &|t| wildcard_match(pattern, t)),
            Predicate::And(ps) => ps.iter().all(|p| p.matches(attributes)),
            Predicate::Or(ps) => ps.iter().any(|p| p.matches(attributes)),
            Predicate::Not(p) => !p.matches(attributes),
        }
    }
}

/// Glob match with `*` and `?`, backtracking to the last star
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, t));
                p += 1;
            }
            Some('?') => {
                p += 1;
                t += 1;
            }
            Some(c) if *c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    p = sp + 1;
                    t = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_comparisons() {
        let salary = json!({"amount": 5_000_000, "currency": "JPY", "bonus": null});

        assert!(Predicate::eq("currency", "JPY").matches(&salary));
        assert!(Predicate::not_eq("currency", "USD").matches(&salary));
        assert!(Predicate::gt("amount", 4_000_000).matches(&salary));
        assert!(Predicate::gte("amount", 5_000_000).matches(&salary));
        assert!(!Predicate::lt("amount", 5_000_000).matches(&salary));
        assert!(Predicate::between("amount", 5_000_000, 6_000_000).matches(&salary));
        assert!(Predicate::is_in("currency", ["USD", "JPY"]).matches(&salary));
        assert!(!Predicate::not_in("currency", ["USD", "JPY"]).matches(&salary));
    }

    #[test]
    fn test_missing_and_null_fields() {
        let salary = json!({"amount": 1, "bonus": null});

        assert!(!Predicate::eq("grade", 3).matches(&salary));
        assert!(!Predicate::not_eq("grade", 3).matches(&salary));
        assert!(!Predicate::not_eq("bonus", 3).matches(&salary));
        assert!(Predicate::is_null("bonus").matches(&salary));
        assert!(Predicate::is_null("grade").matches(&salary));
        assert!(Predicate::is_not_null("amount").matches(&salary));
    }

    #[test]
    fn test_combinators() {
        let salary = json!({"amount": 10, "currency": "JPY"});
        let p = Predicate::All
            .and(Predicate::eq("currency", "JPY"))
            .and(Predicate::gt("amount", 5));
        assert!(matches!(&p, Predicate::And(ps) if ps.len() == 2));
        assert!(p.matches(&salary));

        let q = Predicate::eq("currency", "USD").or(Predicate::eq("amount", 10));
        assert!(q.matches(&salary));
        assert!(!q.negate().matches(&salary));
    }

    #[test]
    fn test_text_matchers() {
        let order = json!({"description": "ORDER-2024-0042", "amount": 7});

        assert!(Predicate::starts_with("description", "ORDER-").matches(&order));
        assert!(!Predicate::starts_with("description", "order-").matches(&order));
        assert!(Predicate::ends_with("description", "0042").matches(&order));
        assert!(Predicate::contains("description", "2024").matches(&order));
        assert!(!Predicate::contains("description", "2023").matches(&order));

        // Text matchers never match non-text or missing fields
        assert!(!Predicate::contains("amount", "7").matches(&order));
        assert!(!Predicate::starts_with("grade", "").matches(&order));
    }

    #[test]
    fn test_wildcard() {
        let order = json!({"description": "ORDER-2024-0042"});

        assert!(Predicate::wildcard("description", "ORDER-2024-*").matches(&order));
        assert!(Predicate::wildcard("description", "*-????-0042").matches(&order));
        assert!(Predicate::wildcard("description", "*").matches(&order));
        assert!(!Predicate::wildcard("description", "ORDER-2023-*").matches(&order));
        assert!(!Predicate::wildcard("description", "ORDER-2024-004").matches(&order));

        assert!(wildcard_match("a*b*c", "axxbyyc"));
        assert!(!wildcard_match("a*b?c", "abc"));
        assert!(wildcard_match("", ""));
    }

    #[test]
    fn test_serde_shape() {
        let p = Predicate::eq("currency", "JPY").and(Predicate::is_null("bonus"));
        let json = serde_json::to_string(&p).unwrap();
        let back: Predicate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
