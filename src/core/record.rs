//! Version records and the identity/attribute types they carry

use crate::core::temporal::{Interval, Timestamp};
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Identity of one logical entity, stable across all of its versions
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityId {
    /// Sequence-allocated numeric key
    Numeric(i64),
    /// Multi-part key, e.g. `["ACME", "E-1001"]`
    Composite(Vec<String>),
}

impl EntityId {
    /// Numeric value, if this is a numeric key
    pub fn as_numeric(&self) -> Option<i64> {
        match self {
            EntityId::Numeric(n) => Some(*n),
            EntityId::Composite(_) => None,
        }
    }
}

impl From<i64> for EntityId {
    fn from(n: i64) -> Self {
        EntityId::Numeric(n)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Numeric(n) => write!(f, "{n}"),
            EntityId::Composite(parts) => write!(f, "{}", parts.join("/")),
        }
    }
}

impl FromStr for EntityId {
    type Err = Error;

    /// `42` parses as numeric, `ACME/E-1001` as composite.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Configuration("empty entity id".to_string()));
        }
        if let Ok(n) = s.parse::<i64>() {
            return Ok(EntityId::Numeric(n));
        }
        Ok(EntityId::Composite(s.split('/').map(str::to_string).collect()))
    }
}

/// Which time axes an entity kind tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Temporality {
    /// Processing time only: an audit trail of corrections
    UniTemporal,
    /// Business and processing time
    BiTemporal,
}

impl FromStr for Temporality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "uni" | "unitemporal" | "uni_temporal" => Ok(Temporality::UniTemporal),
            "bi" | "bitemporal" | "bi_temporal" => Ok(Temporality::BiTemporal),
            other => Err(Error::Configuration(format!("unknown temporality {other:?}"))),
        }
    }
}

/// Named entity kind ("Salary", "EmployeeAssignment", ...) with its temporality
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKind {
    pub name: String,
    pub temporality: Temporality,
}

impl EntityKind {
    pub fn new(name: impl Into<String>, temporality: Temporality) -> Self {
        Self {
            name: name.into(),
            temporality,
        }
    }

    pub fn bi_temporal(name: impl Into<String>) -> Self {
        Self::new(name, Temporality::BiTemporal)
    }

    pub fn uni_temporal(name: impl Into<String>) -> Self {
        Self::new(name, Temporality::UniTemporal)
    }

    pub fn is_bi_temporal(&self) -> bool {
        self.temporality == Temporality::BiTemporal
    }
}

/// A single attribute as seen by query predicates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Time(Timestamp),
}

impl AttributeValue {
    /// Order two values of compatible types. Integers and floats compare
    /// numerically; anything else mixed is incomparable.
    pub fn compare(&self, other: &AttributeValue) -> Option<Ordering> {
        use AttributeValue::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
            (Text(a), Text(b)) => Some(a.cmp(b)),
            (Time(a), Time(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<i32> for AttributeValue {
    fn from(v: i32) -> Self {
        AttributeValue::Int(v.into())
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::Text(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::Text(v)
    }
}

impl From<Timestamp> for AttributeValue {
    fn from(v: Timestamp) -> Self {
        AttributeValue::Time(v)
    }
}

/// Domain payload of an entity kind.
///
/// The store treats attributes as opaque; predicates read individual
/// fields through [`AttributeSet::attribute`].
pub trait AttributeSet: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Look up a field by name; `None` if the kind has no such field.
    fn attribute(&self, name: &str) -> Option<AttributeValue>;
}

/// JSON objects work as attribute sets; dotted names reach into nested objects.
impl AttributeSet for serde_json::Value {
    fn attribute(&self, name: &str) -> Option<AttributeValue> {
        let mut current = self;
        for part in name.split('.') {
            current = current.as_object()?.get(part)?;
        }
        match current {
            serde_json::Value::Null => Some(AttributeValue::Null),
            serde_json::Value::Bool(b) => Some(AttributeValue::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(AttributeValue::Int)
                .or_else(|| n.as_f64().map(AttributeValue::Float)),
            serde_json::Value::String(s) => Some(AttributeValue::Text(s.clone())),
            _ => None,
        }
    }
}

/// One immutable snapshot of an entity's attributes.
///
/// `business` is `None` for uni-temporal entities. `seq` numbers the records
/// of one chain and stays fixed when the record's processing interval is
/// later closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord<A> {
    id: EntityId,
    seq: u64,
    attributes: A,
    business: Option<Interval>,
    processing: Interval,
}

impl<A: Clone> VersionRecord<A> {
    pub fn new(
        id: EntityId,
        seq: u64,
        attributes: A,
        business: Option<Interval>,
        processing: Interval,
    ) -> Self {
        Self {
            id,
            seq,
            attributes,
            business,
            processing,
        }
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn attributes(&self) -> &A {
        &self.attributes
    }

    pub fn into_attributes(self) -> A {
        self.attributes
    }

    pub fn business(&self) -> Option<&Interval> {
        self.business.as_ref()
    }

    pub fn processing(&self) -> &Interval {
        &self.processing
    }

    /// Currently believed: processing interval still open
    pub fn is_current(&self) -> bool {
        self.processing.is_infinite()
    }

    /// Business validity at `t`; records without a business axis are valid everywhere.
    pub fn valid_at(&self, t: Timestamp) -> bool {
        self.business.map_or(true, |b| b.contains(t))
    }

    /// Whether two records claim any common business instant
    pub fn business_overlaps(&self, other: &VersionRecord<A>) -> bool {
        match (&self.business, &other.business) {
            (Some(a), Some(b)) => a.overlaps(b),
            _ => true,
        }
    }

    /// Copy of this record with its processing interval closed at `at`.
    pub fn closed_at(&self, at: Timestamp) -> Result<Self> {
        if !self.is_current() {
            return Err(Error::InconsistentChain(format!(
                "record {}#{} is already closed at {}",
                self.id,
                self.seq,
                self.processing.thru()
            )));
        }
        Ok(Self {
            processing: self.processing.closed_at(at)?,
            ..self.clone()
        })
    }

    /// Same attributes under a different business interval, written at `at`.
    pub fn restated(&self, seq: u64, business: Interval, at: Timestamp) -> Self {
        Self {
            id: self.id.clone(),
            seq,
            attributes: self.attributes.clone(),
            business: Some(business),
            processing: Interval::open(at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_secs(secs)
    }

    #[test]
    fn test_entity_id_parse_and_display() {
        assert_eq!("42".parse::<EntityId>().unwrap(), EntityId::Numeric(42));
        let composite: EntityId = "ACME/E-1001".parse().unwrap();
        assert_eq!(
            composite,
            EntityId::Composite(vec!["ACME".to_string(), "E-1001".to_string()])
        );
        assert_eq!(composite.to_string(), "ACME/E-1001");
        assert!("  ".parse::<EntityId>().is_err());
    }

    #[test]
    fn test_temporality_parse() {
        assert_eq!("bi".parse::<Temporality>().unwrap(), Temporality::BiTemporal);
        assert_eq!(
            "UniTemporal".parse::<Temporality>().unwrap(),
            Temporality::UniTemporal
        );
        assert!("tri".parse::<Temporality>().is_err());
    }

    #[test]
    fn test_attribute_compare() {
        let five = AttributeValue::Int(5);
        assert_eq!(five.compare(&AttributeValue::Float(5.5)), Some(Ordering::Less));
        assert_eq!(five.compare(&AttributeValue::Text("5".into())), None);
        assert_eq!(
            AttributeValue::Time(ts(1)).compare(&AttributeValue::Time(ts(2))),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_json_attribute_lookup() {
        let attrs = json!({"amount": 5_000_000, "rate": 0.5, "dept": {"code": "ENG"}, "note": null});
        assert_eq!(attrs.attribute("amount"), Some(AttributeValue::Int(5_000_000)));
        assert_eq!(attrs.attribute("rate"), Some(AttributeValue::Float(0.5)));
        assert_eq!(attrs.attribute("dept.code"), Some(AttributeValue::Text("ENG".into())));
        assert_eq!(attrs.attribute("note"), Some(AttributeValue::Null));
        assert_eq!(attrs.attribute("missing"), None);
    }

    #[test]
    fn test_record_close_is_a_copy() {
        let record = VersionRecord::new(
            EntityId::Numeric(1),
            0,
            json!({"amount": 1}),
            Some(Interval::open(ts(100))),
            Interval::open(ts(100)),
        );
        let closed = record.closed_at(ts(200)).unwrap();
        assert!(record.is_current());
        assert!(!closed.is_current());
        assert_eq!(closed.business(), record.business());
        assert_eq!(closed.attributes(), record.attributes());

        assert!(matches!(
            closed.closed_at(ts(300)),
            Err(Error::InconsistentChain(_))
        ));
        assert!(matches!(
            record.closed_at(ts(100)),
            Err(Error::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_uni_temporal_record_valid_everywhere() {
        let record = VersionRecord::new(
            EntityId::Numeric(1),
            0,
            json!({}),
            None,
            Interval::open(ts(100)),
        );
        assert!(record.valid_at(ts(0)));
        assert!(record.business_overlaps(&record));
    }
}
