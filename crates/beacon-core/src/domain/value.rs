//! Persistable attribute values
//!
//! The store only keeps scalar attributes. Richer values coming from
//! instrumentation are stringified before they reach this type.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Attribute map attached to logs, spans and span events
pub type Attributes = BTreeMap<String, PersistableValue>;

/// A scalar value that can be stored in a JSON attribute column
///
/// JSON has no NaN or infinity. A non-finite `Double` is written as its
/// string form and reads back as `String`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PersistableValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl Serialize for PersistableValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PersistableValue::Bool(b) => serializer.serialize_bool(*b),
            PersistableValue::Int(i) => serializer.serialize_i64(*i),
            PersistableValue::Double(d) if d.is_finite() => serializer.serialize_f64(*d),
            PersistableValue::Double(d) => serializer.collect_str(d),
            PersistableValue::String(s) => serializer.serialize_str(s),
        }
    }
}

impl fmt::Display for PersistableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistableValue::Bool(b) => write!(f, "{b}"),
            PersistableValue::Int(i) => write!(f, "{i}"),
            PersistableValue::Double(d) => write!(f, "{d}"),
            PersistableValue::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for PersistableValue {
    fn from(s: &str) -> Self {
        PersistableValue::String(s.to_string())
    }
}

impl From<String> for PersistableValue {
    fn from(s: String) -> Self {
        PersistableValue::String(s)
    }
}

impl From<i64> for PersistableValue {
    fn from(i: i64) -> Self {
        PersistableValue::Int(i)
    }
}

/// Non-finite values become `String` ("NaN", "inf", "-inf")
impl From<f64> for PersistableValue {
    fn from(d: f64) -> Self {
        if d.is_finite() {
            PersistableValue::Double(d)
        } else {
            PersistableValue::String(d.to_string())
        }
    }
}

impl From<bool> for PersistableValue {
    fn from(b: bool) -> Self {
        PersistableValue::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_keeps_scalar_kind() {
        let mut attrs = Attributes::new();
        attrs.insert("a".into(), PersistableValue::Int(3));
        attrs.insert("b".into(), PersistableValue::Double(1.5));
        attrs.insert("c".into(), PersistableValue::Bool(true));
        attrs.insert("d".into(), "text".into());

        let json = serde_json::to_string(&attrs).unwrap();
        let back: Attributes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, attrs);
    }

    #[test]
    fn test_non_finite_double_reads_back_as_string() {
        let mut attrs = Attributes::new();
        attrs.insert("nan".into(), PersistableValue::Double(f64::NAN));
        attrs.insert("up".into(), PersistableValue::Double(f64::INFINITY));
        attrs.insert("down".into(), PersistableValue::Double(f64::NEG_INFINITY));

        let json = serde_json::to_string(&attrs).unwrap();
        let back: Attributes = serde_json::from_str(&json).unwrap();
        assert_eq!(back["nan"], PersistableValue::from("NaN"));
        assert_eq!(back["up"], PersistableValue::from("inf"));
        assert_eq!(back["down"], PersistableValue::from("-inf"));
    }

    #[test]
    fn test_from_f64_keeps_finite_values() {
        assert_eq!(PersistableValue::from(2.5), PersistableValue::Double(2.5));
        assert_eq!(PersistableValue::from(f64::NAN), PersistableValue::from("NaN"));
    }

    #[test]
    fn test_display_stringifies() {
        assert_eq!(PersistableValue::Int(42).to_string(), "42");
        assert_eq!(PersistableValue::Bool(false).to_string(), "false");
        assert_eq!(PersistableValue::from("x").to_string(), "x");
    }
}
