//! Database value types
//!
//! This module defines the scalar values stored in records, used as primary
//! keys and compared by query conditions.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A scalar stored in a record field, used as a key or compared by a query
///
/// Integer widths, floats, booleans and timestamps all compare numerically
/// with each other (see [`compare`](DatabaseValue::compare)), so a condition
/// built from an `i32` matches a column read back as `i64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DatabaseValue {
    /// Absent or SQL NULL
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Microseconds since the Unix epoch, UTC
    Timestamp(i64),
}

impl DatabaseValue {
    /// Truthiness: booleans, nonzero integers, and `"true"`/`"false"` text
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DatabaseValue::Bool(v) => Some(*v),
            DatabaseValue::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
            DatabaseValue::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
            DatabaseValue::String(_) | DatabaseValue::Timestamp(_) => None,
            other => match other.numeric_key()? {
                Numeric::Int(v) => Some(v != 0),
                Numeric::Real(_) => None,
            },
        }
    }

    /// Integer view; floats truncate and decimal text is parsed
    pub fn as_long(&self) -> Option<i64> {
        match self {
            DatabaseValue::String(s) => s.trim().parse().ok(),
            other => match other.numeric_key()? {
                Numeric::Int(v) => Some(v),
                Numeric::Real(v) => Some(v as i64),
            },
        }
    }

    /// Floating-point view of any numeric value or numeric text
    pub fn as_double(&self) -> Option<f64> {
        match self {
            DatabaseValue::String(s) => s.trim().parse().ok(),
            DatabaseValue::Timestamp(_) => None,
            other => other.numeric_key().map(Numeric::as_f64),
        }
    }

    /// Borrow text without copying
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Borrow the raw bytes of a blob or of text
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            DatabaseValue::Bytes(b) => Some(b),
            DatabaseValue::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Check for null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Check whether this value leaves a primary key unassigned
    ///
    /// `Null`, numeric zero and the empty string all mean "let the backend
    /// pick a key".
    pub fn is_unset_key(&self) -> bool {
        match self {
            DatabaseValue::Null => true,
            DatabaseValue::Int(v) => *v == 0,
            DatabaseValue::Long(v) => *v == 0,
            DatabaseValue::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Get the value as a UTC timestamp
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            DatabaseValue::Timestamp(v) | DatabaseValue::Long(v) => {
                Utc.timestamp_micros(*v).single()
            }
            DatabaseValue::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            _ => None,
        }
    }

    /// Compare two values the way a SQL engine compares them in a predicate
    ///
    /// Integers, floats, booleans and timestamps compare numerically across
    /// widths, strings and bytes compare lexicographically. `None` means the
    /// comparison is unknown: either side is null or the types do not mix.
    pub fn compare(&self, other: &DatabaseValue) -> Option<Ordering> {
        use DatabaseValue::*;
        match (self, other) {
            (Null, _) | (_, Null) => None,
            (String(a), String(b)) => Some(a.cmp(b)),
            (Bytes(a), Bytes(b)) => Some(a.cmp(b)),
            (a, b) => match (a.numeric_key(), b.numeric_key()) {
                (Some(Numeric::Int(x)), Some(Numeric::Int(y))) => Some(x.cmp(&y)),
                (Some(x), Some(y)) => x.as_f64().partial_cmp(&y.as_f64()),
                _ => None,
            },
        }
    }

    /// Total order used for sorting: null, numbers, text, then blobs
    pub fn sort_cmp(&self, other: &DatabaseValue) -> Ordering {
        self.sort_rank()
            .cmp(&other.sort_rank())
            .then_with(|| self.compare(other).unwrap_or(Ordering::Equal))
    }

    fn sort_rank(&self) -> u8 {
        match self {
            DatabaseValue::Null => 0,
            DatabaseValue::String(_) => 2,
            DatabaseValue::Bytes(_) => 3,
            _ => 1,
        }
    }

    fn numeric_key(&self) -> Option<Numeric> {
        match self {
            DatabaseValue::Bool(v) => Some(Numeric::Int(*v as i64)),
            DatabaseValue::Int(v) => Some(Numeric::Int(*v as i64)),
            DatabaseValue::Long(v) | DatabaseValue::Timestamp(v) => Some(Numeric::Int(*v)),
            DatabaseValue::Float(v) => Some(Numeric::Real(*v as f64)),
            DatabaseValue::Double(v) => Some(Numeric::Real(*v)),
            _ => None,
        }
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            DatabaseValue::Null => "null",
            DatabaseValue::Bool(_) => "bool",
            DatabaseValue::Int(_) => "int",
            DatabaseValue::Long(_) => "long",
            DatabaseValue::Float(_) => "float",
            DatabaseValue::Double(_) => "double",
            DatabaseValue::String(_) => "string",
            DatabaseValue::Bytes(_) => "bytes",
            DatabaseValue::Timestamp(_) => "timestamp",
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for DatabaseValue {
                fn from(v: $ty) -> Self {
                    DatabaseValue::$variant(v.into())
                }
            }
        )*
    };
}

value_from!(
    bool => Bool,
    i32 => Int,
    u32 => Long,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    String => String,
    &str => String,
    Vec<u8> => Bytes,
);

impl From<DateTime<Utc>> for DatabaseValue {
    fn from(v: DateTime<Utc>) -> Self {
        DatabaseValue::Timestamp(v.timestamp_micros())
    }
}

impl<T: Into<DatabaseValue>> From<Option<T>> for DatabaseValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(DatabaseValue::Null, Into::into)
    }
}

impl std::fmt::Display for DatabaseValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseValue::Null => f.write_str("null"),
            DatabaseValue::Bool(v) => write!(f, "{}", v),
            DatabaseValue::Int(v) => write!(f, "{}", v),
            DatabaseValue::Long(v) => write!(f, "{}", v),
            DatabaseValue::Float(v) => write!(f, "{}", v),
            DatabaseValue::Double(v) => write!(f, "{}", v),
            DatabaseValue::String(s) => f.write_str(s),
            DatabaseValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            DatabaseValue::Timestamp(v) => match Utc.timestamp_micros(*v).single() {
                Some(dt) => write!(f, "{}", dt.to_rfc3339()),
                None => write!(f, "{}", v),
            },
        }
    }
}

#[derive(Clone, Copy)]
enum Numeric {
    Int(i64),
    Real(f64),
}

impl Numeric {
    fn as_f64(self) -> f64 {
        match self {
            Numeric::Int(v) => v as f64,
            Numeric::Real(v) => v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        let val = DatabaseValue::Int(42);
        assert_eq!(val.as_long(), Some(42));
        assert_eq!(val.as_double(), Some(42.0));
        assert_eq!(val.to_string(), "42");

        let val = DatabaseValue::from(" 123 ");
        assert_eq!(val.as_long(), Some(123));
        assert_eq!(val.as_bool(), None);

        let val = DatabaseValue::Bool(true);
        assert_eq!(val.as_bool(), Some(true));
        assert_eq!(val.as_long(), Some(1));

        assert_eq!(DatabaseValue::from("TRUE").as_bool(), Some(true));
        assert_eq!(DatabaseValue::Double(2.9).as_long(), Some(2));
        assert_eq!(DatabaseValue::Double(0.5).as_bool(), None);
        assert_eq!(DatabaseValue::Null.as_long(), None);
    }

    #[test]
    fn test_value_from_types() {
        let val: DatabaseValue = 42.into();
        assert_eq!(val, DatabaseValue::Int(42));

        let val: DatabaseValue = "hello".into();
        assert_eq!(val, DatabaseValue::String("hello".to_string()));

        let val: DatabaseValue = true.into();
        assert_eq!(val, DatabaseValue::Bool(true));

        let val: DatabaseValue = Some(42).into();
        assert_eq!(val, DatabaseValue::Int(42));

        let val: DatabaseValue = 7u32.into();
        assert_eq!(val, DatabaseValue::Long(7));

        let val: DatabaseValue = Option::<i32>::None.into();
        assert_eq!(val, DatabaseValue::Null);
    }

    #[test]
    fn test_compare_across_widths() {
        assert_eq!(
            DatabaseValue::Int(5).compare(&DatabaseValue::Long(5)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            DatabaseValue::Long(3).compare(&DatabaseValue::Double(3.5)),
            Some(Ordering::Less)
        );
        assert_eq!(
            DatabaseValue::from("b").compare(&DatabaseValue::from("a")),
            Some(Ordering::Greater)
        );
        assert_eq!(DatabaseValue::Null.compare(&DatabaseValue::Null), None);
        assert_eq!(DatabaseValue::from("1").compare(&DatabaseValue::Int(1)), None);
    }

    #[test]
    fn test_sort_cmp_ranks_types() {
        let mut values = vec![
            DatabaseValue::from("text"),
            DatabaseValue::Bytes(vec![1]),
            DatabaseValue::Long(10),
            DatabaseValue::Null,
            DatabaseValue::Double(2.5),
        ];
        values.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(
            values,
            vec![
                DatabaseValue::Null,
                DatabaseValue::Double(2.5),
                DatabaseValue::Long(10),
                DatabaseValue::from("text"),
                DatabaseValue::Bytes(vec![1]),
            ]
        );
    }

    #[test]
    fn test_unset_key() {
        assert!(DatabaseValue::Null.is_unset_key());
        assert!(DatabaseValue::Long(0).is_unset_key());
        assert!(DatabaseValue::from("").is_unset_key());
        assert!(!DatabaseValue::Long(7).is_unset_key());
        assert!(!DatabaseValue::from("k").is_unset_key());
    }

    #[test]
    fn test_datetime_roundtrip() {
        let now = Utc.timestamp_micros(1_700_000_000_123_456).unwrap();
        let value = DatabaseValue::from(now);
        assert_eq!(value.type_name(), "timestamp");
        assert_eq!(value.as_datetime(), Some(now));
        assert_eq!(value.to_string(), now.to_rfc3339());
    }

    #[test]
    fn test_value_type_name() {
        assert_eq!(DatabaseValue::Null.type_name(), "null");
        assert_eq!(DatabaseValue::Bool(true).type_name(), "bool");
        assert_eq!(DatabaseValue::Int(42).type_name(), "int");
        assert_eq!(DatabaseValue::Long(42).type_name(), "long");
        assert_eq!(
            DatabaseValue::String("test".to_string()).type_name(),
            "string"
        );
    }
}
