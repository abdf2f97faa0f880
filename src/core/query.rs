//! Backend-agnostic query model
//!
//! A [`Query`] is an ordered list of conditions plus ordering and pagination.
//! It is built once through chained calls and then handed by reference to
//! [`Database`](super::Database) operations.
//!
//! Conditions fold left to right: a condition joined with
//! [`Combinator::Or`] is OR-ed with everything accumulated before it, not just
//! with its immediate predecessor. `a AND b OR c` therefore means
//! `(a AND b) OR c`, and `a OR b AND c` means `(a OR b) AND c`.
//!
//! # Example
//!
//! ```
//! use dbase::core::query::{Operator, Query};
//!
//! let query = Query::new()
//!     .and_where("Age", Operator::Ge, 30)
//!     .or_where("Name", Operator::Eq, "Bob")
//!     .order_by_asc("Name")
//!     .set_limit(10);
//!
//! assert!(!query.is_empty());
//! assert_eq!(query.conditions.len(), 2);
//! ```

use super::error::{DatabaseError, Result};
use super::model::{FieldDef, FieldType};
use super::value::DatabaseValue;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Comparison operators a condition can use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Equal to
    Eq,
    /// Not equal to
    Ne,
    /// Greater than
    Gt,
    /// Greater than or equal
    Ge,
    /// Less than
    Lt,
    /// Less than or equal
    Le,
    /// Member of a list
    In,
    /// Not a member of a list
    NotIn,
    /// SQL LIKE pattern (`%` and `_` wildcards)
    Like,
    /// String starts with the operand
    Prefix,
    /// Field is null or absent
    IsNull,
    /// Field is present and not null
    NotNull,
}

impl Operator {
    /// All operators, in declaration order
    pub const ALL: [Operator; 12] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Ge,
        Operator::Lt,
        Operator::Le,
        Operator::In,
        Operator::NotIn,
        Operator::Like,
        Operator::Prefix,
        Operator::IsNull,
        Operator::NotNull,
    ];

    /// Wire name of the operator
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Ge => "ge",
            Operator::Lt => "lt",
            Operator::Le => "le",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Like => "like",
            Operator::Prefix => "prefix",
            Operator::IsNull => "is_null",
            Operator::NotNull => "not_null",
        }
    }

    /// Check whether the operator takes a list operand
    pub fn takes_list(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }

    /// Check whether the operator takes no operand at all
    pub fn is_unary(&self) -> bool {
        matches!(self, Operator::IsNull | Operator::NotNull)
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self> {
        Operator::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| DatabaseError::invalid_query(format!("unknown operator '{}'", s)))
    }
}

/// How a condition joins the conditions before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combinator {
    /// Logical AND with the accumulated result
    #[default]
    And,
    /// Logical OR with the accumulated result
    Or,
}

/// Right-hand side of a condition
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// No operand (null checks)
    #[default]
    None,
    /// A single value
    Value(DatabaseValue),
    /// A list of values (membership checks)
    List(Vec<DatabaseValue>),
}

impl Operand {
    /// The scalar operand, if this is one
    pub fn as_value(&self) -> Option<&DatabaseValue> {
        match self {
            Operand::Value(v) => Some(v),
            _ => None,
        }
    }

    /// The list operand, if this is one
    pub fn as_list(&self) -> Option<&[DatabaseValue]> {
        match self {
            Operand::List(values) => Some(values),
            _ => None,
        }
    }
}

impl From<()> for Operand {
    fn from(_: ()) -> Self {
        Operand::None
    }
}

impl From<DatabaseValue> for Operand {
    fn from(v: DatabaseValue) -> Self {
        Operand::Value(v)
    }
}

impl From<Vec<DatabaseValue>> for Operand {
    fn from(values: Vec<DatabaseValue>) -> Self {
        Operand::List(values)
    }
}

macro_rules! operand_from_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Operand {
                fn from(v: $ty) -> Self {
                    Operand::Value(v.into())
                }
            }
        )*
    };
}

operand_from_scalar!(bool, i32, i64, u32, f32, f64, String, &str);

/// A single filter condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Logical field name on the model (not the storage column)
    pub field: String,
    /// Comparison operator
    pub operator: Operator,
    /// Right-hand side
    #[serde(default)]
    pub value: Operand,
    /// How this condition joins the accumulated result
    #[serde(default)]
    pub combinator: Combinator,
}

impl Condition {
    /// Check that the operand shape fits the operator
    pub fn validate(&self) -> Result<()> {
        let ok = match (&self.operator, &self.value) {
            (op, Operand::None) => op.is_unary(),
            (op, Operand::List(_)) => op.takes_list(),
            (Operator::Like | Operator::Prefix, Operand::Value(v)) => v.as_str().is_some(),
            (op, Operand::Value(v)) => !op.is_unary() && !op.takes_list() && !v.is_null(),
        };
        if ok {
            Ok(())
        } else {
            Err(DatabaseError::invalid_query(format!(
                "operator '{}' cannot be applied to {:?} on field '{}'",
                self.operator, self.value, self.field
            )))
        }
    }

    /// Coerce the operand to the storage type of `field`
    ///
    /// Every backend evaluates the bound condition, so a query means the same
    /// thing whether the engine applies column affinity or not. Operands that
    /// cannot represent a value of the field's type are rejected, as are
    /// pattern operators on non-text fields.
    pub fn bind(&self, field: &FieldDef) -> Result<Condition> {
        self.validate()?;
        let mismatch = |value: &DatabaseValue| {
            DatabaseError::invalid_query(format!(
                "operator '{}' cannot compare {:?} field '{}' with {} value {:?}",
                self.operator,
                field.kind,
                field.name,
                value.type_name(),
                value
            ))
        };
        let coerce = |value: &DatabaseValue| {
            coerce_operand(field.kind, value).ok_or_else(|| mismatch(value))
        };
        let value = match &self.value {
            Operand::None => Operand::None,
            Operand::Value(v) if matches!(self.operator, Operator::Like | Operator::Prefix) => {
                if field.kind != FieldType::Text {
                    return Err(mismatch(v));
                }
                Operand::Value(v.clone())
            }
            Operand::Value(v) => Operand::Value(coerce(v)?),
            Operand::List(values) => {
                Operand::List(values.iter().map(coerce).collect::<Result<_>>()?)
            }
        };
        Ok(Condition {
            field: field.name.clone(),
            value,
            ..self.clone()
        })
    }
}

/// Convert an operand to the variant stored for `kind`
///
/// Numeric text becomes a number for numeric fields and integers become text
/// for text fields. Floats stay floats against integer fields so `Age < 30.5`
/// keeps its meaning.
fn coerce_operand(kind: FieldType, value: &DatabaseValue) -> Option<DatabaseValue> {
    use DatabaseValue as V;
    match (kind, value) {
        (_, V::Null) => Some(V::Null),
        (FieldType::Integer, V::String(s)) => {
            let s = s.trim();
            s.parse::<i64>().ok().map(V::Long).or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(V::Double)
            })
        }
        (FieldType::Integer, V::Float(_) | V::Double(_)) => Some(value.clone()),
        (FieldType::Integer, V::Bool(_) | V::Int(_) | V::Long(_) | V::Timestamp(_)) => {
            value.as_long().map(V::Long)
        }
        (FieldType::Real, V::Bool(_) | V::Int(_) | V::Long(_) | V::Float(_) | V::Double(_)) => {
            value.as_double().map(V::Double)
        }
        (FieldType::Real, V::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(V::Double),
        (FieldType::Bool, V::String(_)) => value.as_bool().map(V::Bool),
        (FieldType::Bool, V::Bool(_) | V::Int(_) | V::Long(_) | V::Float(_) | V::Double(_)) => {
            Some(value.clone())
        }
        (FieldType::Timestamp, V::Timestamp(_)) => Some(value.clone()),
        (FieldType::Timestamp, V::Int(_) | V::Long(_)) => value.as_long().map(V::Timestamp),
        (FieldType::Timestamp, V::String(_)) => value
            .as_datetime()
            .map(|dt| V::Timestamp(dt.timestamp_micros())),
        (FieldType::Text, V::String(_)) => Some(value.clone()),
        (FieldType::Text, V::Int(_) | V::Long(_)) => Some(V::String(value.to_string())),
        (FieldType::Bytes, V::Bytes(_)) => Some(value.clone()),
        _ => None,
    }
}

/// Sort order for one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Logical field name
    pub field: String,
    /// Sort descending instead of ascending
    #[serde(default)]
    pub descending: bool,
}

/// A generic query: conditions, ordering and pagination
///
/// `limit == 0` means no limit and `offset == 0` means nothing is skipped.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Query {
    /// Conditions, folded left to right
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Orderings, primary first
    #[serde(default)]
    pub orders: Vec<Order>,
    /// Maximum number of records (0 = unlimited)
    #[serde(default)]
    pub limit: usize,
    /// Number of records to skip
    #[serde(default)]
    pub offset: usize,
}

impl Query {
    /// Create an empty query that matches everything
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, field: &str, operator: Operator, value: Operand, combinator: Combinator) -> Self {
        self.conditions.push(Condition {
            field: field.to_string(),
            operator,
            value,
            combinator,
        });
        self
    }

    /// Append a condition joined with AND
    #[must_use]
    pub fn and_where(self, field: &str, operator: Operator, value: impl Into<Operand>) -> Self {
        self.push(field, operator, value.into(), Combinator::And)
    }

    /// Append a condition joined with OR
    #[must_use]
    pub fn or_where(self, field: &str, operator: Operator, value: impl Into<Operand>) -> Self {
        self.push(field, operator, value.into(), Combinator::Or)
    }

    /// Append an ascending ordering
    #[must_use]
    pub fn order_by_asc(mut self, field: &str) -> Self {
        self.orders.push(Order {
            field: field.to_string(),
            descending: false,
        });
        self
    }

    /// Append a descending ordering
    #[must_use]
    pub fn order_by_desc(mut self, field: &str) -> Self {
        self.orders.push(Order {
            field: field.to_string(),
            descending: true,
        });
        self
    }

    /// Set the maximum number of records to return
    #[must_use]
    pub fn set_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Set the number of records to skip
    #[must_use]
    pub fn set_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Reports whether the query has no conditions
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Validate every condition's operand shape
    pub fn validate(&self) -> Result<()> {
        self.conditions.iter().try_for_each(Condition::validate)
    }

    /// Query with a single `eq` condition
    pub fn eq(field: &str, value: impl Into<Operand>) -> Self {
        Self::new().and_where(field, Operator::Eq, value)
    }

    /// Query with a single `ne` condition
    pub fn ne(field: &str, value: impl Into<Operand>) -> Self {
        Self::new().and_where(field, Operator::Ne, value)
    }

    /// Query with a single `gt` condition
    pub fn gt(field: &str, value: impl Into<Operand>) -> Self {
        Self::new().and_where(field, Operator::Gt, value)
    }

    /// Query with a single `ge` condition
    pub fn ge(field: &str, value: impl Into<Operand>) -> Self {
        Self::new().and_where(field, Operator::Ge, value)
    }

    /// Query with a single `lt` condition
    pub fn lt(field: &str, value: impl Into<Operand>) -> Self {
        Self::new().and_where(field, Operator::Lt, value)
    }

    /// Query with a single `le` condition
    pub fn le(field: &str, value: impl Into<Operand>) -> Self {
        Self::new().and_where(field, Operator::Le, value)
    }

    /// Query with a single `in` condition
    pub fn in_list<I, V>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        let values: Vec<DatabaseValue> = values.into_iter().map(Into::into).collect();
        Self::new().and_where(field, Operator::In, values)
    }

    /// Query with a single `like` condition
    pub fn like(field: &str, pattern: &str) -> Self {
        Self::new().and_where(field, Operator::Like, pattern)
    }

    /// Query with a single `prefix` condition
    pub fn prefix(field: &str, prefix: &str) -> Self {
        Self::new().and_where(field, Operator::Prefix, prefix)
    }

    /// Query with a single `is_null` condition
    pub fn is_null(field: &str) -> Self {
        Self::new().and_where(field, Operator::IsNull, ())
    }

    /// Query with a single `not_null` condition
    pub fn not_null(field: &str) -> Self {
        Self::new().and_where(field, Operator::NotNull, ())
    }
}

/// Absent and empty queries both match everything
pub fn is_empty(query: Option<&Query>) -> bool {
    query.map_or(true, Query::is_empty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query() {
        assert!(Query::default().is_empty());
        assert!(is_empty(None));
        assert!(is_empty(Some(&Query::new().order_by_asc("Name").set_limit(3))));

        let query = Query::new().and_where("Name", Operator::Eq, "test");
        assert!(!query.is_empty());
        assert!(!is_empty(Some(&query)));
    }

    #[test]
    fn test_chaining_records_combinators_in_order() {
        let query = Query::new()
            .and_where("Age", Operator::Gt, 20)
            .or_where("Name", Operator::Eq, "Bob")
            .and_where("Email", Operator::NotNull, ());

        let combinators: Vec<Combinator> =
            query.conditions.iter().map(|c| c.combinator).collect();
        assert_eq!(
            combinators,
            vec![Combinator::And, Combinator::Or, Combinator::And]
        );
        assert_eq!(query.conditions[1].value, Operand::Value("Bob".into()));
    }

    #[test]
    fn test_shorthand_constructors() {
        let q = Query::eq("Name", "Alice");
        assert_eq!(q.conditions.len(), 1);
        assert_eq!(q.conditions[0].operator, Operator::Eq);

        let q = Query::in_list("Age", [25, 30]);
        assert_eq!(
            q.conditions[0].value,
            Operand::List(vec![DatabaseValue::Int(25), DatabaseValue::Int(30)])
        );

        assert_eq!(Query::like("Name", "A%").conditions[0].operator, Operator::Like);
        assert_eq!(Query::ne("Name", "x").conditions[0].operator, Operator::Ne);
        assert_eq!(Query::gt("Age", 1).conditions[0].operator, Operator::Gt);
        assert_eq!(Query::lt("Age", 1).conditions[0].operator, Operator::Lt);
    }

    #[test]
    fn test_ordering_and_pagination() {
        let q = Query::new()
            .order_by_asc("Name")
            .order_by_desc("Age")
            .set_limit(5)
            .set_offset(10);
        assert_eq!(q.orders.len(), 2);
        assert!(!q.orders[0].descending);
        assert!(q.orders[1].descending);
        assert_eq!((q.limit, q.offset), (5, 10));
    }

    #[test]
    fn test_operator_names_roundtrip() {
        for op in Operator::ALL {
            assert_eq!(op.as_str().parse::<Operator>().unwrap(), op);
        }
        assert!("between".parse::<Operator>().is_err());
    }

    #[test]
    fn test_condition_validation() {
        assert!(Query::eq("Name", "x").validate().is_ok());
        assert!(Query::is_null("Email").validate().is_ok());
        assert!(Query::in_list("Age", [1, 2]).validate().is_ok());

        let bad = Query::new().and_where("Age", Operator::In, 3);
        assert!(matches!(bad.validate(), Err(DatabaseError::InvalidQuery(_))));

        let bad = Query::new().and_where("Age", Operator::Eq, ());
        assert!(bad.validate().is_err());

        let bad = Query::new().and_where("Name", Operator::Like, 4);
        assert!(bad.validate().is_err());

        let bad = Query::new().and_where("Name", Operator::Eq, DatabaseValue::Null);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_bind_coerces_operands() {
        let age = FieldDef::new("Age", FieldType::Integer).column("age_years");
        let bound = Query::eq("age_years", " 42 ").conditions[0].bind(&age).unwrap();
        assert_eq!(bound.field, "Age");
        assert_eq!(bound.value, Operand::Value(DatabaseValue::Long(42)));

        let bound = Query::in_list("Age", ["1", "2.5"]).conditions[0]
            .bind(&age)
            .unwrap();
        assert_eq!(
            bound.value,
            Operand::List(vec![DatabaseValue::Long(1), DatabaseValue::Double(2.5)])
        );

        let name = FieldDef::new("Name", FieldType::Text);
        let bound = Query::eq("Name", 7).conditions[0].bind(&name).unwrap();
        assert_eq!(bound.value, Operand::Value("7".into()));
        assert!(Query::eq("Name", 1.5).conditions[0].bind(&name).is_err());

        let flag = FieldDef::new("Active", FieldType::Bool);
        let bound = Query::eq("Active", "TRUE").conditions[0].bind(&flag).unwrap();
        assert_eq!(bound.value, Operand::Value(DatabaseValue::Bool(true)));

        let blob = FieldDef::new("Data", FieldType::Bytes);
        assert!(matches!(
            Query::eq("Data", "x").conditions[0].bind(&blob),
            Err(DatabaseError::InvalidQuery(_))
        ));
        assert!(Query::like("Age", "4%").conditions[0].bind(&age).is_err());
    }

    #[test]
    fn test_query_serde() {
        let query = Query::eq("Name", "Bob").or_where("Age", Operator::Ge, 40);
        let json = serde_json::to_string(&query).unwrap();
        assert!(json.contains("\"ge\""));
        let back: Query = serde_json::from_str(&json).unwrap();
        assert_eq!(back, query);
    }
}
