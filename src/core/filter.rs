//! In-memory query evaluation
//!
//! Backends without a native query language (the key-value adapter) load
//! records and run them through [`apply`]. Value semantics mirror SQLite so a
//! query returns the same rows on every backend: comparisons involving null
//! are false, `like` is ASCII case-insensitive, `prefix` is case-sensitive.

use super::error::Result;
use super::model::{ModelSchema, Record, RecordExt};
use super::query::{Combinator, Condition, Operand, Operator, Query};
use super::value::DatabaseValue;
use std::cmp::Ordering;

/// A query checked against a schema, with field names resolved
///
/// Resolving once up front means unknown fields and mistyped operands are
/// reported even when there are no records to test.
#[derive(Debug)]
pub struct CompiledQuery {
    conditions: Vec<Condition>,
    orders: Vec<(String, bool)>,
    limit: usize,
    offset: usize,
}

impl CompiledQuery {
    /// Resolve field names and bind operands to the field types
    pub fn compile(query: Option<&Query>, schema: &ModelSchema) -> Result<Self> {
        let Some(query) = query else {
            return Ok(Self {
                conditions: Vec::new(),
                orders: Vec::new(),
                limit: 0,
                offset: 0,
            });
        };
        query.validate()?;
        let conditions = query
            .conditions
            .iter()
            .map(|c| c.bind(schema.resolve(&c.field)?))
            .collect::<Result<Vec<_>>>()?;
        let orders = query
            .orders
            .iter()
            .map(|o| Ok((schema.resolve(&o.field)?.name.clone(), o.descending)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            conditions,
            orders,
            limit: query.limit,
            offset: query.offset,
        })
    }

    /// Left-fold the conditions over one record
    pub fn matches(&self, record: &Record) -> bool {
        let mut conditions = self.conditions.iter();
        let Some(first) = conditions.next() else {
            return true;
        };
        let mut acc = eval_condition(first, record.value(&first.field));
        for condition in conditions {
            let hit = eval_condition(condition, record.value(&condition.field));
            acc = match condition.combinator {
                Combinator::And => acc && hit,
                Combinator::Or => acc || hit,
            };
        }
        acc
    }

    /// Filter, sort, then paginate
    pub fn apply(&self, records: impl IntoIterator<Item = Record>) -> Vec<Record> {
        let mut rows: Vec<Record> = records.into_iter().filter(|r| self.matches(r)).collect();
        if !self.orders.is_empty() {
            rows.sort_by(|a, b| self.compare(a, b));
        }
        let rows = rows.into_iter().skip(self.offset);
        if self.limit > 0 {
            rows.take(self.limit).collect()
        } else {
            rows.collect()
        }
    }

    /// Number of matching records, ignoring ordering and pagination
    pub fn count<'r>(&self, records: impl IntoIterator<Item = &'r Record>) -> u64 {
        records.into_iter().filter(|r| self.matches(r)).count() as u64
    }

    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for (field, descending) in &self.orders {
            let ord = a.value(field).sort_cmp(b.value(field));
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// Evaluate `query` over `records` for `schema`
pub fn apply(
    query: Option<&Query>,
    schema: &ModelSchema,
    records: impl IntoIterator<Item = Record>,
) -> Result<Vec<Record>> {
    Ok(CompiledQuery::compile(query, schema)?.apply(records))
}

/// Check a single record against `query`
pub fn matches(query: Option<&Query>, schema: &ModelSchema, record: &Record) -> Result<bool> {
    Ok(CompiledQuery::compile(query, schema)?.matches(record))
}

fn eval_condition(condition: &Condition, value: &DatabaseValue) -> bool {
    let is = |expected: &[Ordering]| match &condition.value {
        Operand::Value(operand) => value
            .compare(operand)
            .is_some_and(|ord| expected.contains(&ord)),
        _ => false,
    };
    match condition.operator {
        Operator::Eq => is(&[Ordering::Equal]),
        Operator::Ne => is(&[Ordering::Less, Ordering::Greater]),
        Operator::Gt => is(&[Ordering::Greater]),
        Operator::Ge => is(&[Ordering::Greater, Ordering::Equal]),
        Operator::Lt => is(&[Ordering::Less]),
        Operator::Le => is(&[Ordering::Less, Ordering::Equal]),
        Operator::In => contains(condition, value),
        // A null in the list makes every non-member unknown
        Operator::NotIn => {
            let list = condition.value.as_list().unwrap_or_default();
            !value.is_null()
                && !list.iter().any(DatabaseValue::is_null)
                && !contains(condition, value)
        }
        Operator::Like => match (value.as_str(), condition.value.as_value()) {
            (Some(text), Some(pattern)) => pattern.as_str().is_some_and(|p| like_match(p, text)),
            _ => false,
        },
        Operator::Prefix => match (value.as_str(), condition.value.as_value()) {
            (Some(text), Some(prefix)) => prefix.as_str().is_some_and(|p| text.starts_with(p)),
            _ => false,
        },
        Operator::IsNull => value.is_null(),
        Operator::NotNull => !value.is_null(),
    }
}

fn contains(condition: &Condition, value: &DatabaseValue) -> bool {
    condition.value.as_list().is_some_and(|list| {
        list.iter()
            .any(|candidate| value.compare(candidate) == Some(Ordering::Equal))
    })
}

/// SQL LIKE: `%` matches any run, `_` one character, ASCII case-insensitive
pub fn like_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len()
            && (pattern[p] == '_' || pattern[p].eq_ignore_ascii_case(&text[t]))
        {
            p += 1;
            t += 1;
        } else if let Some((bp, bt)) = backtrack {
            p = bp + 1;
            t = bt + 1;
            backtrack = Some((bp, bt + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '%')
}
