//! SQL generation for the SQLite driver
//!
//! Every statement uses quoted identifiers and bound parameters; values never
//! appear in SQL text. Field names are resolved through the model schema, so
//! a query may use logical names or column names interchangeably.

use crate::core::error::Result;
use crate::core::model::{FieldDef, FieldType, ModelSchema, Record, RecordExt};
use crate::core::query::{Combinator, Condition, Operand, Operator, Query};
use crate::core::value::DatabaseValue;
use rusqlite::types::{Value, ValueRef};

/// SQL text plus its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL with `?` placeholders
    pub sql: String,
    /// Parameters in placeholder order
    pub params: Vec<Value>,
}

/// Quote an identifier, doubling embedded quotes
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Column type for a field
pub fn column_type(kind: FieldType) -> &'static str {
    match kind {
        FieldType::Integer | FieldType::Bool | FieldType::Timestamp => "INTEGER",
        FieldType::Real => "REAL",
        FieldType::Text => "TEXT",
        FieldType::Bytes => "BLOB",
    }
}

/// Convert a value to an owned SQLite parameter
pub fn to_sql(value: &DatabaseValue) -> Value {
    match value {
        DatabaseValue::Null => Value::Null,
        DatabaseValue::Bool(v) => Value::Integer(i64::from(*v)),
        DatabaseValue::Int(v) => Value::Integer(i64::from(*v)),
        DatabaseValue::Long(v) | DatabaseValue::Timestamp(v) => Value::Integer(*v),
        DatabaseValue::Float(v) => Value::Real(f64::from(*v)),
        DatabaseValue::Double(v) => Value::Real(*v),
        DatabaseValue::String(v) => Value::Text(v.clone()),
        DatabaseValue::Bytes(v) => Value::Blob(v.clone()),
    }
}

/// Convert a column value back, guided by the declared field type
pub fn from_sql(value: ValueRef<'_>, kind: FieldType) -> DatabaseValue {
    match (value, kind) {
        (ValueRef::Null, _) => DatabaseValue::Null,
        (ValueRef::Integer(v), FieldType::Bool) => DatabaseValue::Bool(v != 0),
        (ValueRef::Integer(v), FieldType::Timestamp) => DatabaseValue::Timestamp(v),
        (ValueRef::Integer(v), FieldType::Real) => DatabaseValue::Double(v as f64),
        (ValueRef::Integer(v), _) => DatabaseValue::Long(v),
        (ValueRef::Real(v), _) => DatabaseValue::Double(v),
        (ValueRef::Text(v), FieldType::Bytes) => DatabaseValue::Bytes(v.to_vec()),
        (ValueRef::Text(v), _) => DatabaseValue::String(String::from_utf8_lossy(v).into_owned()),
        (ValueRef::Blob(v), _) => DatabaseValue::Bytes(v.to_vec()),
    }
}

/// Read one result row into a record, columns in schema order
pub fn read_record(row: &rusqlite::Row<'_>, fields: &[FieldDef]) -> rusqlite::Result<Record> {
    let mut record = Record::with_capacity(fields.len());
    for (i, field) in fields.iter().enumerate() {
        record.insert(field.name.clone(), from_sql(row.get_ref(i)?, field.kind));
    }
    Ok(record)
}

fn column_list(schema: &ModelSchema) -> String {
    schema
        .fields()
        .iter()
        .map(|f| quote(&f.column))
        .collect::<Vec<_>>()
        .join(", ")
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Render one condition, pushing its parameters
fn condition_sql(condition: &Condition, column: &str, params: &mut Vec<Value>) -> String {
    let column = quote(column);
    let mut bind = |value: &DatabaseValue| {
        params.push(to_sql(value));
        "?"
    };
    match (&condition.operator, &condition.value) {
        (Operator::IsNull, _) => format!("{} IS NULL", column),
        (Operator::NotNull, _) => format!("{} IS NOT NULL", column),
        (Operator::In, Operand::List(values)) if values.is_empty() => "0".to_string(),
        (Operator::NotIn, Operand::List(values)) if values.is_empty() => {
            format!("{} IS NOT NULL", column)
        }
        (Operator::In | Operator::NotIn, Operand::List(values)) => {
            let marks: Vec<&str> = values.iter().map(&mut bind).collect();
            let op = if condition.operator == Operator::In {
                "IN"
            } else {
                "NOT IN"
            };
            format!("{} {} ({})", column, op, marks.join(", "))
        }
        (Operator::Prefix, Operand::Value(value)) => {
            let prefix = value.as_str().unwrap_or_default();
            bind(&DatabaseValue::Long(prefix.chars().count() as i64));
            bind(value);
            format!("substr({}, 1, ?) = ?", column)
        }
        (op, Operand::Value(value)) => {
            let symbol = match op {
                Operator::Eq => "=",
                Operator::Ne => "<>",
                Operator::Gt => ">",
                Operator::Ge => ">=",
                Operator::Lt => "<",
                Operator::Le => "<=",
                Operator::Like => "LIKE",
                _ => return "0".to_string(),
            };
            format!("{} {} {}", column, symbol, bind(value))
        }
        // Shapes rejected by Query::validate; never true
        _ => "0".to_string(),
    }
}

/// WHERE clause folding conditions left to right, or an empty string
pub fn where_clause(
    schema: &ModelSchema,
    query: Option<&Query>,
    params: &mut Vec<Value>,
) -> Result<String> {
    let Some(query) = query.filter(|q| !q.is_empty()) else {
        return Ok(String::new());
    };
    query.validate()?;
    let mut acc = String::new();
    for (i, condition) in query.conditions.iter().enumerate() {
        let field = schema.resolve(&condition.field)?;
        let sql = condition_sql(&condition.bind(field)?, &field.column, params);
        if i == 0 {
            acc = sql;
        } else {
            let joiner = match condition.combinator {
                Combinator::And => "AND",
                Combinator::Or => "OR",
            };
            acc = format!("({} {} {})", acc, joiner, sql);
        }
    }
    Ok(format!(" WHERE {}", acc))
}

fn order_clause(schema: &ModelSchema, query: &Query) -> Result<String> {
    if query.orders.is_empty() {
        return Ok(String::new());
    }
    let parts = query
        .orders
        .iter()
        .map(|o| {
            let field = schema.resolve(&o.field)?;
            let dir = if o.descending { "DESC" } else { "ASC" };
            Ok(format!("{} {}", quote(&field.column), dir))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(format!(" ORDER BY {}", parts.join(", ")))
}

fn page_clause(limit: usize, offset: usize) -> String {
    match (limit, offset) {
        (0, 0) => String::new(),
        (0, offset) => format!(" LIMIT -1 OFFSET {}", offset),
        (limit, 0) => format!(" LIMIT {}", limit),
        (limit, offset) => format!(" LIMIT {} OFFSET {}", limit, offset),
    }
}

/// SELECT for `find`; `limit_override` caps the row count (used by `find_one`)
pub fn select(
    schema: &ModelSchema,
    query: Option<&Query>,
    limit_override: Option<usize>,
) -> Result<Statement> {
    let mut params = Vec::new();
    let mut sql = format!(
        "SELECT {} FROM {}",
        column_list(schema),
        quote(schema.table())
    );
    sql.push_str(&where_clause(schema, query, &mut params)?);
    if let Some(query) = query {
        sql.push_str(&order_clause(schema, query)?);
    }
    let limit = limit_override.unwrap_or_else(|| query.map_or(0, |q| q.limit));
    let offset = query.map_or(0, |q| q.offset);
    sql.push_str(&page_clause(limit, offset));
    Ok(Statement { sql, params })
}

/// SELECT COUNT(*), ignoring ordering and pagination
pub fn count(schema: &ModelSchema, query: Option<&Query>) -> Result<Statement> {
    let mut params = Vec::new();
    let mut sql = format!("SELECT COUNT(*) FROM {}", quote(schema.table()));
    sql.push_str(&where_clause(schema, query, &mut params)?);
    Ok(Statement { sql, params })
}

/// SELECT one row by primary key
pub fn select_by_key(schema: &ModelSchema, id: &DatabaseValue) -> Result<Statement> {
    let key = schema.primary_key()?;
    Ok(Statement {
        sql: format!(
            "SELECT {} FROM {} WHERE {} = ? LIMIT 1",
            column_list(schema),
            quote(schema.table()),
            quote(&key.column)
        ),
        params: vec![to_sql(id)],
    })
}

/// INSERT, leaving the key column out when `assign_key` is set
pub fn insert(schema: &ModelSchema, record: &Record, assign_key: bool) -> Statement {
    let fields: Vec<&FieldDef> = schema
        .fields()
        .iter()
        .filter(|f| !(assign_key && f.primary_key))
        .collect();
    insert_fields(schema, record, &fields)
}

fn insert_fields(schema: &ModelSchema, record: &Record, fields: &[&FieldDef]) -> Statement {
    let sql = if fields.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", quote(schema.table()))
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(schema.table()),
            fields
                .iter()
                .map(|f| quote(&f.column))
                .collect::<Vec<_>>()
                .join(", "),
            placeholders(fields.len())
        )
    };
    let params = fields
        .iter()
        .map(|f| to_sql(record.value(&f.name)))
        .collect();
    Statement { sql, params }
}

/// INSERT ... ON CONFLICT(key) DO UPDATE for `save`
pub fn upsert(schema: &ModelSchema, record: &Record) -> Result<Statement> {
    let key = schema.primary_key()?;
    let fields: Vec<&FieldDef> = schema.fields().iter().collect();
    let mut statement = insert_fields(schema, record, &fields);
    let assignments: Vec<String> = schema
        .fields()
        .iter()
        .filter(|f| !f.primary_key)
        .map(|f| format!("{col} = excluded.{col}", col = quote(&f.column)))
        .collect();
    if assignments.is_empty() {
        statement
            .sql
            .push_str(&format!(" ON CONFLICT({}) DO NOTHING", quote(&key.column)));
    } else {
        statement.sql.push_str(&format!(
            " ON CONFLICT({}) DO UPDATE SET {}",
            quote(&key.column),
            assignments.join(", ")
        ));
    }
    Ok(statement)
}

/// UPDATE the given fields of the row keyed by the record's primary key
///
/// With no fields the key is assigned to itself, so the affected row count
/// still reports whether the row exists.
pub fn update(schema: &ModelSchema, record: &Record, fields: &[&FieldDef]) -> Result<Statement> {
    let key = schema.primary_key()?;
    let mut params: Vec<Value> = Vec::with_capacity(fields.len() + 1);
    let assignments = if fields.is_empty() {
        format!("{col} = {col}", col = quote(&key.column))
    } else {
        fields
            .iter()
            .map(|f| {
                params.push(to_sql(record.value(&f.name)));
                format!("{} = ?", quote(&f.column))
            })
            .collect::<Vec<_>>()
            .join(", ")
    };
    params.push(to_sql(record.value(&key.name)));
    Ok(Statement {
        sql: format!(
            "UPDATE {} SET {} WHERE {} = ?",
            quote(schema.table()),
            assignments,
            quote(&key.column)
        ),
        params,
    })
}

/// DELETE by primary key
pub fn delete(schema: &ModelSchema, id: &DatabaseValue) -> Result<Statement> {
    let key = schema.primary_key()?;
    Ok(Statement {
        sql: format!(
            "DELETE FROM {} WHERE {} = ?",
            quote(schema.table()),
            quote(&key.column)
        ),
        params: vec![to_sql(id)],
    })
}

/// CREATE TABLE IF NOT EXISTS
///
/// Uniqueness is enforced by indexes from [`create_indexes`] so that it can
/// be added to tables that already exist.
pub fn create_table(schema: &ModelSchema) -> String {
    let columns: Vec<String> = schema
        .fields()
        .iter()
        .map(|f| {
            let mut def = format!("{} {}", quote(&f.column), column_type(f.kind));
            if f.primary_key {
                def.push_str(" PRIMARY KEY");
                if f.auto_increment {
                    def.push_str(" AUTOINCREMENT");
                }
            }
            def
        })
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(schema.table()),
        columns.join(", ")
    )
}

/// ALTER TABLE ADD COLUMN for a field missing from an existing table
pub fn add_column(schema: &ModelSchema, field: &FieldDef) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote(schema.table()),
        quote(&field.column),
        column_type(field.kind)
    )
}

/// CREATE [UNIQUE] INDEX IF NOT EXISTS for unique and indexed fields
pub fn create_indexes(schema: &ModelSchema) -> Vec<String> {
    schema
        .fields()
        .iter()
        .filter(|f| !f.primary_key && (f.unique || f.indexed))
        .map(|f| {
            let (kind, prefix) = if f.unique {
                ("UNIQUE INDEX", "uidx")
            } else {
                ("INDEX", "idx")
            };
            format!(
                "CREATE {} IF NOT EXISTS {} ON {} ({})",
                kind,
                quote(&format!("{}_{}_{}", prefix, schema.table(), f.column)),
                quote(schema.table()),
                quote(&f.column)
            )
        })
        .collect()
}

/// Query the column names of an existing table
pub fn table_info(schema: &ModelSchema) -> String {
    format!("PRAGMA table_info({})", quote(schema.table()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ModelSchema {
        ModelSchema::new("users")
            .field(
                FieldDef::new("ID", FieldType::Integer)
                    .primary_key()
                    .auto_increment(),
            )
            .field(FieldDef::new("Name", FieldType::Text).indexed())
            .field(FieldDef::new("Email", FieldType::Text).unique())
            .field(FieldDef::new("Age", FieldType::Integer).nullable())
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("name"), "\"name\"");
        assert_eq!(quote("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_where_left_fold() {
        let q = Query::eq("Name", "Alice")
            .and_where("Age", Operator::Gt, 30)
            .or_where("Email", Operator::Like, "%@example.com");
        let mut params = Vec::new();
        let sql = where_clause(&schema(), Some(&q), &mut params).unwrap();
        assert_eq!(
            sql,
            " WHERE ((\"name\" = ? AND \"age\" > ?) OR \"email\" LIKE ?)"
        );
        assert_eq!(
            params,
            vec![
                Value::Text("Alice".into()),
                Value::Integer(30),
                Value::Text("%@example.com".into())
            ]
        );
    }

    #[test]
    fn test_empty_query_has_no_where() {
        let mut params = Vec::new();
        assert_eq!(where_clause(&schema(), None, &mut params).unwrap(), "");
        assert_eq!(
            where_clause(&schema(), Some(&Query::new()), &mut params).unwrap(),
            ""
        );
        assert!(params.is_empty());
    }

    #[test]
    fn test_list_and_null_operators() {
        let mut params = Vec::new();
        let q = Query::in_list("Age", [1, 2])
            .and_where("Age", Operator::NotIn, Vec::<DatabaseValue>::new())
            .or_where("Name", Operator::IsNull, ());
        let sql = where_clause(&schema(), Some(&q), &mut params).unwrap();
        assert_eq!(
            sql,
            " WHERE ((\"age\" IN (?, ?) AND \"age\" IS NOT NULL) OR \"name\" IS NULL)"
        );
        assert_eq!(params.len(), 2);

        let mut params = Vec::new();
        let q = Query::in_list("Age", Vec::<i64>::new());
        assert_eq!(
            where_clause(&schema(), Some(&q), &mut params).unwrap(),
            " WHERE 0"
        );
    }

    #[test]
    fn test_prefix_uses_substr() {
        let mut params = Vec::new();
        let q = Query::prefix("Name", "Al");
        let sql = where_clause(&schema(), Some(&q), &mut params).unwrap();
        assert_eq!(sql, " WHERE substr(\"name\", 1, ?) = ?");
        assert_eq!(params, vec![Value::Integer(2), Value::Text("Al".into())]);
    }

    #[test]
    fn test_select_pagination() {
        let q = Query::new().order_by_desc("Age").order_by_asc("Name").set_offset(5);
        let stmt = select(&schema(), Some(&q), None).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT \"id\", \"name\", \"email\", \"age\" FROM \"users\" \
             ORDER BY \"age\" DESC, \"name\" ASC LIMIT -1 OFFSET 5"
        );

        let q = Query::new().set_limit(10).set_offset(20);
        let stmt = select(&schema(), Some(&q), Some(1)).unwrap();
        assert!(stmt.sql.ends_with("LIMIT 1 OFFSET 20"));
    }

    #[test]
    fn test_count_ignores_pagination() {
        let q = Query::gt("Age", 18).order_by_asc("Name").set_limit(3);
        let stmt = count(&schema(), Some(&q)).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) FROM \"users\" WHERE \"age\" > ?"
        );
    }

    #[test]
    fn test_operands_bound_to_field_type() {
        let mut params = Vec::new();
        let q = Query::eq("Age", "30")
            .or_where("Name", Operator::Eq, 7)
            .or_where("Age", Operator::NotIn, vec![DatabaseValue::Int(25), DatabaseValue::Null]);
        where_clause(&schema(), Some(&q), &mut params).unwrap();
        assert_eq!(
            params,
            vec![
                Value::Integer(30),
                Value::Text("7".into()),
                Value::Integer(25),
                Value::Null
            ]
        );

        let mut params = Vec::new();
        let q = Query::eq("Age", "thirty");
        let err = where_clause(&schema(), Some(&q), &mut params).unwrap_err();
        assert!(matches!(err, crate::core::error::DatabaseError::InvalidQuery(_)));
        let q = Query::like("Age", "3%");
        assert!(where_clause(&schema(), Some(&q), &mut params).is_err());
    }

    #[test]
    fn test_unknown_field_fails() {
        let q = Query::eq("Nickname", "x");
        let err = select(&schema(), Some(&q), None).unwrap_err();
        assert!(err.is(crate::core::error::ErrorKind::InvalidModel));
    }

    #[test]
    fn test_write_statements() {
        let record = Record::from([
            ("ID".to_string(), DatabaseValue::Long(7)),
            ("Name".to_string(), DatabaseValue::from("Ann")),
            ("Email".to_string(), DatabaseValue::from("ann@example.com")),
            ("Age".to_string(), DatabaseValue::Null),
        ]);

        let stmt = insert(&schema(), &record, true);
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"users\" (\"name\", \"email\", \"age\") VALUES (?, ?, ?)"
        );

        let stmt = upsert(&schema(), &record).unwrap();
        assert!(stmt.sql.contains("ON CONFLICT(\"id\") DO UPDATE SET \"name\" = excluded.\"name\""));
        assert_eq!(stmt.params.len(), 4);

        let name = schema().resolve("Name").unwrap().clone();
        let stmt = update(&schema(), &record, &[&name]).unwrap();
        assert_eq!(stmt.sql, "UPDATE \"users\" SET \"name\" = ? WHERE \"id\" = ?");
        assert_eq!(stmt.params, vec![Value::Text("Ann".into()), Value::Integer(7)]);

        let stmt = delete(&schema(), &DatabaseValue::Long(7)).unwrap();
        assert_eq!(stmt.sql, "DELETE FROM \"users\" WHERE \"id\" = ?");
    }

    #[test]
    fn test_ddl() {
        assert_eq!(
            create_table(&schema()),
            "CREATE TABLE IF NOT EXISTS \"users\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
             \"name\" TEXT, \"email\" TEXT, \"age\" INTEGER)"
        );
        let indexes = create_indexes(&schema());
        assert_eq!(indexes.len(), 2);
        assert!(indexes[0].starts_with("CREATE INDEX IF NOT EXISTS \"idx_users_name\""));
        assert!(indexes[1].starts_with("CREATE UNIQUE INDEX IF NOT EXISTS \"uidx_users_email\""));
    }

    #[test]
    fn test_value_conversion() {
        assert_eq!(to_sql(&DatabaseValue::Bool(true)), Value::Integer(1));
        assert_eq!(
            from_sql(ValueRef::Integer(0), FieldType::Bool),
            DatabaseValue::Bool(false)
        );
        assert_eq!(
            from_sql(ValueRef::Integer(5), FieldType::Timestamp),
            DatabaseValue::Timestamp(5)
        );
        assert_eq!(from_sql(ValueRef::Null, FieldType::Text), DatabaseValue::Null);
    }
}
