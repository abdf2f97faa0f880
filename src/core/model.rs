//! Models, schemas and records
//!
//! A model describes itself with a [`ModelSchema`] and converts to and from a
//! [`Record`], a map keyed by logical field names. Backends translate logical
//! names to their own columns or keys; they never see the model's Rust type.

use super::error::{DatabaseError, Result};
use super::hooks::Hooks;
use super::value::DatabaseValue;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A record keyed by logical field name
pub type Record = HashMap<String, DatabaseValue>;

/// Storage type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// 64-bit integer
    Integer,
    /// 64-bit float
    Real,
    /// UTF-8 text
    Text,
    /// Boolean
    Bool,
    /// Binary data
    Bytes,
    /// Microsecond Unix timestamp
    Timestamp,
}

/// One field of a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Logical name used in records and queries
    pub name: String,
    /// Storage name (SQL column)
    pub column: String,
    /// Storage type
    pub kind: FieldType,
    /// Part of the primary key
    #[serde(default)]
    pub primary_key: bool,
    /// Key assigned by the backend when left unset
    #[serde(default)]
    pub auto_increment: bool,
    /// Values must be unique across the table
    #[serde(default)]
    pub unique: bool,
    /// Backend should index this field
    #[serde(default)]
    pub indexed: bool,
    /// Null is an allowed value
    #[serde(default)]
    pub nullable: bool,
}

impl FieldDef {
    /// Create a field whose column is the snake_case form of `name`
    pub fn new(name: &str, kind: FieldType) -> Self {
        Self {
            name: name.to_string(),
            column: to_snake_case(name),
            kind,
            primary_key: false,
            auto_increment: false,
            unique: false,
            indexed: false,
            nullable: false,
        }
    }

    /// Override the storage column
    #[must_use]
    pub fn column(mut self, column: &str) -> Self {
        self.column = column.to_string();
        self
    }

    /// Mark as primary key
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Let the backend assign the key
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Enforce uniqueness
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Request an index
    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Allow null values
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Table name plus field definitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSchema {
    table: String,
    fields: Vec<FieldDef>,
}

impl ModelSchema {
    /// Start a schema for `table`
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            fields: Vec::new(),
        }
    }

    /// Add a field
    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Table (or bucket) name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// All fields in declaration order
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// The primary key field
    pub fn primary_key(&self) -> Result<&FieldDef> {
        self.fields.iter().find(|f| f.primary_key).ok_or_else(|| {
            DatabaseError::invalid_model(format!("model '{}' has no primary key", self.table))
        })
    }

    /// Look up a field by logical name, falling back to its column name
    pub fn resolve(&self, name: &str) -> Result<&FieldDef> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.fields.iter().find(|f| f.column == name))
            .ok_or_else(|| {
                DatabaseError::invalid_model(format!(
                    "unknown field '{}' on model '{}'",
                    name, self.table
                ))
            })
    }

    /// Check the schema is usable by a backend
    pub fn validate(&self) -> Result<()> {
        if self.table.is_empty() {
            return Err(DatabaseError::invalid_model("table name must not be empty"));
        }
        let keys = self.fields.iter().filter(|f| f.primary_key).count();
        if keys != 1 {
            return Err(DatabaseError::invalid_model(format!(
                "model '{}' must have exactly one primary key, found {}",
                self.table, keys
            )));
        }
        let mut names = HashSet::new();
        let mut columns = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() || field.column.is_empty() {
                return Err(DatabaseError::invalid_model(format!(
                    "model '{}' has a field with an empty name",
                    self.table
                )));
            }
            if !names.insert(field.name.as_str()) || !columns.insert(field.column.as_str()) {
                return Err(DatabaseError::invalid_model(format!(
                    "duplicate field '{}' on model '{}'",
                    field.name, self.table
                )));
            }
            if field.auto_increment && field.kind != FieldType::Integer {
                return Err(DatabaseError::invalid_model(format!(
                    "auto-increment field '{}' must be an integer",
                    field.name
                )));
            }
        }
        Ok(())
    }

    /// Reject records with unknown fields or nulls in non-nullable fields
    ///
    /// An auto-increment key may be left unset.
    pub fn check_record(&self, record: &Record) -> Result<()> {
        if let Some(unknown) = record.keys().find(|k| !self.fields.iter().any(|f| &f.name == *k)) {
            return Err(DatabaseError::invalid_model(format!(
                "record has unknown field '{}' for model '{}'",
                unknown, self.table
            )));
        }
        for field in &self.fields {
            let value = record.value(&field.name);
            if field.primary_key && field.auto_increment {
                continue;
            }
            if value.is_null() && !field.nullable {
                return Err(DatabaseError::invalid_model(format!(
                    "field '{}' of model '{}' must not be null",
                    field.name, self.table
                )));
            }
        }
        Ok(())
    }
}

/// A persistable type
///
/// Implementors describe their schema and convert to and from records. The
/// [`Hooks`] supertrait supplies no-op lifecycle callbacks unless overridden.
///
/// # Example
///
/// ```
/// use dbase::core::model::{FieldDef, FieldType, Model, ModelSchema, Record, RecordExt};
/// use dbase::core::hooks::Hooks;
/// use dbase::{DatabaseValue, Result};
///
/// #[derive(Default)]
/// struct Tag {
///     id: i64,
///     label: String,
/// }
///
/// impl Hooks for Tag {}
///
/// impl Model for Tag {
///     fn schema(&self) -> ModelSchema {
///         ModelSchema::new("tags")
///             .field(FieldDef::new("ID", FieldType::Integer).primary_key().auto_increment())
///             .field(FieldDef::new("Label", FieldType::Text).unique())
///     }
///
///     fn primary_key(&self) -> DatabaseValue {
///         self.id.into()
///     }
///
///     fn set_primary_key(&mut self, id: DatabaseValue) -> Result<()> {
///         self.id = id.as_long().unwrap_or_default();
///         Ok(())
///     }
///
///     fn to_record(&self) -> Record {
///         Record::from([
///             ("ID".to_string(), self.id.into()),
///             ("Label".to_string(), self.label.clone().into()),
///         ])
///     }
///
///     fn load(&mut self, record: &Record) -> Result<()> {
///         self.id = record.long("ID")?;
///         self.label = record.string("Label")?;
///         Ok(())
///     }
/// }
/// ```
pub trait Model: Hooks + Send + Sync {
    /// Schema of this model type
    fn schema(&self) -> ModelSchema;

    /// Current primary key value
    fn primary_key(&self) -> DatabaseValue;

    /// Store a backend-assigned primary key
    fn set_primary_key(&mut self, id: DatabaseValue) -> Result<()>;

    /// Convert to a record keyed by logical field name
    fn to_record(&self) -> Record;

    /// Overwrite this model's fields from a record
    fn load(&mut self, record: &Record) -> Result<()>;
}

/// Typed accessors for records
pub trait RecordExt {
    /// Raw value of a field; missing fields read as null
    fn value(&self, field: &str) -> &DatabaseValue;

    /// Field as i64
    fn long(&self, field: &str) -> Result<i64>;

    /// Field as i64, `None` when null
    fn opt_long(&self, field: &str) -> Result<Option<i64>>;

    /// Field as f64
    fn double(&self, field: &str) -> Result<f64>;

    /// Field as bool
    fn boolean(&self, field: &str) -> Result<bool>;

    /// Field as String
    fn string(&self, field: &str) -> Result<String>;

    /// Field as String, `None` when null
    fn opt_string(&self, field: &str) -> Result<Option<String>>;
}

static NULL: DatabaseValue = DatabaseValue::Null;

fn mismatch(field: &str, expected: &str, value: &DatabaseValue) -> DatabaseError {
    DatabaseError::invalid_model(format!(
        "field '{}': expected {}, got {}",
        field,
        expected,
        value.type_name()
    ))
}

impl RecordExt for Record {
    fn value(&self, field: &str) -> &DatabaseValue {
        self.get(field).unwrap_or(&NULL)
    }

    fn long(&self, field: &str) -> Result<i64> {
        let value = self.value(field);
        value.as_long().ok_or_else(|| mismatch(field, "integer", value))
    }

    fn opt_long(&self, field: &str) -> Result<Option<i64>> {
        match self.value(field) {
            DatabaseValue::Null => Ok(None),
            _ => self.long(field).map(Some),
        }
    }

    fn double(&self, field: &str) -> Result<f64> {
        let value = self.value(field);
        value.as_double().ok_or_else(|| mismatch(field, "real", value))
    }

    fn boolean(&self, field: &str) -> Result<bool> {
        let value = self.value(field);
        value.as_bool().ok_or_else(|| mismatch(field, "bool", value))
    }

    fn string(&self, field: &str) -> Result<String> {
        match self.value(field) {
            DatabaseValue::String(s) => Ok(s.clone()),
            other => Err(mismatch(field, "text", other)),
        }
    }

    fn opt_string(&self, field: &str) -> Result<Option<String>> {
        match self.value(field) {
            DatabaseValue::Null => Ok(None),
            _ => self.string(field).map(Some),
        }
    }
}

/// `CreatedAt` -> `created_at`, `ID` -> `id`, `userID` -> `user_id`
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev_lower = i > 0 && (chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit());
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let prev_upper = i > 0 && chars[i - 1].is_uppercase();
            if i > 0 && (prev_lower || (prev_upper && next_lower)) && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
