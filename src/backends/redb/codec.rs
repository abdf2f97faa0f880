//! Key and record encoding for the redb driver
//!
//! Keys must sort like the values they encode so that a table scan returns
//! records in primary-key order:
//!
//! * integers: tag `0x01`, then the big-endian bytes with the sign bit
//!   flipped, so negative numbers sort before positive ones
//! * text: tag `0x02`, then the UTF-8 bytes
//! * bytes: tag `0x03`, then the raw bytes
//!
//! Records are stored as JSON maps of logical field name to value.

use crate::core::error::{DatabaseError, Result};
use crate::core::model::{FieldDef, FieldType, ModelSchema, Record};
use crate::core::value::DatabaseValue;

const TAG_INT: u8 = 0x01;
const TAG_TEXT: u8 = 0x02;
const TAG_BYTES: u8 = 0x03;

/// Encode a primary key value for `field`
pub fn encode_key(field: &FieldDef, value: &DatabaseValue) -> Result<Vec<u8>> {
    let unsupported = || {
        DatabaseError::invalid_model(format!(
            "primary key '{}' cannot hold a {} value",
            field.name,
            value.type_name()
        ))
    };
    match field.kind {
        FieldType::Integer | FieldType::Timestamp | FieldType::Bool => {
            let v = value.as_long().ok_or_else(unsupported)?;
            let mut out = Vec::with_capacity(9);
            out.push(TAG_INT);
            out.extend_from_slice(&((v as u64) ^ (1 << 63)).to_be_bytes());
            Ok(out)
        }
        FieldType::Text => {
            let v = value.as_str().ok_or_else(unsupported)?;
            let mut out = Vec::with_capacity(v.len() + 1);
            out.push(TAG_TEXT);
            out.extend_from_slice(v.as_bytes());
            Ok(out)
        }
        FieldType::Bytes => {
            let v = value.as_bytes().ok_or_else(unsupported)?;
            let mut out = Vec::with_capacity(v.len() + 1);
            out.push(TAG_BYTES);
            out.extend_from_slice(v);
            Ok(out)
        }
        FieldType::Real => Err(unsupported()),
    }
}

/// Decode an integer key produced by [`encode_key`]
pub fn decode_int_key(bytes: &[u8]) -> Option<i64> {
    match bytes {
        [TAG_INT, rest @ ..] if rest.len() == 8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(rest);
            Some((u64::from_be_bytes(buf) ^ (1 << 63)) as i64)
        }
        _ => None,
    }
}

/// Coerce a value to the canonical variant for a field type
///
/// Values that cannot be coerced are kept as they are.
pub fn normalize(kind: FieldType, value: DatabaseValue) -> DatabaseValue {
    if value.is_null() {
        return value;
    }
    let coerced = match kind {
        FieldType::Integer => value.as_long().map(DatabaseValue::Long),
        FieldType::Real => value.as_double().map(DatabaseValue::Double),
        FieldType::Bool => value.as_bool().map(DatabaseValue::Bool),
        FieldType::Timestamp => match &value {
            DatabaseValue::Timestamp(_) => None,
            other => other
                .as_datetime()
                .map(|dt| DatabaseValue::Timestamp(dt.timestamp_micros())),
        },
        FieldType::Text | FieldType::Bytes => None,
    };
    coerced.unwrap_or(value)
}

/// Normalize every field of a record in place
pub fn normalize_record(schema: &ModelSchema, record: &mut Record) {
    for field in schema.fields() {
        if let Some(value) = record.remove(&field.name) {
            record.insert(field.name.clone(), normalize(field.kind, value));
        }
    }
}

/// Serialize a record
pub fn encode_record(record: &Record) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(record)?)
}

/// Deserialize a record
pub fn decode_record(bytes: &[u8]) -> Result<Record> {
    Ok(serde_json::from_slice(bytes)?)
}
