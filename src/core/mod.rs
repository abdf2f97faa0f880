//! Backend-agnostic building blocks
//!
//! Everything a caller or a backend needs to speak the database contract:
//! values, queries, models and hooks, errors, configuration and the driver
//! registry.

pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod filter;
pub mod hooks;
pub mod model;
pub mod query;
pub mod registry;
pub mod value;

// Re-export commonly used types
pub use config::{Config, PoolSettings};
pub use context::Context;
pub use database::{BoxFuture, Database, DatabaseExt, TxFn};
pub use error::{is_already_exists, is_not_found, DatabaseError, ErrorKind, Result, ResultExt};
pub use hooks::Hooks;
pub use model::{FieldDef, FieldType, Model, ModelSchema, Record, RecordExt};
pub use query::{Combinator, Condition, Operand, Operator, Order, Query};
pub use registry::{Factory, Registry};
pub use value::DatabaseValue;
