//! # dbase
//!
//! A driver-abstraction layer that puts SQL and embedded key-value storage
//! behind one async contract. Callers describe their data as [`Model`]s,
//! build backend-neutral [`Query`] values, and get a `Box<dyn Database>`
//! from a driver registry keyed by name.
//!
//! ## Features
//!
//! - **One contract**: CRUD, queries, transactions and migration through the
//!   object-safe [`Database`] trait
//! - **Portable queries**: conditions fold left to right with the same
//!   result on every backend
//! - **Lifecycle hooks**: models opt into before/after callbacks
//! - **Classified errors**: `NotFound`, `AlreadyExists` and friends survive
//!   any amount of wrapping
//! - **Async**: built on Tokio
//!
//! ## Drivers
//!
//! | Driver   | Feature  | Storage                                   |
//! |----------|----------|-------------------------------------------|
//! | `sqlite` | `sqlite` | SQLite through a deadpool connection pool |
//! | `redb`   | `redb`   | Embedded redb key-value store             |
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! dbase = { version = "0.1", features = ["sqlite"] }
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ```rust,no_run
//! use dbase::prelude::*;
//!
//! #[derive(Default)]
//! struct User {
//!     id: i64,
//!     name: String,
//! }
//!
//! impl Hooks for User {}
//!
//! impl Model for User {
//!     fn schema(&self) -> ModelSchema {
//!         ModelSchema::new("users")
//!             .field(FieldDef::new("ID", FieldType::Integer).primary_key().auto_increment())
//!             .field(FieldDef::new("Name", FieldType::Text).indexed())
//!     }
//!     fn primary_key(&self) -> DatabaseValue {
//!         self.id.into()
//!     }
//!     fn set_primary_key(&mut self, id: DatabaseValue) -> Result<()> {
//!         self.id = id.as_long().unwrap_or_default();
//!         Ok(())
//!     }
//!     fn to_record(&self) -> Record {
//!         Record::from([
//!             ("ID".to_string(), self.id.into()),
//!             ("Name".to_string(), self.name.clone().into()),
//!         ])
//!     }
//!     fn load(&mut self, record: &Record) -> Result<()> {
//!         self.id = record.long("ID")?;
//!         self.name = record.string("Name")?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     dbase::backends::register_builtin_drivers();
//!
//!     let db = dbase::open(&Config::new("sqlite").with_path("app.db")).await?;
//!     let ctx = Context::background();
//!     db.migrate_models::<User>(&ctx).await?;
//!
//!     let mut alice = User { id: 0, name: "Alice".into() };
//!     db.create(&ctx, &mut alice).await?;
//!
//!     let found: Vec<User> = db.find_as(&ctx, Some(&Query::prefix("Name", "Al"))).await?;
//!     assert_eq!(found.len(), 1);
//!
//!     match db.get_as::<User>(&ctx, &DatabaseValue::Long(99)).await {
//!         Err(e) if e.is_not_found() => println!("no user 99"),
//!         other => println!("{:?}", other.map(|u| u.name)),
//!     }
//!
//!     db.close().await
//! }
//! ```

/// Core contract types and traits
pub mod core;

/// Driver implementations
pub mod backends;

/// Prelude for convenient imports
///
/// ```rust
/// use dbase::prelude::*;
///
/// let query = Query::eq("Name", "Alice").set_limit(1);
/// assert!(!query.is_empty());
/// ```
pub mod prelude {
    pub use crate::core::model::RecordExt;
    pub use crate::core::{
        Config, Context, Database, DatabaseError, DatabaseExt, DatabaseValue, ErrorKind,
        FieldDef, FieldType, Hooks, Model, ModelSchema, Operator, Query, Record, Result,
    };
}

// Re-export at root level for convenience
pub use crate::core::registry::{drivers, must_open, open, register, Factory, Registry};
pub use crate::core::{
    is_already_exists, is_not_found, BoxFuture, Config, Context, Database, DatabaseError,
    DatabaseExt, DatabaseValue, ErrorKind, FieldDef, FieldType, Hooks, Model, ModelSchema,
    Operator, PoolSettings, Query, Record, RecordExt, Result, TxFn,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_imports() {
        use prelude::*;

        let query = Query::eq("Name", "Alice").and_where("Age", Operator::Gt, 30);
        assert_eq!(query.conditions.len(), 2);
        assert!(DatabaseError::NotFound.is(ErrorKind::NotFound));
    }

    #[test]
    fn test_value_conversions() {
        let val: DatabaseValue = 42.into();
        assert_eq!(val.as_long(), Some(42));

        let val: DatabaseValue = "test".into();
        assert_eq!(val.as_str(), Some("test"));

        let val: DatabaseValue = true.into();
        assert_eq!(val.as_bool(), Some(true));
    }
}
