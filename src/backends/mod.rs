//! Database backend implementations
//!
//! Each backend is compiled behind its Cargo feature and registered under its
//! driver name by [`register_builtin_drivers`].

#[cfg(feature = "redb")]
pub mod redb;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "redb")]
pub use self::redb::RedbDatabase;
#[cfg(feature = "sqlite")]
pub use self::sqlite::SqliteDatabase;

use std::sync::Once;

static BUILTIN: Once = Once::new();

/// Register every driver compiled into this build with the global registry
///
/// Safe to call any number of times; only the first call registers.
pub fn register_builtin_drivers() {
    BUILTIN.call_once(|| {
        #[cfg(feature = "sqlite")]
        crate::core::registry::register(sqlite::DRIVER, |config| async move {
            let db = SqliteDatabase::open(&config).await?;
            Ok::<_, crate::core::DatabaseError>(Box::new(db) as Box<dyn crate::core::Database>)
        });

        #[cfg(feature = "redb")]
        crate::core::registry::register(self::redb::DRIVER, |config| async move {
            let db = RedbDatabase::open(&config).await?;
            Ok::<_, crate::core::DatabaseError>(Box::new(db) as Box<dyn crate::core::Database>)
        });
    });
}
