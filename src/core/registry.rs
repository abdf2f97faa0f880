//! Driver registry
//!
//! Backends register a [`Factory`] under a driver name, normally once at
//! start-up via [`register_builtin_drivers`](crate::backends::register_builtin_drivers).
//! [`open`] looks the factory up by [`Config::driver`] and runs it.
//!
//! Registration is rare and lookups are frequent, so the table sits behind a
//! reader-writer lock. The lock is released before a factory runs, which
//! means a slow connect never blocks other opens or registrations.

use super::config::Config;
use super::database::{BoxFuture, Database};
use super::error::{DatabaseError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

/// Builds a database handle from a configuration
pub type Factory =
    Arc<dyn Fn(Config) -> BoxFuture<'static, Result<Box<dyn Database>>> + Send + Sync>;

/// Name to factory table
#[derive(Default)]
pub struct Registry {
    drivers: RwLock<HashMap<String, Factory>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`
    ///
    /// # Panics
    ///
    /// Panics if `name` is empty or already registered. Registration happens
    /// during initialization, where a clash is a programming error.
    pub fn register<F, Fut>(&self, name: &str, factory: F)
    where
        F: Fn(Config) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Box<dyn Database>>> + Send + 'static,
    {
        let factory: Factory = Arc::new(
            move |config: Config| -> BoxFuture<'static, Result<Box<dyn Database>>> {
                Box::pin(factory(config))
            },
        );
        self.register_factory(name, factory);
    }

    /// Register an already boxed factory
    ///
    /// # Panics
    ///
    /// Same conditions as [`register`](Self::register).
    pub fn register_factory(&self, name: &str, factory: Factory) {
        if name.is_empty() {
            panic!("dbase: register called with an empty driver name");
        }
        let mut drivers = self.drivers.write();
        if drivers.contains_key(name) {
            panic!("dbase: register called twice for driver {:?}", name);
        }
        drivers.insert(name.to_string(), factory);
        info!(driver = name, "registered database driver");
    }

    /// Whether a driver is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.drivers.read().contains_key(name)
    }

    /// Sorted names of all registered drivers
    pub fn drivers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Open a database with the factory registered for `config.driver`
    ///
    /// Errors from the factory are returned unchanged. An unregistered name
    /// yields [`DatabaseError::UnknownDriver`] without running any factory.
    pub async fn open(&self, config: &Config) -> Result<Box<dyn Database>> {
        config.validate()?;
        let factory = self
            .drivers
            .read()
            .get(&config.driver)
            .cloned()
            .ok_or_else(|| DatabaseError::unknown_driver(&config.driver))?;

        debug!(driver = %config.driver, "opening database");
        let db = factory(config.clone()).await?;
        info!(driver = db.driver(), "database opened");
        Ok(db)
    }

    /// Like [`open`](Self::open), panicking on failure
    ///
    /// For start-up code where a database that cannot be opened is fatal.
    pub async fn must_open(&self, config: &Config) -> Box<dyn Database> {
        match self.open(config).await {
            Ok(db) => db,
            Err(e) => panic!("dbase: open {:?}: {}", config.driver, e),
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("drivers", &self.drivers())
            .finish()
    }
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// The process-wide registry
pub fn global() -> &'static Registry {
    GLOBAL.get_or_init(Registry::new)
}

/// Register a driver in the process-wide registry
///
/// # Panics
///
/// Panics if `name` is empty or already registered.
pub fn register<F, Fut>(name: &str, factory: F)
where
    F: Fn(Config) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Box<dyn Database>>> + Send + 'static,
{
    global().register(name, factory);
}

/// Sorted names of the drivers in the process-wide registry
pub fn drivers() -> Vec<String> {
    global().drivers()
}

/// Open a database through the process-wide registry
pub async fn open(config: &Config) -> Result<Box<dyn Database>> {
    global().open(config).await
}

/// Open a database through the process-wide registry, panicking on failure
pub async fn must_open(config: &Config) -> Box<dyn Database> {
    global().must_open(config).await
}
