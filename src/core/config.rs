//! Driver configuration
//!
//! A [`Config`] names the driver to use and carries everything its factory
//! needs. It is consumed once, when [`open`](super::registry::open) is called.
//!
//! ```
//! use dbase::Config;
//!
//! let config = Config::from_json_str(r#"{
//!     "type": "sqlite",
//!     "path": "./app.db",
//!     "pool": { "max_open_conns": 4, "conn_max_lifetime": 300 },
//!     "options": { "journal_mode": "WAL" }
//! }"#).unwrap();
//!
//! assert_eq!(config.driver, "sqlite");
//! assert_eq!(config.option_str("journal_mode"), Some("WAL"));
//! ```

use super::error::{DatabaseError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Database configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Registered driver name, e.g. `"sqlite"` or `"redb"`
    #[serde(rename = "type")]
    pub driver: String,

    /// File path for file-based backends
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,

    /// Data source name for network backends
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dsn: String,

    /// Connection pool settings (SQL backends only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolSettings>,

    /// Driver-specific options, passed through untouched
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub options: HashMap<String, serde_json::Value>,
}

/// Connection pool settings; zero or absent values keep the driver default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Maximum number of open connections
    #[serde(default)]
    pub max_open_conns: usize,

    /// Maximum number of idle connections
    #[serde(default)]
    pub max_idle_conns: usize,

    /// Maximum time a connection may be reused (seconds in JSON)
    #[serde(default, with = "opt_seconds", skip_serializing_if = "Option::is_none")]
    pub conn_max_lifetime: Option<Duration>,

    /// Maximum time a connection may sit idle (seconds in JSON)
    #[serde(default, with = "opt_seconds", skip_serializing_if = "Option::is_none")]
    pub conn_max_idle_time: Option<Duration>,
}

impl Config {
    /// Create a configuration for `driver`
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            ..Default::default()
        }
    }

    /// Parse a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Set the file path
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the data source name
    #[must_use]
    pub fn with_dsn(mut self, dsn: impl Into<String>) -> Self {
        self.dsn = dsn.into();
        self
    }

    /// Set pool settings
    #[must_use]
    pub fn with_pool(mut self, pool: PoolSettings) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Add a driver-specific option
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Check the required fields
    pub fn validate(&self) -> Result<()> {
        if self.driver.trim().is_empty() {
            return Err(DatabaseError::invalid_config("driver type is required"));
        }
        Ok(())
    }

    /// Option as bool, accepting `true`/`false` and `"true"`/`"false"`
    pub fn option_bool(&self, key: &str) -> Option<bool> {
        match self.options.get(key)? {
            serde_json::Value::Bool(b) => Some(*b),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Option as u64, accepting numbers and numeric strings
    pub fn option_u64(&self, key: &str) -> Option<u64> {
        match self.options.get(key)? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Option as string
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key)?.as_str()
    }

    /// Deserialize an option into any type
    pub fn option<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.options
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(|e| DatabaseError::invalid_config(format!("option '{}': {}", key, e)))
    }
}

impl PoolSettings {
    /// Create settings with a connection cap
    pub fn with_max_open(max_open_conns: usize) -> Self {
        Self {
            max_open_conns,
            ..Default::default()
        }
    }
}

mod opt_seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_f64(d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(deserializer)?;
        match secs {
            Some(s) if s.is_finite() && s >= 0.0 => Ok(Some(Duration::from_secs_f64(s))),
            Some(s) => Err(serde::de::Error::custom(format!("invalid duration {}", s))),
            None => Ok(None),
        }
    }
}
