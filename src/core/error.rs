//! Error types for the database system
//!
//! Every backend normalizes its native failures onto the sentinel kinds in
//! [`ErrorKind`] at the contract boundary. Classification tunnels through
//! wrapping, so [`is_not_found`] and [`is_already_exists`] keep working when a
//! [`DatabaseError`] is wrapped in context or inside a caller's own error type.

use std::error::Error as StdError;

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// The closed set of sentinel conditions callers can branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No record matched a lookup
    NotFound,
    /// A write collided with an existing primary or unique key
    AlreadyExists,
    /// The model or one of its field names is not usable
    InvalidModel,
    /// A transaction could not be committed
    TransactionFailed,
    /// The backend does not implement the requested operation
    NotSupported,
    /// The database handle has been closed
    Closed,
}

/// Error types for database operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Record not found
    #[error("record not found")]
    NotFound,

    /// Duplicate primary or unique key
    #[error("record already exists")]
    AlreadyExists,

    /// Invalid model definition or unresolvable field name
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// Transaction could not be committed
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// Unsupported operation
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Operation on a closed database
    #[error("database closed")]
    Closed,

    /// No factory registered under the requested driver name
    #[error("unknown driver {name:?} (is the driver feature enabled and registered?)")]
    UnknownDriver { name: String },

    /// Malformed query (operator and operand do not fit together)
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The caller's context was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's deadline or the operation timeout elapsed
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Connection error (generic)
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// Another error with added context
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<DatabaseError>,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Record encoding error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLite error
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// redb error
    #[cfg(feature = "redb")]
    #[error("redb error: {0}")]
    RedbError(#[from] redb::Error),

    /// Error raised by caller code, e.g. inside a transaction closure
    #[error(transparent)]
    Custom(Box<dyn StdError + Send + Sync>),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl DatabaseError {
    /// Create an invalid model error
    pub fn invalid_model<S: Into<String>>(msg: S) -> Self {
        DatabaseError::InvalidModel(msg.into())
    }

    /// Create a transaction failure
    pub fn transaction_failed<S: Into<String>>(msg: S) -> Self {
        DatabaseError::TransactionFailed(msg.into())
    }

    /// Create a new unsupported operation error
    pub fn not_supported<S: Into<String>>(msg: S) -> Self {
        DatabaseError::NotSupported(msg.into())
    }

    /// Create an unknown driver error
    pub fn unknown_driver<S: Into<String>>(name: S) -> Self {
        DatabaseError::UnknownDriver { name: name.into() }
    }

    /// Create an invalid query error
    pub fn invalid_query<S: Into<String>>(msg: S) -> Self {
        DatabaseError::InvalidQuery(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        DatabaseError::InvalidConfig(msg.into())
    }

    /// Create a new connection error (generic)
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        DatabaseError::ConnectionError(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(timeout_ms: u64) -> Self {
        DatabaseError::Timeout { timeout_ms }
    }

    /// Wrap any caller error so it can travel through the contract unchanged
    pub fn custom<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        DatabaseError::Custom(Box::new(err))
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Other(msg.into())
    }

    /// Wrap this error with a message, keeping its classification
    #[must_use]
    pub fn context<S: Into<String>>(self, context: S) -> Self {
        DatabaseError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Sentinel kind of this error, looking through wrappers
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            DatabaseError::NotFound => Some(ErrorKind::NotFound),
            DatabaseError::AlreadyExists => Some(ErrorKind::AlreadyExists),
            DatabaseError::InvalidModel(_) => Some(ErrorKind::InvalidModel),
            DatabaseError::TransactionFailed(_) => Some(ErrorKind::TransactionFailed),
            DatabaseError::NotSupported(_) => Some(ErrorKind::NotSupported),
            DatabaseError::Closed => Some(ErrorKind::Closed),
            DatabaseError::Context { source, .. } => source.kind(),
            DatabaseError::Custom(inner) => classify(inner.as_ref()),
            _ => None,
        }
    }

    /// Check whether this error is, or wraps, the given kind
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind() == Some(kind)
    }

    /// Shorthand for `is(ErrorKind::NotFound)`
    pub fn is_not_found(&self) -> bool {
        self.is(ErrorKind::NotFound)
    }

    /// Shorthand for `is(ErrorKind::AlreadyExists)`
    pub fn is_already_exists(&self) -> bool {
        self.is(ErrorKind::AlreadyExists)
    }
}

#[cfg(feature = "redb")]
macro_rules! impl_from_redb {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for DatabaseError {
                fn from(e: $ty) -> Self {
                    DatabaseError::RedbError(e.into())
                }
            }
        )*
    };
}

#[cfg(feature = "redb")]
impl_from_redb!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

/// Find the first sentinel kind anywhere in an error's source chain
pub fn classify(err: &(dyn StdError + 'static)) -> Option<ErrorKind> {
    let mut current = Some(err);
    while let Some(e) = current {
        let db_err = e
            .downcast_ref::<DatabaseError>()
            .or_else(|| e.downcast_ref::<Box<DatabaseError>>().map(|b| b.as_ref()));
        if let Some(kind) = db_err.and_then(DatabaseError::kind) {
            return Some(kind);
        }
        current = e.source();
    }
    None
}

/// Reports whether `err` is or wraps [`DatabaseError::NotFound`]
pub fn is_not_found(err: &(dyn StdError + 'static)) -> bool {
    classify(err) == Some(ErrorKind::NotFound)
}

/// Reports whether `err` is or wraps [`DatabaseError::AlreadyExists`]
pub fn is_already_exists(err: &(dyn StdError + 'static)) -> bool {
    classify(err) == Some(ErrorKind::AlreadyExists)
}

/// Adds `.context(..)` to results carrying a [`DatabaseError`]
pub trait ResultExt<T> {
    /// Wrap the error, if any, with a message
    fn context<S: Into<String>>(self, context: S) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context<S: Into<String>>(self, context: S) -> Result<T> {
        self.map_err(|e| e.context(context))
    }
}
