//! SQLite driver
//!
//! Connections come from a deadpool-sqlite pool. Each operation runs its
//! blocking rusqlite work through `Object::interact`, bounded by the
//! operation timeout and the caller's context deadline.
//!
//! A transaction pins one pooled connection for its whole lifetime; the
//! handle given to the transaction closure issues every statement on that
//! connection.

pub mod sql;

use crate::core::config::Config;
use crate::core::context::Context;
use crate::core::database::{Database, TxFn};
use crate::core::error::{DatabaseError, Result};
use crate::core::hooks;
use crate::core::model::{FieldDef, Model, ModelSchema, Record};
use crate::core::query::Query;
use crate::core::value::DatabaseValue;
use async_trait::async_trait;
use deadpool_sqlite::{Object, Pool, PoolConfig, PoolError, Runtime};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use sql::Statement;

/// Driver name
pub const DRIVER: &str = "sqlite";

/// Default timeout for database operations (30 seconds)
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum pool size for file databases
const DEFAULT_MAX_CONNECTIONS: usize = 16;

const IN_MEMORY: &str = ":memory:";

/// Settings shared by the root handle and its transaction handles
struct Shared {
    pool: Pool,
    operation_timeout: Duration,
    /// PRAGMAs run on a connection before each use
    session_sql: String,
    closed: AtomicBool,
}

/// Where statements go
enum Executor {
    /// Any pooled connection
    Pool,
    /// The connection pinned by a running transaction
    Tx(Arc<Object>),
}

/// SQLite implementation of [`Database`]
pub struct SqliteDatabase {
    shared: Arc<Shared>,
    executor: Executor,
}

/// Pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Maximum number of connections
    pub max_size: usize,
    /// Total number of connections in the pool
    pub size: usize,
    /// Number of available connections
    pub available: usize,
    /// Number of requests waiting for a connection
    pub waiting: usize,
}

impl SqliteDatabase {
    /// Open a pooled database from a configuration
    ///
    /// The file is taken from `path`, then `dsn`, falling back to an in-memory
    /// database. In-memory databases are private to one connection, so their
    /// pool is capped at a single connection.
    ///
    /// Recognized options: `operation_timeout_ms`, `busy_timeout_ms`,
    /// `foreign_keys` (default true) and `journal_mode`.
    pub async fn open(config: &Config) -> Result<Self> {
        let path = [config.path.as_str(), config.dsn.as_str()]
            .into_iter()
            .find(|p| !p.is_empty())
            .unwrap_or(IN_MEMORY)
            .to_string();
        let in_memory = path == IN_MEMORY || path.contains("mode=memory");

        let operation_timeout = config
            .option_u64("operation_timeout_ms")
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_OPERATION_TIMEOUT);
        let busy_timeout_ms = config.option_u64("busy_timeout_ms").unwrap_or(5_000);
        let foreign_keys = config.option_bool("foreign_keys").unwrap_or(true);

        let max_size = if in_memory {
            1
        } else {
            config
                .pool
                .as_ref()
                .map(|p| p.max_open_conns)
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_CONNECTIONS)
        };
        if let Some(pool) = &config.pool {
            if pool.conn_max_lifetime.is_some() || pool.conn_max_idle_time.is_some() {
                debug!(driver = DRIVER, "connection lifetime settings are not used by this driver");
            }
        }

        let mut pool_config = PoolConfig::new(max_size);
        pool_config.timeouts.wait = Some(operation_timeout);
        let mut sqlite_config = deadpool_sqlite::Config::new(path.clone());
        sqlite_config.pool = Some(pool_config);

        let pool = sqlite_config
            .create_pool(Runtime::Tokio1)
            .map_err(|e| DatabaseError::connection(format!("Failed to create pool: {}", e)))?;

        let shared = Arc::new(Shared {
            pool,
            operation_timeout,
            session_sql: format!(
                "PRAGMA foreign_keys = {}; PRAGMA busy_timeout = {};",
                if foreign_keys { "ON" } else { "OFF" },
                busy_timeout_ms
            ),
            closed: AtomicBool::new(false),
        });
        let db = Self {
            shared,
            executor: Executor::Pool,
        };

        // Validate the path and apply persistent settings on a first connection
        let journal_mode = config.option_str("journal_mode").map(str::to_string);
        db.with_conn(&Context::background(), move |conn| {
            if let Some(mode) = journal_mode {
                conn.query_row(&format!("PRAGMA journal_mode = {}", mode), [], |_| Ok(()))?;
            }
            Ok(())
        })
        .await
        .map_err(|e| e.context(format!("open sqlite database {:?}", path)))?;

        info!(driver = DRIVER, path = %path, max_size, "sqlite pool ready");
        Ok(db)
    }

    /// Get pool statistics
    pub fn pool_status(&self) -> PoolStats {
        let status = self.shared.pool.status();
        PoolStats {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }

    fn is_tx(&self) -> bool {
        matches!(self.executor, Executor::Tx(_))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(DatabaseError::Closed);
        }
        Ok(())
    }

    async fn acquire(&self) -> Result<Object> {
        self.shared.pool.get().await.map_err(|e| match e {
            PoolError::Closed => DatabaseError::Closed,
            PoolError::Timeout(_) => {
                DatabaseError::timeout(self.shared.operation_timeout.as_millis() as u64)
            }
            other => DatabaseError::connection(format!("Failed to acquire connection: {}", other)),
        })
    }

    /// Run blocking work on this handle's connection
    async fn with_conn<T, F>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        ctx.check()?;
        self.ensure_open()?;
        let limit = ctx.clamp(self.shared.operation_timeout);
        let work = async {
            match &self.executor {
                Executor::Pool => {
                    let conn = self.acquire().await?;
                    let session_sql = self.shared.session_sql.clone();
                    interact(&conn, move |c| {
                        c.execute_batch(&session_sql)?;
                        f(c)
                    })
                    .await
                }
                Executor::Tx(conn) => interact(conn, f).await,
            }
        };
        tokio::time::timeout(limit, work)
            .await
            .map_err(|_| DatabaseError::timeout(limit.as_millis() as u64))?
    }

    async fn execute(&self, ctx: &Context, statement: Statement) -> Result<usize> {
        self.with_conn(ctx, move |conn| {
            conn.execute(&statement.sql, params_from_iter(statement.params))
                .map_err(map_error)
        })
        .await
    }

    async fn query(
        &self,
        ctx: &Context,
        schema: &ModelSchema,
        statement: Statement,
    ) -> Result<Vec<Record>> {
        let fields = schema.fields().to_vec();
        self.with_conn(ctx, move |conn| {
            let mut stmt = conn.prepare(&statement.sql).map_err(map_error)?;
            let rows = stmt
                .query_map(params_from_iter(statement.params), |row| {
                    sql::read_record(row, &fields)
                })
                .map_err(map_error)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_error)
        })
        .await
    }

    /// Validate, then insert or upsert; returns the backend-assigned key
    async fn write(
        &self,
        ctx: &Context,
        schema: &ModelSchema,
        record: &Record,
        upsert: bool,
    ) -> Result<Option<i64>> {
        schema.validate()?;
        schema.check_record(record)?;
        let key = schema.primary_key()?;
        let assign_key = record
            .get(&key.name)
            .map_or(true, DatabaseValue::is_unset_key);
        if assign_key && !key.auto_increment {
            return Err(DatabaseError::invalid_model(format!(
                "primary key '{}' of model '{}' must be set",
                key.name,
                schema.table()
            )));
        }
        let statement = if upsert && !assign_key {
            sql::upsert(schema, record)?
        } else {
            sql::insert(schema, record, assign_key)
        };
        let rowid = self
            .with_conn(ctx, move |conn| {
                conn.execute(&statement.sql, params_from_iter(statement.params))
                    .map_err(map_error)?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(assign_key.then_some(rowid))
    }

    async fn update_columns(
        &self,
        ctx: &Context,
        model: &mut dyn Model,
        fields: Option<&[&str]>,
    ) -> Result<()> {
        ctx.check()?;
        self.ensure_open()?;
        hooks::run_before_update(ctx, model)?;
        let schema = model.schema();
        schema.validate()?;
        let record = model.to_record();
        let key = schema.primary_key()?;
        if record.get(&key.name).map_or(true, DatabaseValue::is_unset_key) {
            return Err(DatabaseError::NotFound);
        }

        let targets: Vec<&FieldDef> = match fields {
            None => {
                schema.check_record(&record)?;
                schema.fields().iter().filter(|f| !f.primary_key).collect()
            }
            Some(names) => {
                let mut seen = HashSet::new();
                let mut targets = Vec::with_capacity(names.len());
                for name in names {
                    let field = schema.resolve(name)?;
                    if !field.primary_key && seen.insert(field.name.as_str()) {
                        targets.push(field);
                    }
                }
                targets
            }
        };
        debug!(driver = DRIVER, table = schema.table(), fields = targets.len(), "update");

        let statement = sql::update(&schema, &record, &targets)?;
        if self.execute(ctx, statement).await? == 0 {
            return Err(DatabaseError::NotFound);
        }
        hooks::run_after_update(ctx, model)
    }

    async fn migrate_one(&self, ctx: &Context, schema: &ModelSchema) -> Result<()> {
        schema.validate()?;
        debug!(driver = DRIVER, table = schema.table(), "migrate");
        let create = sql::create_table(schema);
        let info = sql::table_info(schema);
        let indexes = sql::create_indexes(schema);
        let schema = schema.clone();
        self.with_conn(ctx, move |conn| {
            conn.execute(&create, []).map_err(map_error)?;
            let existing = {
                let mut stmt = conn.prepare(&info).map_err(map_error)?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(1))
                    .map_err(map_error)?;
                names
                    .collect::<rusqlite::Result<HashSet<String>>>()
                    .map_err(map_error)?
            };
            for field in schema.fields() {
                if !existing.contains(&field.column) {
                    conn.execute(&sql::add_column(&schema, field), [])
                        .map_err(map_error)?;
                }
            }
            for index in &indexes {
                conn.execute(index, []).map_err(map_error)?;
            }
            Ok(())
        })
        .await
    }
}

async fn interact<T, F>(conn: &Object, f: F) -> Result<T>
where
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    conn.interact(f)
        .await
        .map_err(|e| DatabaseError::other(format!("Interact error: {}", e)))?
}

/// Map native failures onto the contract's sentinels
fn map_error(e: rusqlite::Error) -> DatabaseError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            DatabaseError::AlreadyExists
        }
        rusqlite::Error::QueryReturnedNoRows => DatabaseError::NotFound,
        _ => DatabaseError::from(e),
    }
}

/// Rolls back a pinned connection that was never committed
///
/// If the transaction future is dropped or the closure panics, the connection
/// is detached from the pool and closed, which makes SQLite discard the open
/// transaction.
struct TxGuard {
    conn: Option<Arc<Object>>,
}

impl TxGuard {
    fn conn(&self) -> Result<Arc<Object>> {
        self.conn
            .clone()
            .ok_or_else(|| DatabaseError::transaction_failed("transaction already finished"))
    }

    /// Finish with COMMIT or ROLLBACK and hand the connection back to the pool
    async fn finish(&mut self, sql: &'static str) -> Result<()> {
        let conn = self.conn()?;
        let outcome = interact(&conn, move |c| c.execute_batch(sql).map_err(map_error)).await;
        if outcome.is_ok() {
            self.conn = None;
        }
        outcome
    }
}

impl Drop for TxGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!(driver = DRIVER, "transaction abandoned; discarding its connection");
            if let Ok(conn) = Arc::try_unwrap(conn) {
                drop(Object::take(conn));
            }
        }
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn create(&self, ctx: &Context, model: &mut dyn Model) -> Result<()> {
        ctx.check()?;
        self.ensure_open()?;
        hooks::run_before_create(ctx, model)?;
        let schema = model.schema();
        debug!(driver = DRIVER, table = schema.table(), "create");
        let record = model.to_record();
        if let Some(id) = self.write(ctx, &schema, &record, false).await? {
            model.set_primary_key(DatabaseValue::Long(id))?;
        }
        hooks::run_after_create(ctx, model)
    }

    async fn get(&self, ctx: &Context, model: &mut dyn Model, id: &DatabaseValue) -> Result<()> {
        let schema = model.schema();
        debug!(driver = DRIVER, table = schema.table(), "get");
        let statement = sql::select_by_key(&schema, id)?;
        let fields = schema.fields().to_vec();
        let record = self
            .with_conn(ctx, move |conn| {
                conn.query_row(&statement.sql, params_from_iter(statement.params), |row| {
                    sql::read_record(row, &fields)
                })
                .optional()
                .map_err(map_error)
            })
            .await?
            .ok_or(DatabaseError::NotFound)?;
        model.load(&record)
    }

    async fn update(&self, ctx: &Context, model: &mut dyn Model) -> Result<()> {
        self.update_columns(ctx, model, None).await
    }

    async fn update_fields(
        &self,
        ctx: &Context,
        model: &mut dyn Model,
        fields: &[&str],
    ) -> Result<()> {
        self.update_columns(ctx, model, Some(fields)).await
    }

    async fn save(&self, ctx: &Context, model: &mut dyn Model) -> Result<()> {
        ctx.check()?;
        self.ensure_open()?;
        hooks::run_before_create(ctx, model)?;
        let schema = model.schema();
        debug!(driver = DRIVER, table = schema.table(), "save");
        let record = model.to_record();
        if let Some(id) = self.write(ctx, &schema, &record, true).await? {
            model.set_primary_key(DatabaseValue::Long(id))?;
        }
        hooks::run_after_create(ctx, model)
    }

    async fn delete(&self, ctx: &Context, model: &mut dyn Model, id: &DatabaseValue) -> Result<()> {
        ctx.check()?;
        self.ensure_open()?;
        hooks::run_before_delete(ctx, model)?;
        let schema = model.schema();
        debug!(driver = DRIVER, table = schema.table(), "delete");
        let statement = sql::delete(&schema, id)?;
        if self.execute(ctx, statement).await? == 0 {
            return Err(DatabaseError::NotFound);
        }
        hooks::run_after_delete(ctx, model)
    }

    async fn find(
        &self,
        ctx: &Context,
        schema: &ModelSchema,
        query: Option<&Query>,
    ) -> Result<Vec<Record>> {
        debug!(driver = DRIVER, table = schema.table(), "find");
        let statement = sql::select(schema, query, None)?;
        self.query(ctx, schema, statement).await
    }

    async fn find_one(
        &self,
        ctx: &Context,
        model: &mut dyn Model,
        query: Option<&Query>,
    ) -> Result<()> {
        let schema = model.schema();
        debug!(driver = DRIVER, table = schema.table(), "find_one");
        let statement = sql::select(&schema, query, Some(1))?;
        let record = self
            .query(ctx, &schema, statement)
            .await?
            .into_iter()
            .next()
            .ok_or(DatabaseError::NotFound)?;
        model.load(&record)
    }

    async fn count(&self, ctx: &Context, schema: &ModelSchema, query: Option<&Query>) -> Result<u64> {
        debug!(driver = DRIVER, table = schema.table(), "count");
        let statement = sql::count(schema, query)?;
        self.with_conn(ctx, move |conn| {
            conn.query_row(&statement.sql, params_from_iter(statement.params), |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as u64)
            .map_err(map_error)
        })
        .await
    }

    async fn transaction(&self, ctx: &Context, f: TxFn<'_>) -> Result<()> {
        if self.is_tx() {
            return Err(DatabaseError::not_supported("nested transactions"));
        }
        ctx.check()?;
        self.ensure_open()?;

        let conn = self.acquire().await?;
        let session_sql = self.shared.session_sql.clone();
        let limit = ctx.clamp(self.shared.operation_timeout);
        tokio::time::timeout(
            limit,
            interact(&conn, move |c| {
                c.execute_batch(&session_sql)?;
                c.execute_batch("BEGIN IMMEDIATE").map_err(map_error)
            }),
        )
        .await
        .map_err(|_| DatabaseError::timeout(limit.as_millis() as u64))??;
        debug!(driver = DRIVER, "transaction started");

        let mut guard = TxGuard {
            conn: Some(Arc::new(conn)),
        };
        let scoped = SqliteDatabase {
            shared: Arc::clone(&self.shared),
            executor: Executor::Tx(guard.conn()?),
        };
        let outcome = f(&scoped).await;
        drop(scoped);

        match outcome {
            Ok(()) => {
                if let Err(e) = guard.finish("COMMIT").await {
                    if let Err(rollback) = guard.finish("ROLLBACK").await {
                        warn!(driver = DRIVER, error = %rollback, "rollback after failed commit failed");
                    }
                    return Err(DatabaseError::transaction_failed(e.to_string()));
                }
                debug!(driver = DRIVER, "transaction committed");
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = guard.finish("ROLLBACK").await {
                    warn!(driver = DRIVER, error = %rollback, "rollback failed");
                }
                debug!(driver = DRIVER, error = %e, "transaction rolled back");
                Err(e)
            }
        }
    }

    async fn migrate(&self, ctx: &Context, schemas: &[ModelSchema]) -> Result<()> {
        for schema in schemas {
            self.migrate_one(ctx, schema).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.is_tx() {
            return Err(DatabaseError::not_supported("close inside a transaction"));
        }
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            self.shared.pool.close();
            info!(driver = DRIVER, "database closed");
        }
        Ok(())
    }

    async fn ping(&self, ctx: &Context) -> Result<()> {
        self.with_conn(ctx, |conn| {
            conn.query_row("SELECT 1", [], |_| Ok(())).map_err(map_error)
        })
        .await
    }

    fn driver(&self) -> &str {
        DRIVER
    }
}
