//! redb driver
//!
//! Each model lives in its own redb table keyed by the encoded primary key,
//! with JSON records as values. Queries load the table and run through the
//! in-memory evaluator in [`filter`](crate::core::filter), which keeps their
//! results identical to the SQL driver's.
//!
//! redb calls block, so every operation runs on Tokio's blocking pool. Reads
//! outside a transaction use a read transaction; writes open and commit their
//! own write transaction. Inside [`Database::transaction`] everything goes
//! through the single write transaction owned by the scoped handle. redb
//! allows one writer at a time, so a second transaction waits for the first.

pub mod codec;

use crate::core::config::Config;
use crate::core::context::Context;
use crate::core::database::{Database, TxFn};
use crate::core::error::{DatabaseError, Result};
use crate::core::filter::CompiledQuery;
use crate::core::hooks;
use crate::core::model::{FieldDef, Model, ModelSchema, Record, RecordExt};
use crate::core::query::Query;
use crate::core::value::DatabaseValue;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use redb::{ReadTransaction, ReadableTable, TableDefinition, TableError, WriteTransaction};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Driver name
pub const DRIVER: &str = "redb";

/// Default timeout for database operations (30 seconds)
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Prefix reserved for bookkeeping tables
const RESERVED_PREFIX: &str = "__dbase_";

/// Last assigned auto-increment key per table
const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("__dbase_sequences");

/// JSON schema of every migrated model
const SCHEMAS: TableDefinition<&str, &str> = TableDefinition::new("__dbase_schemas");

type Raw = &'static [u8];

fn records_table(name: &str) -> TableDefinition<'_, Raw, Raw> {
    TableDefinition::new(name)
}

struct Shared {
    db: RwLock<Option<Arc<redb::Database>>>,
    operation_timeout: Duration,
}

impl Shared {
    fn database(&self) -> Result<Arc<redb::Database>> {
        self.db.read().clone().ok_or(DatabaseError::Closed)
    }
}

type TxSlot = Arc<Mutex<Option<WriteTransaction>>>;

enum Scope {
    Root,
    Tx(TxSlot),
}

/// redb implementation of [`Database`]
pub struct RedbDatabase {
    shared: Arc<Shared>,
    scope: Scope,
}

/// Read access shared by read and write transactions
trait Source {
    /// All records of a table in key order; a missing table is empty
    fn scan(&self, table: &str) -> Result<Vec<Record>>;

    /// One record by encoded key
    fn fetch(&self, table: &str, key: &[u8]) -> Result<Option<Record>>;
}

fn scan_table<T: ReadableTable<Raw, Raw>>(table: &T) -> Result<Vec<Record>> {
    let mut records = Vec::with_capacity(table.len()? as usize);
    for entry in table.iter()? {
        let (_, value) = entry?;
        records.push(codec::decode_record(value.value())?);
    }
    Ok(records)
}

fn fetch_from<T: ReadableTable<Raw, Raw>>(table: &T, key: &[u8]) -> Result<Option<Record>> {
    match table.get(key)? {
        Some(value) => Ok(Some(codec::decode_record(value.value())?)),
        None => Ok(None),
    }
}

impl Source for ReadTransaction {
    fn scan(&self, table: &str) -> Result<Vec<Record>> {
        match self.open_table(records_table(table)) {
            Ok(t) => scan_table(&t),
            Err(TableError::TableDoesNotExist(_)) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn fetch(&self, table: &str, key: &[u8]) -> Result<Option<Record>> {
        match self.open_table(records_table(table)) {
            Ok(t) => fetch_from(&t, key),
            Err(TableError::TableDoesNotExist(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Source for WriteTransaction {
    fn scan(&self, table: &str) -> Result<Vec<Record>> {
        scan_table(&self.open_table(records_table(table))?)
    }

    fn fetch(&self, table: &str, key: &[u8]) -> Result<Option<Record>> {
        fetch_from(&self.open_table(records_table(table))?, key)
    }
}

/// How a write treats an existing record under the same key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    /// Fail with `AlreadyExists`
    Insert,
    /// Fail with `NotFound` when missing
    Replace,
    /// Either
    Upsert,
}

/// A write prepared on the async side, applied on the blocking pool
struct PendingWrite {
    schema: ModelSchema,
    record: Record,
    mode: WriteMode,
    /// Fields to copy onto the stored record; `None` writes the whole record
    fields: Option<Vec<String>>,
}

impl PendingWrite {
    /// Apply inside `txn`, returning the key assigned by the sequence
    fn apply(mut self, txn: &WriteTransaction) -> Result<Option<i64>> {
        let key_field = self.schema.primary_key()?.clone();
        let table = self.schema.table().to_string();
        let unset = self.record.value(&key_field.name).is_unset_key();

        let assigned = if unset && self.mode != WriteMode::Replace && key_field.auto_increment {
            let id = next_sequence(txn, &table)?;
            self.record
                .insert(key_field.name.clone(), DatabaseValue::Long(id));
            Some(id)
        } else if unset {
            return Err(match self.mode {
                WriteMode::Replace => DatabaseError::NotFound,
                _ => DatabaseError::invalid_model(format!(
                    "primary key '{}' of model '{}' must be set",
                    key_field.name, table
                )),
            });
        } else {
            None
        };

        let key = codec::encode_key(&key_field, self.record.value(&key_field.name))?;
        let existing = txn.fetch(&table, &key)?;
        let record = match (self.mode, existing) {
            (WriteMode::Insert, Some(_)) => return Err(DatabaseError::AlreadyExists),
            (WriteMode::Replace, None) => return Err(DatabaseError::NotFound),
            (_, Some(mut stored)) if self.fields.is_some() => {
                for name in self.fields.iter().flatten() {
                    stored.insert(name.clone(), self.record.value(name).clone());
                }
                stored
            }
            _ => self.record,
        };

        check_unique(txn, &self.schema, &key, &record)?;
        let bytes = codec::encode_record(&record)?;
        txn.open_table(records_table(&table))?
            .insert(key.as_slice(), bytes.as_slice())?;

        if assigned.is_none() && key_field.auto_increment {
            if let Some(id) = record.value(&key_field.name).as_long() {
                raise_sequence(txn, &table, id)?;
            }
        }
        Ok(assigned)
    }
}

fn next_sequence(txn: &WriteTransaction, table: &str) -> Result<i64> {
    let mut sequences = txn.open_table(SEQUENCES)?;
    let current = sequences.get(table)?.map(|v| v.value()).unwrap_or(0);
    let next = current + 1;
    sequences.insert(table, next)?;
    Ok(next as i64)
}

/// Keep the sequence ahead of explicitly chosen keys
fn raise_sequence(txn: &WriteTransaction, table: &str, id: i64) -> Result<()> {
    if id <= 0 {
        return Ok(());
    }
    let mut sequences = txn.open_table(SEQUENCES)?;
    let current = sequences.get(table)?.map(|v| v.value()).unwrap_or(0);
    if (id as u64) > current {
        sequences.insert(table, id as u64)?;
    }
    Ok(())
}

fn check_unique(
    txn: &WriteTransaction,
    schema: &ModelSchema,
    key: &[u8],
    record: &Record,
) -> Result<()> {
    let unique: Vec<&FieldDef> = schema
        .fields()
        .iter()
        .filter(|f| f.unique && !f.primary_key && !record.value(&f.name).is_null())
        .collect();
    if unique.is_empty() {
        return Ok(());
    }
    let table = txn.open_table(records_table(schema.table()))?;
    for entry in table.iter()? {
        let (other_key, value) = entry?;
        if other_key.value() == key {
            continue;
        }
        let other = codec::decode_record(value.value())?;
        let clash = unique.iter().any(|f| {
            record.value(&f.name).compare(other.value(&f.name)) == Some(Ordering::Equal)
        });
        if clash {
            return Err(DatabaseError::AlreadyExists);
        }
    }
    Ok(())
}

fn check_table_name(schema: &ModelSchema) -> Result<()> {
    if schema.table().starts_with(RESERVED_PREFIX) {
        return Err(DatabaseError::invalid_model(format!(
            "table name '{}' uses the reserved prefix '{}'",
            schema.table(),
            RESERVED_PREFIX
        )));
    }
    Ok(())
}

fn join_error(e: tokio::task::JoinError) -> DatabaseError {
    DatabaseError::other(format!("blocking task failed: {}", e))
}

impl RedbDatabase {
    /// Open or create a database from a configuration
    ///
    /// An empty `path`, or the option `in_memory: true`, selects redb's
    /// in-memory backend. Other options: `cache_size` in bytes and
    /// `operation_timeout_ms`.
    pub async fn open(config: &Config) -> Result<Self> {
        let in_memory = config.option_bool("in_memory").unwrap_or(false) || config.path.is_empty();
        let cache_size = config.option_u64("cache_size");
        let path = config.path.clone();

        let db = tokio::task::spawn_blocking(move || {
            let mut builder = redb::Builder::new();
            if let Some(bytes) = cache_size {
                builder.set_cache_size(bytes as usize);
            }
            if in_memory {
                builder.create_with_backend(redb::backends::InMemoryBackend::new())
            } else {
                builder.create(&path)
            }
        })
        .await
        .map_err(join_error)?
        .map_err(|e| DatabaseError::from(e).context(format!("open redb database {:?}", config.path)))?;

        info!(driver = DRIVER, path = %config.path, in_memory, "redb database ready");
        let timeout = config
            .option_u64("operation_timeout_ms")
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_OPERATION_TIMEOUT);
        Ok(Self::with_timeout(db, timeout))
    }

    /// Wrap an already opened redb database
    pub fn from_database(db: redb::Database) -> Self {
        Self::with_timeout(db, DEFAULT_OPERATION_TIMEOUT)
    }

    fn with_timeout(db: redb::Database, operation_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                db: RwLock::new(Some(Arc::new(db))),
                operation_timeout,
            }),
            scope: Scope::Root,
        }
    }

    async fn blocking<T, F>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let limit = ctx.clamp(self.shared.operation_timeout);
        tokio::time::timeout(limit, tokio::task::spawn_blocking(f))
            .await
            .map_err(|_| DatabaseError::timeout(limit.as_millis() as u64))?
            .map_err(join_error)?
    }

    /// Run read-only work on a snapshot, or on the open transaction
    async fn read<T, F>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Source) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        ctx.check()?;
        let db = self.shared.database()?;
        match &self.scope {
            Scope::Root => {
                self.blocking(ctx, move || {
                    let txn = db.begin_read()?;
                    f(&txn)
                })
                .await
            }
            Scope::Tx(slot) => {
                let slot = Arc::clone(slot);
                self.blocking(ctx, move || {
                    let guard = slot.lock();
                    let txn = guard
                        .as_ref()
                        .ok_or_else(|| DatabaseError::transaction_failed("transaction already finished"))?;
                    f(txn)
                })
                .await
            }
        }
    }

    /// Run write work in its own committed transaction, or in the open one
    async fn write<T, F>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce(&WriteTransaction) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        ctx.check()?;
        let db = self.shared.database()?;
        match &self.scope {
            Scope::Root => {
                self.blocking(ctx, move || {
                    let txn = db.begin_write()?;
                    let out = f(&txn)?;
                    txn.commit()?;
                    Ok(out)
                })
                .await
            }
            Scope::Tx(slot) => {
                let slot = Arc::clone(slot);
                self.blocking(ctx, move || {
                    let guard = slot.lock();
                    let txn = guard
                        .as_ref()
                        .ok_or_else(|| DatabaseError::transaction_failed("transaction already finished"))?;
                    f(txn)
                })
                .await
            }
        }
    }

    /// Validate a model and capture what the blocking side needs
    fn prepare(
        model: &dyn Model,
        mode: WriteMode,
        fields: Option<&[&str]>,
    ) -> Result<PendingWrite> {
        let schema = model.schema();
        schema.validate()?;
        check_table_name(&schema)?;
        let mut record = model.to_record();
        codec::normalize_record(&schema, &mut record);

        let fields = match fields {
            None => {
                schema.check_record(&record)?;
                None
            }
            Some(names) => {
                let mut seen = HashSet::new();
                let mut resolved = Vec::with_capacity(names.len());
                for name in names {
                    let field = schema.resolve(name)?;
                    if !field.primary_key && seen.insert(field.name.clone()) {
                        resolved.push(field.name.clone());
                    }
                }
                Some(resolved)
            }
        };
        Ok(PendingWrite {
            schema,
            record,
            mode,
            fields,
        })
    }

    async fn put(
        &self,
        ctx: &Context,
        model: &mut dyn Model,
        mode: WriteMode,
        fields: Option<&[&str]>,
    ) -> Result<()> {
        ctx.check()?;
        self.shared.database()?;
        match mode {
            WriteMode::Replace => hooks::run_before_update(ctx, model)?,
            WriteMode::Insert | WriteMode::Upsert => hooks::run_before_create(ctx, model)?,
        }
        let pending = Self::prepare(model, mode, fields)?;
        debug!(driver = DRIVER, table = pending.schema.table(), ?mode, "write");

        if let Some(id) = self.write(ctx, move |txn| pending.apply(txn)).await? {
            model.set_primary_key(DatabaseValue::Long(id))?;
        }
        match mode {
            WriteMode::Replace => hooks::run_after_update(ctx, model),
            WriteMode::Insert | WriteMode::Upsert => hooks::run_after_create(ctx, model),
        }
    }

    fn is_tx(&self) -> bool {
        matches!(self.scope, Scope::Tx(_))
    }
}

#[async_trait]
impl Database for RedbDatabase {
    async fn create(&self, ctx: &Context, model: &mut dyn Model) -> Result<()> {
        self.put(ctx, model, WriteMode::Insert, None).await
    }

    async fn get(&self, ctx: &Context, model: &mut dyn Model, id: &DatabaseValue) -> Result<()> {
        let schema = model.schema();
        debug!(driver = DRIVER, table = schema.table(), "get");
        let key = codec::encode_key(schema.primary_key()?, id)?;
        let table = schema.table().to_string();
        let record = self
            .read(ctx, move |src| src.fetch(&table, &key))
            .await?
            .ok_or(DatabaseError::NotFound)?;
        model.load(&record)
    }

    async fn update(&self, ctx: &Context, model: &mut dyn Model) -> Result<()> {
        self.put(ctx, model, WriteMode::Replace, None).await
    }

    async fn update_fields(
        &self,
        ctx: &Context,
        model: &mut dyn Model,
        fields: &[&str],
    ) -> Result<()> {
        self.put(ctx, model, WriteMode::Replace, Some(fields)).await
    }

    async fn save(&self, ctx: &Context, model: &mut dyn Model) -> Result<()> {
        self.put(ctx, model, WriteMode::Upsert, None).await
    }

    async fn delete(&self, ctx: &Context, model: &mut dyn Model, id: &DatabaseValue) -> Result<()> {
        ctx.check()?;
        self.shared.database()?;
        hooks::run_before_delete(ctx, model)?;
        let schema = model.schema();
        debug!(driver = DRIVER, table = schema.table(), "delete");
        let key = codec::encode_key(schema.primary_key()?, id)?;
        let table = schema.table().to_string();
        let removed = self
            .write(ctx, move |txn| {
                let mut t = txn.open_table(records_table(&table))?;
                let removed = t.remove(key.as_slice())?.is_some();
                Ok(removed)
            })
            .await?;
        if !removed {
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
        // Compile first so bad field names fail without touching storage
        CompiledQuery::compile(query, schema)?;
        let schema_owned = schema.clone();
        let query_owned = query.cloned();
        self.read(ctx, move |src| {
            let records = src.scan(schema_owned.table())?;
            Ok(CompiledQuery::compile(query_owned.as_ref(), &schema_owned)?.apply(records))
        })
        .await
    }

    async fn find_one(
        &self,
        ctx: &Context,
        model: &mut dyn Model,
        query: Option<&Query>,
    ) -> Result<()> {
        let schema = model.schema();
        let limited = query.cloned().unwrap_or_default().set_limit(1);
        let record = self
            .find(ctx, &schema, Some(&limited))
            .await?
            .into_iter()
            .next()
            .ok_or(DatabaseError::NotFound)?;
        model.load(&record)
    }

    async fn count(&self, ctx: &Context, schema: &ModelSchema, query: Option<&Query>) -> Result<u64> {
        debug!(driver = DRIVER, table = schema.table(), "count");
        CompiledQuery::compile(query, schema)?;
        let schema_owned = schema.clone();
        let query_owned = query.cloned();
        self.read(ctx, move |src| {
            let records = src.scan(schema_owned.table())?;
            Ok(CompiledQuery::compile(query_owned.as_ref(), &schema_owned)?.count(&records))
        })
        .await
    }

    async fn transaction(&self, ctx: &Context, f: TxFn<'_>) -> Result<()> {
        if self.is_tx() {
            return Err(DatabaseError::not_supported("nested transactions"));
        }
        ctx.check()?;
        let db = self.shared.database()?;
        let txn = self
            .blocking(ctx, move || Ok(db.begin_write()?))
            .await?;
        debug!(driver = DRIVER, "transaction started");

        let slot: TxSlot = Arc::new(Mutex::new(Some(txn)));
        let scoped = RedbDatabase {
            shared: Arc::clone(&self.shared),
            scope: Scope::Tx(Arc::clone(&slot)),
        };
        let outcome = f(&scoped).await;
        drop(scoped);

        let txn = slot
            .lock()
            .take()
            .ok_or_else(|| DatabaseError::transaction_failed("transaction already finished"))?;
        match outcome {
            Ok(()) => {
                tokio::task::spawn_blocking(move || txn.commit())
                    .await
                    .map_err(join_error)?
                    .map_err(|e| DatabaseError::transaction_failed(e.to_string()))?;
                debug!(driver = DRIVER, "transaction committed");
                Ok(())
            }
            Err(e) => {
                let aborted = tokio::task::spawn_blocking(move || txn.abort())
                    .await
                    .map_err(join_error);
                match aborted {
                    Ok(Ok(())) => debug!(driver = DRIVER, error = %e, "transaction rolled back"),
                    Ok(Err(rollback)) => warn!(driver = DRIVER, error = %rollback, "rollback failed"),
                    Err(rollback) => warn!(driver = DRIVER, error = %rollback, "rollback failed"),
                }
                Err(e)
            }
        }
    }

    async fn migrate(&self, ctx: &Context, schemas: &[ModelSchema]) -> Result<()> {
        for schema in schemas {
            schema.validate()?;
            check_table_name(schema)?;
        }
        let schemas = schemas.to_vec();
        self.write(ctx, move |txn| {
            for schema in &schemas {
                debug!(driver = DRIVER, table = schema.table(), "migrate");
                txn.open_table(records_table(schema.table()))?;
                let json = serde_json::to_string(schema)?;
                txn.open_table(SCHEMAS)?.insert(schema.table(), json.as_str())?;
            }
            txn.open_table(SEQUENCES)?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        if self.is_tx() {
            return Err(DatabaseError::not_supported("close inside a transaction"));
        }
        if self.shared.db.write().take().is_some() {
            info!(driver = DRIVER, "database closed");
        }
        Ok(())
    }

    async fn ping(&self, ctx: &Context) -> Result<()> {
        self.read(ctx, |_| Ok(())).await
    }

    fn driver(&self) -> &str {
        DRIVER
    }
}
