//! The database contract
//!
//! [`Database`] is the object-safe trait every backend implements; callers
//! hold a `Box<dyn Database>` obtained from the registry and never learn
//! which engine is behind it. [`DatabaseExt`] layers typed helpers on top.

use super::context::Context;
use super::error::Result;
use super::model::{Model, ModelSchema, Record};
use super::query::Query;
use super::value::DatabaseValue;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;

/// A boxed, sendable future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Body of a transaction
///
/// The closure receives a handle scoped to the transaction. Every operation
/// issued through that handle joins the transaction; the handle must not be
/// kept past the closure.
pub type TxFn<'a> =
    Box<dyn for<'tx> FnOnce(&'tx dyn Database) -> BoxFuture<'tx, Result<()>> + Send + 'a>;

/// Core database trait that all backends implement
///
/// Handles are safe to share between tasks. Operations report failures with
/// the sentinel kinds of [`ErrorKind`](super::error::ErrorKind) wherever one
/// applies:
///
/// * `get` and `find_one` return `NotFound` when nothing matches, and so do
///   `update` and `delete` when the key does not exist
/// * a duplicate primary or unique key yields `AlreadyExists`
/// * a query naming an unknown field yields `InvalidModel`, and one whose
///   operand cannot be bound to the field's type yields `InvalidQuery`
/// * after [`close`](Database::close) every operation yields `Closed`
///
/// Mutating operations run the model's [`Hooks`](super::hooks::Hooks) in the
/// order documented in [`hooks`](super::hooks).
#[async_trait]
pub trait Database: Send + Sync {
    /// Insert a new record
    ///
    /// An unassigned auto-increment key is filled in on the model afterwards.
    async fn create(&self, ctx: &Context, model: &mut dyn Model) -> Result<()>;

    /// Load the record with primary key `id` into `model`
    async fn get(&self, ctx: &Context, model: &mut dyn Model, id: &DatabaseValue) -> Result<()>;

    /// Replace every field of an existing record
    async fn update(&self, ctx: &Context, model: &mut dyn Model) -> Result<()>;

    /// Write only the listed fields of an existing record
    ///
    /// Field names are logical names or columns; an unknown name yields
    /// `InvalidModel`. An empty list is a no-op apart from the hooks.
    async fn update_fields(
        &self,
        ctx: &Context,
        model: &mut dyn Model,
        fields: &[&str],
    ) -> Result<()>;

    /// Insert or replace
    async fn save(&self, ctx: &Context, model: &mut dyn Model) -> Result<()>;

    /// Remove the record with primary key `id`
    async fn delete(&self, ctx: &Context, model: &mut dyn Model, id: &DatabaseValue)
        -> Result<()>;

    /// All records of `schema` matching `query`
    ///
    /// `None` or an empty query matches everything. An empty result is not an
    /// error.
    async fn find(
        &self,
        ctx: &Context,
        schema: &ModelSchema,
        query: Option<&Query>,
    ) -> Result<Vec<Record>>;

    /// Load the first record matching `query` into `model`
    async fn find_one(
        &self,
        ctx: &Context,
        model: &mut dyn Model,
        query: Option<&Query>,
    ) -> Result<()>;

    /// Number of matching records; ordering and pagination are ignored
    async fn count(&self, ctx: &Context, schema: &ModelSchema, query: Option<&Query>)
        -> Result<u64>;

    /// Whether any record matches
    async fn exists(
        &self,
        ctx: &Context,
        schema: &ModelSchema,
        query: Option<&Query>,
    ) -> Result<bool> {
        Ok(self.count(ctx, schema, query).await? > 0)
    }

    /// Run `f` inside a transaction
    ///
    /// The transaction commits when `f` returns `Ok`. When `f` fails it is
    /// rolled back and the closure's error is returned unchanged; a failed
    /// commit yields `TransactionFailed`.
    ///
    /// Calling `transaction` on the scoped handle yields `NotSupported`.
    /// Calling it on the outer handle from inside `f` is not supported
    /// either: depending on the backend it waits for the outer transaction
    /// to finish, which never happens.
    async fn transaction(&self, ctx: &Context, f: TxFn<'_>) -> Result<()>;

    /// Create or extend storage for the given models; safe to repeat
    async fn migrate(&self, ctx: &Context, schemas: &[ModelSchema]) -> Result<()>;

    /// Release the underlying resources
    async fn close(&self) -> Result<()>;

    /// Check the backend is reachable
    async fn ping(&self, ctx: &Context) -> Result<()>;

    /// Name of the driver that produced this handle
    fn driver(&self) -> &str;
}

/// Typed helpers for any [`Database`]
///
/// ```no_run
/// # use dbase::{Context, Database, DatabaseExt, Query, Result};
/// # use dbase::core::model::Model;
/// # async fn demo<U: Model + Default + 'static>(db: &dyn Database) -> Result<()> {
/// let ctx = Context::background();
/// let adults: Vec<U> = db.find_as(&ctx, Some(&Query::ge("Age", 18))).await?;
///
/// let tx_ctx = ctx.clone();
/// db.run_transaction(&ctx, move |tx| {
///     Box::pin(async move {
///         let mut user = U::default();
///         tx.create(&tx_ctx, &mut user).await
///     })
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait DatabaseExt: Database {
    /// Like [`find`](Database::find), loading each record into a fresh `M`
    async fn find_as<M>(&self, ctx: &Context, query: Option<&Query>) -> Result<Vec<M>>
    where
        M: Model + Default + 'static;

    /// Like [`find_one`](Database::find_one), returning a fresh `M`
    async fn find_one_as<M>(&self, ctx: &Context, query: Option<&Query>) -> Result<M>
    where
        M: Model + Default + 'static;

    /// Like [`get`](Database::get), returning a fresh `M`
    async fn get_as<M>(&self, ctx: &Context, id: &DatabaseValue) -> Result<M>
    where
        M: Model + Default + 'static;

    /// Like [`count`](Database::count) for the schema of `M`
    async fn count_of<M>(&self, ctx: &Context, query: Option<&Query>) -> Result<u64>
    where
        M: Model + Default + 'static;

    /// Like [`exists`](Database::exists) for the schema of `M`
    async fn exists_of<M>(&self, ctx: &Context, query: Option<&Query>) -> Result<bool>
    where
        M: Model + Default + 'static;

    /// Migrate the schema of `M`
    async fn migrate_models<M>(&self, ctx: &Context) -> Result<()>
    where
        M: Model + Default + 'static;

    /// [`transaction`](Database::transaction) taking an unboxed closure
    async fn run_transaction<F>(&self, ctx: &Context, f: F) -> Result<()>
    where
        F: for<'tx> FnOnce(&'tx dyn Database) -> BoxFuture<'tx, Result<()>> + Send;
}

fn schema_of<M: Model + Default>() -> ModelSchema {
    M::default().schema()
}

#[async_trait]
impl<T: Database + ?Sized> DatabaseExt for T {
    async fn find_as<M>(&self, ctx: &Context, query: Option<&Query>) -> Result<Vec<M>>
    where
        M: Model + Default + 'static,
    {
        let schema = schema_of::<M>();
        let records = self.find(ctx, &schema, query).await?;
        records
            .iter()
            .map(|record| {
                let mut model = M::default();
                model.load(record)?;
                Ok(model)
            })
            .collect()
    }

    async fn find_one_as<M>(&self, ctx: &Context, query: Option<&Query>) -> Result<M>
    where
        M: Model + Default + 'static,
    {
        let mut model = M::default();
        self.find_one(ctx, &mut model, query).await?;
        Ok(model)
    }

    async fn get_as<M>(&self, ctx: &Context, id: &DatabaseValue) -> Result<M>
    where
        M: Model + Default + 'static,
    {
        let mut model = M::default();
        self.get(ctx, &mut model, id).await?;
        Ok(model)
    }

    async fn count_of<M>(&self, ctx: &Context, query: Option<&Query>) -> Result<u64>
    where
        M: Model + Default + 'static,
    {
        let schema = schema_of::<M>();
        self.count(ctx, &schema, query).await
    }

    async fn exists_of<M>(&self, ctx: &Context, query: Option<&Query>) -> Result<bool>
    where
        M: Model + Default + 'static,
    {
        let schema = schema_of::<M>();
        self.exists(ctx, &schema, query).await
    }

    async fn migrate_models<M>(&self, ctx: &Context) -> Result<()>
    where
        M: Model + Default + 'static,
    {
        let schema = schema_of::<M>();
        self.migrate(ctx, std::slice::from_ref(&schema)).await
    }

    async fn run_transaction<F>(&self, ctx: &Context, f: F) -> Result<()>
    where
        F: for<'tx> FnOnce(&'tx dyn Database) -> BoxFuture<'tx, Result<()>> + Send,
    {
        self.transaction(ctx, Box::new(f)).await
    }
}
