//! Conformance suite shared by every driver's integration tests
//!
//! [`run_suite`] walks one handle through meta, migration, CRUD, querying,
//! pagination, transactions and deletion. Steps build on each other, so they
//! run in a fixed order against a fresh database.

#![allow(dead_code)]

use dbase::prelude::*;
use dbase::Operator;

/// Standard model used by the suite
#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub age: i64,
}

impl User {
    pub fn new(name: &str, email: &str, age: i64) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            email: email.to_string(),
            age,
        }
    }
}

impl Hooks for User {}

impl Model for User {
    fn schema(&self) -> ModelSchema {
        ModelSchema::new("users")
            .field(
                FieldDef::new("ID", FieldType::Integer)
                    .primary_key()
                    .auto_increment(),
            )
            .field(FieldDef::new("Name", FieldType::Text).indexed())
            .field(FieldDef::new("Email", FieldType::Text).unique())
            .field(FieldDef::new("Age", FieldType::Integer))
    }

    fn primary_key(&self) -> DatabaseValue {
        self.id.into()
    }

    fn set_primary_key(&mut self, id: DatabaseValue) -> Result<()> {
        self.id = id
            .as_long()
            .ok_or_else(|| DatabaseError::invalid_model("ID must be an integer"))?;
        Ok(())
    }

    fn to_record(&self) -> Record {
        Record::from([
            ("ID".to_string(), self.id.into()),
            ("Name".to_string(), self.name.clone().into()),
            ("Email".to_string(), self.email.clone().into()),
            ("Age".to_string(), self.age.into()),
        ])
    }

    fn load(&mut self, record: &Record) -> Result<()> {
        self.id = record.long("ID")?;
        self.name = record.string("Name")?;
        self.email = record.string("Email")?;
        self.age = record.long("Age")?;
        Ok(())
    }
}

/// Send test logs to the test harness when `RUST_LOG` is set
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn users() -> ModelSchema {
    User::default().schema()
}

/// Run every conformance step in order
pub async fn run_suite(db: &dyn Database) {
    let ctx = Context::background();

    meta(db, &ctx).await;
    migrate(db, &ctx).await;
    let alice = create(db, &ctx).await;
    get(db, &ctx, alice).await;
    update(db, &ctx, alice).await;
    save_existing(db, &ctx, alice).await;
    find_one(db, &ctx).await;
    find(db, &ctx).await;
    pagination(db, &ctx).await;
    ordering(db, &ctx).await;
    count_and_exists(db, &ctx).await;
    duplicates(db, &ctx, alice).await;
    missing_keys(db, &ctx).await;
    partial_update(db, &ctx, alice).await;
    transaction_commit(db, &ctx).await;
    transaction_rollback(db, &ctx).await;
    nested_transaction(db, &ctx).await;
    delete(db, &ctx).await;
    query_operators(db, &ctx).await;
}

async fn meta(db: &dyn Database, ctx: &Context) {
    assert!(!db.driver().is_empty(), "driver name must not be empty");
    db.ping(ctx).await.expect("ping should succeed on an open database");
}

async fn migrate(db: &dyn Database, ctx: &Context) {
    db.migrate_models::<User>(ctx)
        .await
        .expect("migrate should create the schema");
    db.migrate_models::<User>(ctx)
        .await
        .expect("migrate should be idempotent");
}

async fn create(db: &dyn Database, ctx: &Context) -> i64 {
    let mut alice = User::new("Alice", "alice@test.com", 25);
    db.create(ctx, &mut alice).await.expect("create alice");
    assert_ne!(alice.id, 0, "create should populate the ID field");

    let mut bob = User::new("Bob", "bob@test.com", 30);
    db.create(ctx, &mut bob).await.expect("create bob");
    let mut charlie = User::new("Charlie", "charlie@test.com", 35);
    db.create(ctx, &mut charlie).await.expect("create charlie");
    assert_ne!(bob.id, charlie.id);
    assert_ne!(alice.id, bob.id);

    alice.id
}

async fn get(db: &dyn Database, ctx: &Context, alice: i64) {
    let user: User = db.get_as(ctx, &alice.into()).await.expect("get alice");
    assert_eq!(user.name, "Alice");
    assert_eq!(user.age, 25);

    let err = db
        .get_as::<User>(ctx, &DatabaseValue::Long(999_999))
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "expected NotFound, got {err:?}");
}

async fn update(db: &dyn Database, ctx: &Context, alice: i64) {
    let mut user: User = db.get_as(ctx, &alice.into()).await.unwrap();
    user.name = "Alice Updated".to_string();
    db.update(ctx, &mut user).await.expect("update alice");

    let updated: User = db.get_as(ctx, &alice.into()).await.unwrap();
    assert_eq!(updated.name, "Alice Updated");
}

async fn save_existing(db: &dyn Database, ctx: &Context, alice: i64) {
    let mut user: User = db.get_as(ctx, &alice.into()).await.unwrap();
    user.name = "Alice Saved".to_string();
    db.save(ctx, &mut user).await.expect("save alice");

    let saved: User = db.get_as(ctx, &alice.into()).await.unwrap();
    assert_eq!(saved.name, "Alice Saved");
    assert_eq!(db.count_of::<User>(ctx, None).await.unwrap(), 3);
}

async fn find_one(db: &dyn Database, ctx: &Context) {
    let user: User = db
        .find_one_as(ctx, Some(&Query::eq("Email", "alice@test.com")))
        .await
        .expect("find alice by email");
    assert_eq!(user.name, "Alice Saved");

    let err = db
        .find_one_as::<User>(ctx, Some(&Query::eq("Email", "nonexistent@test.com")))
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "expected NotFound, got {err:?}");
}

async fn find(db: &dyn Database, ctx: &Context) {
    let all: Vec<User> = db.find_as(ctx, None).await.unwrap();
    assert!(all.len() >= 3);

    let bobs: Vec<User> = db.find_as(ctx, Some(&Query::eq("Name", "Bob"))).await.unwrap();
    assert_eq!(bobs.len(), 1);
    assert_eq!(bobs[0].name, "Bob");

    let nobody: Vec<User> = db
        .find_as(ctx, Some(&Query::eq("Name", "NonExistentUser")))
        .await
        .unwrap();
    assert!(nobody.is_empty());

    let older: Vec<User> = db.find_as(ctx, Some(&Query::gt("Age", 28))).await.unwrap();
    assert!(!older.is_empty());
    assert!(older.iter().all(|u| u.age > 28));

    let range = Query::new()
        .and_where("Age", Operator::Ge, 30)
        .and_where("Age", Operator::Le, 35);
    let middle: Vec<User> = db.find_as(ctx, Some(&range)).await.unwrap();
    assert_eq!(middle.len(), 2);
    assert!(middle.iter().all(|u| (30..=35).contains(&u.age)));

    // Columns resolve as well as logical names
    let by_column: Vec<User> = db.find_as(ctx, Some(&Query::eq("name", "Bob"))).await.unwrap();
    assert_eq!(by_column.len(), 1);

    let err = db
        .find(ctx, &users(), Some(&Query::eq("Nickname", "x")))
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::InvalidModel), "expected InvalidModel, got {err:?}");
}

async fn pagination(db: &dyn Database, ctx: &Context) {
    let one: Vec<User> = db
        .find_as(ctx, Some(&Query::new().set_limit(1)))
        .await
        .unwrap();
    assert_eq!(one.len(), 1);

    let page1: Vec<User> = db
        .find_as(ctx, Some(&Query::new().order_by_asc("Name").set_limit(1)))
        .await
        .unwrap();
    let page2: Vec<User> = db
        .find_as(
            ctx,
            Some(&Query::new().order_by_asc("Name").set_limit(1).set_offset(1)),
        )
        .await
        .unwrap();
    assert_eq!(page1.len(), 1);
    assert_eq!(page2.len(), 1);
    assert_ne!(page1[0].name, page2[0].name);

    let tail: Vec<User> = db
        .find_as(ctx, Some(&Query::new().order_by_asc("Name").set_offset(2)))
        .await
        .unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].name, "Charlie");

    let past_end: Vec<User> = db
        .find_as(ctx, Some(&Query::new().set_offset(100)))
        .await
        .unwrap();
    assert!(past_end.is_empty());
}

async fn ordering(db: &dyn Database, ctx: &Context) {
    let asc: Vec<User> = db
        .find_as(ctx, Some(&Query::new().order_by_asc("Age")))
        .await
        .unwrap();
    assert!(asc.len() >= 2);
    assert!(asc.windows(2).all(|w| w[0].age <= w[1].age));

    let desc: Vec<User> = db
        .find_as(ctx, Some(&Query::new().order_by_desc("Age")))
        .await
        .unwrap();
    assert!(desc.len() >= 2);
    assert!(desc.windows(2).all(|w| w[0].age >= w[1].age));
}

async fn count_and_exists(db: &dyn Database, ctx: &Context) {
    assert!(db.count_of::<User>(ctx, None).await.unwrap() >= 3);
    assert_eq!(
        db.count_of::<User>(ctx, Some(&Query::eq("Name", "Bob")))
            .await
            .unwrap(),
        1
    );
    // Pagination does not narrow a count
    assert_eq!(
        db.count_of::<User>(ctx, Some(&Query::new().set_limit(1).set_offset(1)))
            .await
            .unwrap(),
        3
    );

    assert!(db
        .exists_of::<User>(ctx, Some(&Query::eq("Name", "Bob")))
        .await
        .unwrap());
    assert!(!db
        .exists_of::<User>(ctx, Some(&Query::eq("Name", "Nobody")))
        .await
        .unwrap());
}

async fn duplicates(db: &dyn Database, ctx: &Context, alice: i64) {
    let mut clash = User::new("Other", "bob@test.com", 50);
    let err = db.create(ctx, &mut clash).await.unwrap_err();
    assert!(err.is_already_exists(), "expected AlreadyExists, got {err:?}");

    let mut same_key = User::new("Twin", "twin@test.com", 20);
    same_key.id = alice;
    let err = db.create(ctx, &mut same_key).await.unwrap_err();
    assert!(err.is_already_exists(), "expected AlreadyExists, got {err:?}");

    assert_eq!(db.count_of::<User>(ctx, None).await.unwrap(), 3);
}

async fn missing_keys(db: &dyn Database, ctx: &Context) {
    let mut ghost = User::new("Ghost", "ghost@test.com", 1);
    ghost.id = 424_242;
    let err = db.update(ctx, &mut ghost).await.unwrap_err();
    assert!(err.is_not_found(), "expected NotFound, got {err:?}");

    let err = db
        .delete(ctx, &mut ghost, &DatabaseValue::Long(424_242))
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "expected NotFound, got {err:?}");

    // Save inserts when the key is new
    db.save(ctx, &mut ghost).await.expect("save inserts");
    let loaded: User = db.get_as(ctx, &DatabaseValue::Long(424_242)).await.unwrap();
    assert_eq!(loaded.name, "Ghost");
    db.delete(ctx, &mut ghost, &DatabaseValue::Long(424_242))
        .await
        .unwrap();
}

async fn partial_update(db: &dyn Database, ctx: &Context, alice: i64) {
    let mut user: User = db.get_as(ctx, &alice.into()).await.unwrap();
    user.age = 26;
    user.name = "Not Written".to_string();
    db.update_fields(ctx, &mut user, &["Age"])
        .await
        .expect("partial update");

    let stored: User = db.get_as(ctx, &alice.into()).await.unwrap();
    assert_eq!(stored.age, 26);
    assert_eq!(stored.name, "Alice Saved");

    let err = db
        .update_fields(ctx, &mut user, &["Nickname"])
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::InvalidModel), "expected InvalidModel, got {err:?}");

    let mut ghost = User::new("Ghost", "ghost@test.com", 1);
    ghost.id = 515_151;
    let err = db.update_fields(ctx, &mut ghost, &["Age"]).await.unwrap_err();
    assert!(err.is_not_found(), "expected NotFound, got {err:?}");
}

async fn transaction_commit(db: &dyn Database, ctx: &Context) {
    let tx_ctx = ctx.clone();
    db.run_transaction(ctx, move |tx| {
        Box::pin(async move {
            let mut user = User::new("TxCommit", "txcommit@test.com", 40);
            tx.create(&tx_ctx, &mut user).await?;
            // Reads inside the transaction see its own writes
            let seen: User = tx
                .find_one_as(&tx_ctx, Some(&Query::eq("Email", "txcommit@test.com")))
                .await?;
            assert_eq!(seen.id, user.id);
            Ok(())
        })
    })
    .await
    .expect("transaction should commit");

    let user: User = db
        .find_one_as(ctx, Some(&Query::eq("Email", "txcommit@test.com")))
        .await
        .unwrap();
    assert_eq!(user.name, "TxCommit");
}

async fn transaction_rollback(db: &dyn Database, ctx: &Context) {
    let before = db.count_of::<User>(ctx, None).await.unwrap();

    let tx_ctx = ctx.clone();
    let err = db
        .run_transaction(ctx, move |tx| {
            Box::pin(async move {
                let mut user = User::new("TxRollback", "txr@test.com", 41);
                tx.create(&tx_ctx, &mut user).await?;
                Err(DatabaseError::other("abort on purpose"))
            })
        })
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "abort on purpose");

    assert_eq!(db.count_of::<User>(ctx, None).await.unwrap(), before);
    assert!(!db
        .exists_of::<User>(ctx, Some(&Query::eq("Email", "txr@test.com")))
        .await
        .unwrap());
}

async fn nested_transaction(db: &dyn Database, ctx: &Context) {
    let tx_ctx = ctx.clone();
    let err = db
        .run_transaction(ctx, move |tx| {
            Box::pin(async move {
                let inner_ctx = tx_ctx.clone();
                tx.run_transaction(&tx_ctx, move |inner| {
                    Box::pin(async move { inner.ping(&inner_ctx).await })
                })
                .await
            })
        })
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::NotSupported), "expected NotSupported, got {err:?}");
}

async fn delete(db: &dyn Database, ctx: &Context) {
    let mut user = User::new("ToDelete", "td@test.com", 50);
    db.create(ctx, &mut user).await.unwrap();
    let id = DatabaseValue::from(user.id);
    db.delete(ctx, &mut user, &id).await.expect("delete");

    let err = db.get_as::<User>(ctx, &id).await.unwrap_err();
    assert!(err.is_not_found(), "expected NotFound, got {err:?}");
}

async fn query_operators(db: &dyn Database, ctx: &Context) {
    let not_bob: Vec<User> = db.find_as(ctx, Some(&Query::ne("Name", "Bob"))).await.unwrap();
    assert!(!not_bob.is_empty());
    assert!(not_bob.iter().all(|u| u.name != "Bob"));

    let listed: Vec<User> = db
        .find_as(ctx, Some(&Query::in_list("Name", ["Bob", "Charlie"])))
        .await
        .unwrap();
    assert_eq!(listed.len(), 2);

    let none: Vec<User> = db
        .find_as(ctx, Some(&Query::in_list("Name", Vec::<&str>::new())))
        .await
        .unwrap();
    assert!(none.is_empty());

    let liked: Vec<User> = db
        .find_as(ctx, Some(&Query::like("Email", "%@TEST.com")))
        .await
        .unwrap();
    assert_eq!(liked.len(), db.count_of::<User>(ctx, None).await.unwrap() as usize);

    let prefixed: Vec<User> = db
        .find_as(ctx, Some(&Query::prefix("Name", "Ch")))
        .await
        .unwrap();
    assert_eq!(prefixed.len(), 1);
    let case_sensitive: Vec<User> = db
        .find_as(ctx, Some(&Query::prefix("Name", "ch")))
        .await
        .unwrap();
    assert!(case_sensitive.is_empty());

    // (Name = Bob OR Name = Charlie) AND Age > 31, folded left to right
    let folded = Query::eq("Name", "Bob")
        .or_where("Name", Operator::Eq, "Charlie")
        .and_where("Age", Operator::Gt, 31);
    let matched: Vec<User> = db.find_as(ctx, Some(&folded)).await.unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].name, "Charlie");

    // A null in a NOT IN list leaves every row unknown
    let some_age = matched[0].age;
    let not_in_null = Query::new().and_where(
        "Age",
        Operator::NotIn,
        vec![DatabaseValue::from(some_age), DatabaseValue::Null],
    );
    let unknown: Vec<User> = db.find_as(ctx, Some(&not_in_null)).await.unwrap();
    assert!(unknown.is_empty(), "NOT IN with null matched {unknown:?}");

    // Numeric text compares as a number against an integer field
    let by_text: Vec<User> = db
        .find_as(ctx, Some(&Query::eq("Age", some_age.to_string())))
        .await
        .unwrap();
    let by_number: Vec<User> = db
        .find_as(ctx, Some(&Query::eq("Age", some_age)))
        .await
        .unwrap();
    assert_eq!(by_text, by_number);
    assert!(!by_text.is_empty());

    let err = db
        .find(ctx, &users(), Some(&Query::eq("Age", "old")))
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::InvalidQuery(_)), "got {err:?}");
    let err = db
        .find(ctx, &users(), Some(&Query::like("Age", "3%")))
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::InvalidQuery(_)), "got {err:?}");

    let mut empty = Query::new();
    assert!(empty.is_empty());
    empty = empty.and_where("Name", Operator::Eq, "test");
    assert!(!empty.is_empty());
}

/// Every operation fails with `Closed` once the handle is closed
pub async fn assert_closed(db: &dyn Database) {
    let ctx = Context::background();
    db.close().await.expect("first close");

    let err = db.ping(&ctx).await.unwrap_err();
    assert!(err.is(ErrorKind::Closed), "ping: expected Closed, got {err:?}");

    let mut user = User::new("Late", "late@test.com", 1);
    let err = db.create(&ctx, &mut user).await.unwrap_err();
    assert!(err.is(ErrorKind::Closed), "create: expected Closed, got {err:?}");

    let err = db.find(&ctx, &users(), None).await.unwrap_err();
    assert!(err.is(ErrorKind::Closed), "find: expected Closed, got {err:?}");
}
