//! Transaction example
//!
//! This example moves money between accounts inside transactions:
//! - A transfer that commits
//! - A transfer that fails and rolls back every write it made
//! - Classifying the failure once the transaction returns
//!
//! Run with: cargo run --example transactions

use dbase::prelude::*;

#[derive(Debug, Default)]
struct Account {
    id: i64,
    owner: String,
    balance: f64,
}

impl Hooks for Account {}

impl Model for Account {
    fn schema(&self) -> ModelSchema {
        ModelSchema::new("accounts")
            .field(FieldDef::new("ID", FieldType::Integer).primary_key())
            .field(FieldDef::new("Owner", FieldType::Text))
            .field(FieldDef::new("Balance", FieldType::Real))
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
            ("Owner".to_string(), self.owner.clone().into()),
            ("Balance".to_string(), self.balance.into()),
        ])
    }

    fn load(&mut self, record: &Record) -> Result<()> {
        self.id = record.long("ID")?;
        self.owner = record.string("Owner")?;
        self.balance = record.double("Balance")?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== dbase - Transaction Example ===\n");
    dbase::backends::register_builtin_drivers();

    for driver in dbase::drivers() {
        println!("--- driver: {} ---\n", driver);
        run(&driver).await?;
    }

    println!("=== Example completed successfully! ===");
    Ok(())
}

async fn run(driver: &str) -> Result<()> {
    let ctx = Context::background();
    let db = dbase::open(&Config::new(driver)).await?;
    db.migrate_models::<Account>(&ctx).await?;

    println!("1. Setting up accounts...");
    for (id, owner, balance) in [(1, "Alice", 1000.0), (2, "Bob", 500.0), (3, "Charlie", 750.0)] {
        let mut account = Account {
            id,
            owner: owner.to_string(),
            balance,
        };
        db.create(&ctx, &mut account).await?;
    }
    println!("   ✓ Accounts created\n");
    print_balances(db.as_ref(), &ctx).await?;

    println!("\n2. Successful transfer (Alice -> Bob: $100)");
    match transfer(db.as_ref(), &ctx, 1, 2, 100.0).await {
        Ok(()) => println!("   ✓ Transaction committed"),
        Err(e) => println!("   ✗ Transaction rolled back: {}", e),
    }
    print_balances(db.as_ref(), &ctx).await?;

    println!("\n3. Failed transfer (Bob -> Alice: $1000, insufficient funds)");
    match transfer(db.as_ref(), &ctx, 2, 1, 1000.0).await {
        Ok(()) => println!("   ✓ Transaction committed"),
        Err(e) => println!("   ✗ Transaction rolled back: {}", e),
    }
    print_balances(db.as_ref(), &ctx).await?;

    println!("\n4. Transfer to a missing account (Charlie -> #42: $50)");
    match transfer(db.as_ref(), &ctx, 3, 42, 50.0).await {
        Err(e) if e.is_not_found() => println!("   ✗ Rolled back, no such account: {}", e),
        other => println!("   ? Unexpected result: {:?}", other),
    }
    print_balances(db.as_ref(), &ctx).await?;

    let total: f64 = db
        .find_as::<Account>(&ctx, None)
        .await?
        .iter()
        .map(|a| a.balance)
        .sum();
    println!("\n   Total money in the system: ${:.2} (unchanged)\n", total);

    db.close().await
}

/// Debit `from` and credit `to` atomically
async fn transfer(db: &dyn Database, ctx: &Context, from: i64, to: i64, amount: f64) -> Result<()> {
    let tx_ctx = ctx.clone();
    db.run_transaction(ctx, move |tx| {
        Box::pin(async move {
            let mut source: Account = tx.get_as(&tx_ctx, &from.into()).await?;
            source.balance -= amount;
            tx.update_fields(&tx_ctx, &mut source, &["Balance"]).await?;

            // The debit above is discarded if anything below fails
            let mut target: Account = tx.get_as(&tx_ctx, &to.into()).await?;
            target.balance += amount;
            tx.update_fields(&tx_ctx, &mut target, &["Balance"]).await?;

            if source.balance < 0.0 {
                return Err(DatabaseError::other(format!(
                    "insufficient funds: {} would be left with ${:.2}",
                    source.owner, source.balance
                )));
            }
            Ok(())
        })
    })
    .await
}

async fn print_balances(db: &dyn Database, ctx: &Context) -> Result<()> {
    println!("   Current balances:");
    let accounts: Vec<Account> = db
        .find_as(ctx, Some(&Query::new().order_by_asc("ID")))
        .await?;
    for account in accounts {
        println!("   - {}: ${:.2}", account.owner, account.balance);
    }
    Ok(())
}
