//! Basic usage example
//!
//! This example walks through the everyday operations on every compiled-in
//! driver:
//! - Opening a database through the registry
//! - Migrating a model
//! - Creating, reading, updating and deleting records
//! - Querying with conditions, ordering and pagination
//!
//! Run with: cargo run --example basic_usage

use dbase::prelude::*;

#[derive(Debug, Default)]
struct Product {
    id: i64,
    name: String,
    price: f64,
    stock: i64,
}

impl Product {
    fn new(name: &str, price: f64, stock: i64) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            price,
            stock,
        }
    }
}

impl Hooks for Product {
    fn before_save(&mut self, _ctx: &Context) -> Result<()> {
        if self.price < 0.0 {
            return Err(DatabaseError::invalid_model("price must not be negative"));
        }
        self.name = self.name.trim().to_string();
        Ok(())
    }
}

impl Model for Product {
    fn schema(&self) -> ModelSchema {
        ModelSchema::new("products")
            .field(
                FieldDef::new("ID", FieldType::Integer)
                    .primary_key()
                    .auto_increment(),
            )
            .field(FieldDef::new("Name", FieldType::Text).unique())
            .field(FieldDef::new("Price", FieldType::Real))
            .field(FieldDef::new("Stock", FieldType::Integer).indexed())
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
            ("Price".to_string(), self.price.into()),
            ("Stock".to_string(), self.stock.into()),
        ])
    }

    fn load(&mut self, record: &Record) -> Result<()> {
        self.id = record.long("ID")?;
        self.name = record.string("Name")?;
        self.price = record.double("Price")?;
        self.stock = record.long("Stock")?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== dbase - Basic Usage Example ===\n");
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

    println!("1. Opening an in-memory database...");
    let db = dbase::open(&Config::new(driver)).await?;
    db.ping(&ctx).await?;
    println!("   ✓ Opened ({})\n", db.driver());

    println!("2. Migrating the products model...");
    db.migrate_models::<Product>(&ctx).await?;
    println!("   ✓ Migrated\n");

    println!("3. Creating products...");
    for (name, price, stock) in [
        (" Keyboard ", 49.90, 12),
        ("Mouse", 19.50, 40),
        ("Monitor", 229.00, 3),
        ("Cable", 4.99, 0),
    ] {
        let mut product = Product::new(name, price, stock);
        db.create(&ctx, &mut product).await?;
        println!("   ✓ #{} {}", product.id, product.name);
    }

    let mut duplicate = Product::new("Mouse", 1.0, 1);
    match db.create(&ctx, &mut duplicate).await {
        Err(e) if e.is_already_exists() => println!("   ✗ Duplicate name rejected: {}", e),
        other => println!("   ? Unexpected result: {:?}", other),
    }
    println!();

    println!("4. Reading by primary key...");
    let keyboard: Product = db.get_as(&ctx, &DatabaseValue::Long(1)).await?;
    println!("   Found: {:?}", keyboard);
    match db.get_as::<Product>(&ctx, &DatabaseValue::Long(99)).await {
        Err(e) if e.is_not_found() => println!("   No product #99\n"),
        other => println!("   ? Unexpected result: {:?}\n", other.map(|p| p.name)),
    }

    println!("5. Querying in-stock products under $100, cheapest first...");
    let query = Query::gt("Stock", 0)
        .and_where("Price", Operator::Lt, 100)
        .order_by_asc("Price");
    for product in db.find_as::<Product>(&ctx, Some(&query)).await? {
        println!("   - {} ${:.2} ({} left)", product.name, product.price, product.stock);
    }
    println!();

    println!("6. Paging through products by name, two at a time...");
    let total = db.count_of::<Product>(&ctx, None).await?;
    for offset in (0..total as usize).step_by(2) {
        let page = Query::new().order_by_asc("Name").set_limit(2).set_offset(offset);
        let names: Vec<String> = db
            .find_as::<Product>(&ctx, Some(&page))
            .await?
            .into_iter()
            .map(|p| p.name)
            .collect();
        println!("   offset {}: {:?}", offset, names);
    }
    println!();

    println!("7. Restocking the monitor (partial update)...");
    let mut monitor: Product = db.find_one_as(&ctx, Some(&Query::eq("Name", "Monitor"))).await?;
    monitor.stock += 10;
    db.update_fields(&ctx, &mut monitor, &["Stock"]).await?;
    let monitor: Product = db.get_as(&ctx, &monitor.id.into()).await?;
    println!("   ✓ Monitor stock is now {}\n", monitor.stock);

    println!("8. Deleting sold-out products...");
    let sold_out: Vec<Product> = db.find_as(&ctx, Some(&Query::eq("Stock", 0))).await?;
    for mut product in sold_out {
        let id = product.primary_key();
        db.delete(&ctx, &mut product, &id).await?;
        println!("   ✓ Deleted {}", product.name);
    }
    println!();

    println!("9. Final count...");
    println!("   Remaining products: {}\n", db.count_of::<Product>(&ctx, None).await?);

    println!("10. Closing...");
    db.close().await?;
    println!("    ✓ Closed\n");
    Ok(())
}
