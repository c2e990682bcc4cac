//! # Seed Data Generator
//!
//! Populates a development database with products and received batches.
//!
//! ## Usage
//! ```bash
//! # 40 products, 3 batches each (default)
//! cargo run -p stockwell-db --bin seed
//!
//! # More batches per product
//! cargo run -p stockwell-db --bin seed -- --batches 6
//!
//! # Specify database path
//! cargo run -p stockwell-db --bin seed -- --db ./data/stockwell.db
//! ```
//!
//! ## Generated Data
//! - Products across perishable categories, SKU `{CATEGORY}-{NAME}-{INDEX}`
//! - Per product, batches with staggered expiry dates (some already
//!   expired, so FEFO skipping is visible) and quantities 5 - 60
//! - Every batch goes through `receive_batch`, so each one has its
//!   `receive` movement

use chrono::{Days, Utc};
use std::env;
use stockwell_core::{ActorId, NewBatch};
use stockwell_db::{Database, DbConfig};

/// Product categories for realistic test data
const CATEGORIES: &[(&str, &[&str])] = &[
    (
        "DAI",
        &[
            "Whole Milk",
            "Skim Milk",
            "Oat Milk",
            "Cheddar Cheese",
            "Mozzarella",
            "Butter",
            "Greek Yogurt",
            "Sour Cream",
            "Eggs Dozen",
            "Cottage Cheese",
        ],
    ),
    (
        "BAK",
        &[
            "White Bread",
            "Sourdough",
            "Bagels",
            "Croissants",
            "Tortillas",
            "Muffins",
            "Pita",
            "Rye Bread",
            "Baguette",
            "Brioche",
        ],
    ),
    (
        "PRD",
        &[
            "Bananas",
            "Apples",
            "Spinach",
            "Tomatoes",
            "Strawberries",
            "Avocados",
            "Carrots",
            "Lettuce",
            "Blueberries",
            "Grapes",
        ],
    ),
    (
        "MEA",
        &[
            "Chicken Breast",
            "Ground Beef",
            "Salmon Fillet",
            "Pork Chops",
            "Turkey Slices",
            "Bacon",
            "Sausages",
            "Ham",
            "Shrimp",
            "Lamb Chops",
        ],
    ),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut batches_per_product: usize = 3;
    let mut db_path = String::from("./stockwell_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--batches" | "-b" => {
                if i + 1 < args.len() {
                    batches_per_product = args[i + 1].parse().unwrap_or(3);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Stockwell Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -b, --batches <N>  Batches per product (default: 3)");
                println!("  -d, --db <PATH>    Database file path (default: ./stockwell_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Stockwell Seed Data Generator");
    println!("=============================");
    println!("Database: {}", db_path);
    println!("Batches per product: {}", batches_per_product);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.products().count().await?;
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let service = db.fulfillment();
    let actor = ActorId::from("seed");
    let today = service.today();

    let mut products = 0;
    let mut batches = 0;
    let start = std::time::Instant::now();

    for (category_code, names) in CATEGORIES {
        for (index, name) in names.iter().enumerate() {
            let sku = format!(
                "{}-{}-{:03}",
                category_code,
                name.replace(' ', "").chars().take(4).collect::<String>().to_uppercase(),
                index
            );
            let product = match db.products().create(&sku, name).await {
                Ok(product) => product,
                Err(e) => {
                    eprintln!("Failed to create {}: {}", sku, e);
                    continue;
                }
            };
            products += 1;

            for n in 0..batches_per_product {
                let seed = products * 31 + n * 7;
                let new_batch = NewBatch {
                    batch_code: format!("{}-L{:02}", product.sku, n + 1),
                    product_id: product.id.clone(),
                    expiry_date: expiry_for(today, n),
                    unit_cost_cents: 80 + (seed % 400) as i64,
                    unit_price_cents: 150 + (seed % 650) as i64,
                    quantity: 5 + (seed % 56) as i64,
                };

                if let Err(e) = service.receive_batch(&new_batch, &actor).await {
                    eprintln!("Failed to receive {}: {}", new_batch.batch_code, e);
                    continue;
                }
                batches += 1;
            }
        }
    }

    let elapsed = start.elapsed();
    println!();
    println!("✓ Created {} products and {} batches in {:?}", products, batches, elapsed);
    println!("  Movements logged: {}", db.movements().count().await?);
    println!("  Seeded at: {}", Utc::now().to_rfc3339());

    Ok(())
}

/// The first batch of every product is already a day past expiry; later
/// ones expire a week apart.
fn expiry_for(today: chrono::NaiveDate, n: usize) -> chrono::NaiveDate {
    if n == 0 {
        today.checked_sub_days(Days::new(1)).unwrap_or(today)
    } else {
        today
            .checked_add_days(Days::new(7 * n as u64))
            .unwrap_or(today)
    }
}
