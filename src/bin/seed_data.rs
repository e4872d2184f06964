//! Seed data script - populates the database with demo sales history
//!
//! Run with: cargo run --bin seed-data
//!
//! This creates:
//! - 10 café products (skipped when the catalog already has products)
//! - 60 days of sales, 3 to 10 sale lines per day, 1 to 8 units each,
//!   weighted towards small quantities

use chrono::{Duration, NaiveTime, Utc};
use rand::{distributions::WeightedIndex, prelude::*};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QuerySelect, Set};
use tracing::info;
use uuid::Uuid;

use pos_forecast_api::{
    config, db,
    entities::{product, sale},
};

const HISTORY_DAYS: i64 = 60;
const MAX_PRODUCTS: u64 = 30;
const QUANTITIES: [i32; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
const QUANTITY_WEIGHTS: [u32; 8] = [25, 20, 15, 15, 10, 8, 5, 2];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config()?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    info!("=== POS Forecast Seed Data ===");
    info!("Connecting to database: {}", cfg.database_url());
    let db = db::establish_connection_from_app_config(&cfg).await?;
    db::run_migrations(&db).await?;

    let products = if product::Entity::find().count(&db).await? == 0 {
        info!("Creating products...");
        let created = create_products(&db).await?;
        info!("  Created {} products", created.len());
        created
    } else {
        product::Entity::find().limit(MAX_PRODUCTS).all(&db).await?
    };

    info!("Creating {} days of sales for {} products...", HISTORY_DAYS, products.len());
    let (lines, units) = create_sales(&db, &products).await?;
    info!("  Created {} sale lines ({} units)", lines, units);

    info!("");
    info!("=== Seed Data Complete ===");
    info!("Generate forecasts with:");
    info!("  curl -X POST http://localhost:{}/api/v1/forecasts/generate", cfg.port);
    info!("  cargo run --bin forecast-cli -- generate --force");

    Ok(())
}

async fn create_products(db: &DatabaseConnection) -> anyhow::Result<Vec<product::Model>> {
    let products_data = vec![
        ("Espresso", dec!(2.50), "Coffee"),
        ("Cappuccino", dec!(3.80), "Coffee"),
        ("Flat White", dec!(4.00), "Coffee"),
        ("Cold Brew 500ml", dec!(4.50), "Coffee"),
        ("Earl Grey Tea", dec!(2.90), "Tea"),
        ("Butter Croissant", dec!(2.80), "Bakery"),
        ("Blueberry Muffin", dec!(3.20), "Bakery"),
        ("Sourdough Loaf", dec!(6.50), "Bakery"),
        ("Ham & Cheese Toastie", dec!(6.90), "Kitchen"),
        ("House Blend Beans 1kg", dec!(24.00), "Retail"),
    ];

    let mut created = Vec::new();
    let now = Utc::now();

    for (name, price, category) in products_data {
        let product = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            category: Set(Some(category.to_string())),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        created.push(product.insert(db).await?);
    }

    Ok(created)
}

async fn create_sales(
    db: &DatabaseConnection,
    products: &[product::Model],
) -> anyhow::Result<(usize, i64)> {
    if products.is_empty() {
        return Ok((0, 0));
    }

    let mut rng = StdRng::from_entropy();
    let weights = WeightedIndex::new(QUANTITY_WEIGHTS)?;
    let today = Utc::now().date_naive();
    let mut lines = 0usize;
    let mut units = 0i64;

    for days_ago in (1..=HISTORY_DAYS).rev() {
        let sale_date = (today - Duration::days(days_ago))
            .and_time(NaiveTime::MIN)
            .and_utc();

        let day_lines: Vec<sale::ActiveModel> = (0..rng.gen_range(3..=10))
            .filter_map(|_| {
                let product = products.choose(&mut rng)?;
                let quantity = QUANTITIES[weights.sample(&mut rng)];
                Some(sale::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    product_id: Set(product.id),
                    quantity: Set(quantity),
                    total_price: Set(product.price * Decimal::from(quantity)),
                    sale_date: Set(sale_date),
                })
            })
            .collect();

        lines += day_lines.len();
        units += day_lines
            .iter()
            .filter_map(|line| line.quantity.clone().take())
            .map(i64::from)
            .sum::<i64>();
        sale::Entity::insert_many(day_lines).exec(db).await?;
    }

    Ok((lines, units))
}
