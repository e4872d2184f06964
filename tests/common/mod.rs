#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use uuid::Uuid;

use pos_forecast_api::{
    config::AppConfig,
    db,
    entities::{
        forecast::{self, ForecastAlgorithm},
        product, sale,
    },
    services::forecasting::ForecastService,
    AppState,
};

/// Application state over a throwaway SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    worker: JoinHandle<()>,
    _dir: TempDir,
}

impl TestApp {
    /// Fresh database, migrations applied, opportunistic generation off.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let db_path = dir.path().join("forecast_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.forecasting.auto_generate = false;
        customize(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (state, worker) = AppState::new(Arc::new(pool), cfg);
        let router = pos_forecast_api::app_router(state.clone());

        Self {
            router,
            state,
            worker,
            _dir: dir,
        }
    }

    pub fn service(&self) -> &ForecastService {
        &self.state.forecasts
    }

    pub fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_product(&self, name: &str, price: Decimal) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            category: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed product")
    }

    /// One sale line per day for the `days` days before today, quantities
    /// cycling through a weekly pattern around `base`.
    pub async fn seed_daily_sales(&self, product_id: Uuid, days: i64, base: i32) {
        let now = Utc::now();
        let lines: Vec<sale::ActiveModel> = (1..=days)
            .map(|back| {
                let quantity = base + (back % 7) as i32;
                sale_line(product_id, quantity, now - Duration::days(back))
            })
            .collect();
        sale::Entity::insert_many(lines)
            .exec(self.state.db.as_ref())
            .await
            .expect("seed sales");
    }

    /// `count` sale lines, all dated `days_ago`.
    pub async fn seed_sales_on_one_day(&self, product_id: Uuid, count: usize, days_ago: i64) {
        let at = Utc::now() - Duration::days(days_ago);
        let lines: Vec<sale::ActiveModel> =
            (0..count).map(|_| sale_line(product_id, 3, at)).collect();
        sale::Entity::insert_many(lines)
            .exec(self.state.db.as_ref())
            .await
            .expect("seed sales");
    }

    /// A single sale line of `quantity` units dated `days_ago`.
    pub async fn seed_sale(&self, product_id: Uuid, quantity: i32, days_ago: i64) {
        sale_line(product_id, quantity, Utc::now() - Duration::days(days_ago))
            .insert(self.state.db.as_ref())
            .await
            .expect("seed sale");
    }

    pub async fn insert_forecast(
        &self,
        product_id: Uuid,
        date: NaiveDate,
        quantity: i32,
        algorithm: ForecastAlgorithm,
    ) -> forecast::Model {
        forecast::ActiveModel {
            product_id: Set(product_id),
            forecast_date: Set(date),
            predicted_quantity: Set(quantity),
            algorithm: Set(algorithm),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("insert forecast")
    }

    pub async fn all_forecasts(&self) -> Vec<forecast::Model> {
        forecast::Entity::find()
            .all(self.state.db.as_ref())
            .await
            .expect("load forecasts")
    }

    pub async fn forecasts_for(&self, product_id: Uuid) -> Vec<forecast::Model> {
        self.all_forecasts()
            .await
            .into_iter()
            .filter(|row| row.product_id == product_id)
            .collect()
    }

    /// Polls until no generation run is in flight.
    pub async fn wait_until_idle(&self) {
        for _ in 0..400 {
            if !self.state.scheduler.is_running() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        panic!("forecast generation did not finish in time");
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

fn sale_line(product_id: Uuid, quantity: i32, at: chrono::DateTime<Utc>) -> sale::ActiveModel {
    sale::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        quantity: Set(quantity),
        total_price: Set(Decimal::from(quantity)),
        sale_date: Set(at),
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
