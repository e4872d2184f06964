//! Forecast store and generation.
//!
//! `ForecastService` owns the `forecasts` table: it turns sales history into
//! two 30-day daily forecasts per product (one per algorithm), replaces stale
//! rows, and serves the read side. The scheduler decides when the batch runs.

pub mod history;
pub mod scheduler;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveValue::NotSet, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::config::ForecastingConfig;
use crate::entities::forecast::{self, ForecastAlgorithm};
use crate::entities::{product, sale};
use crate::errors::ServiceError;
use crate::metrics::FORECAST_METRICS;
use crate::ml::{distribute, estimate_product, DailySeries, ProductEstimates, FORECAST_DAYS};

pub use history::{DbSalesLedger, SalesLedger};
pub use scheduler::{
    BatchRunner, DbForecastStateStore, ForecastScheduler, ForecastSettings, ForecastStateStore,
    ForecastStatus, LastRun, SingleFlight, SingleFlightPermit, TriggerOutcome,
};

/// Default page size: 30 days for each of the two algorithms.
pub const DEFAULT_PAGE_SIZE: u64 = 60;
pub const MAX_PAGE_SIZE: u64 = 500;
/// Listing starts this many days in the past unless `from` is given.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;
/// Window of the dashboard summary, both backwards and forwards.
pub const SUMMARY_WINDOW_DAYS: i64 = 30;

/// Outcome of a generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BatchResult {
    pub forecasts_generated: u64,
    pub products_processed: u64,
    /// One `"Product {id}: {reason}"` entry per skipped product.
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CleanupResult {
    pub cutoff: NaiveDate,
    pub matched: u64,
    pub deleted: u64,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ForecastQuery {
    pub product_id: Option<Uuid>,
    pub algorithm: Option<ForecastAlgorithm>,
    /// Inclusive lower bound; defaults to seven days ago
    pub from: Option<NaiveDate>,
    /// Inclusive upper bound
    pub to: Option<NaiveDate>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ForecastView {
    pub id: i32,
    pub product_id: Uuid,
    pub forecast_date: NaiveDate,
    pub predicted_quantity: i32,
    pub algorithm: ForecastAlgorithm,
    pub created_at: DateTime<Utc>,
}

impl From<forecast::Model> for ForecastView {
    fn from(model: forecast::Model) -> Self {
        Self {
            id: model.id,
            product_id: model.product_id,
            forecast_date: model.forecast_date,
            predicted_quantity: model.predicted_quantity,
            algorithm: model.algorithm,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastPage {
    pub items: Vec<ForecastView>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ForecastDetail {
    #[serde(flatten)]
    pub forecast: ForecastView,
    pub product_name: String,
    pub unit_price: Decimal,
    pub predicted_revenue: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DailyUnits {
    pub date: NaiveDate,
    pub units: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AlgorithmDailyUnits {
    pub date: NaiveDate,
    pub algorithm: ForecastAlgorithm,
    pub units: i64,
}

/// Dashboard figures: recent actuals next to upcoming forecasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ForecastSummary {
    pub as_of: NaiveDate,
    pub historical_sales: Vec<DailyUnits>,
    pub forecast_totals: Vec<AlgorithmDailyUnits>,
    pub total_predicted_units: i64,
    pub total_projected_revenue: Decimal,
}

#[derive(Clone)]
pub struct ForecastService {
    db: Arc<DatabaseConnection>,
    ledger: Arc<dyn SalesLedger>,
    config: ForecastingConfig,
}

impl ForecastService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        ledger: Arc<dyn SalesLedger>,
        config: ForecastingConfig,
    ) -> Self {
        Self { db, ledger, config }
    }

    /// Service reading history straight from the `sales` table.
    pub fn with_db_ledger(db: Arc<DatabaseConnection>, config: ForecastingConfig) -> Self {
        let ledger = Arc::new(DbSalesLedger::new(Arc::clone(&db)));
        Self::new(db, ledger, config)
    }

    pub fn config(&self) -> &ForecastingConfig {
        &self.config
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    /// Regenerates forecasts for the top-N products by sale count.
    ///
    /// Products that cannot be forecast are reported in `errors` and do not
    /// stop the run. Only the global delete steps abort it.
    #[instrument(skip(self))]
    pub async fn generate_all(&self) -> Result<BatchResult, ServiceError> {
        let started = Instant::now();
        let today = Self::today();
        info!(%today, top_products = self.config.top_products, "Starting forecast generation");

        let purged = self.delete_past(today).await?;
        debug!(purged, "Removed past forecasts");

        let products = self
            .ledger
            .top_products_by_sale_count(u64::from(self.config.top_products))
            .await?;

        if !products.is_empty() {
            let cleared = forecast::Entity::delete_many()
                .filter(forecast::Column::ProductId.is_in(products.iter().copied()))
                .filter(forecast::Column::ForecastDate.gte(today))
                .exec(&*self.db)
                .await
                .map_err(ServiceError::db_error)?
                .rows_affected;
            debug!(cleared, "Removed future forecasts of selected products");
        }

        let mut result = BatchResult {
            products_processed: products.len() as u64,
            ..BatchResult::default()
        };

        for product_id in products {
            match self.forecast_product(product_id, today).await {
                Ok(rows) => result.forecasts_generated += rows,
                Err(e) => {
                    warn!(%product_id, error = %e, "Skipping product");
                    result.errors.push(format!("Product {}: {}", product_id, e));
                }
            }
        }

        FORECAST_METRICS.record_batch(
            started.elapsed(),
            result.forecasts_generated,
            result.errors.len() as u64,
        );
        info!(
            forecasts_generated = result.forecasts_generated,
            products_processed = result.products_processed,
            errors = result.errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Forecast generation finished"
        );
        Ok(result)
    }

    /// Regenerates one product's forecasts, failing instead of skipping when
    /// its history is too short.
    #[instrument(skip(self))]
    pub async fn generate_for_product(&self, product_id: Uuid) -> Result<BatchResult, ServiceError> {
        let today = Self::today();

        if self.ledger.product(product_id).await?.is_none() {
            return Err(ServiceError::NotFound(format!(
                "Product {} not found",
                product_id
            )));
        }

        let sales = self.ledger.sales_for_product(product_id).await?;
        if sales.is_empty() {
            return Err(ServiceError::InsufficientData(
                "no sales data available".to_string(),
            ));
        }
        let series = DailySeries::from_sales(&sales)
            .map_err(|e| ServiceError::InsufficientData(format!("insufficient data: {}", e)))?;

        let estimates = estimate_off_thread(series).await?;

        self.delete_past(today).await?;
        let written = self.replace_future(product_id, &estimates, today).await?;

        FORECAST_METRICS.rows_written.inc_by(written);
        info!(%product_id, written, "Generated forecasts for product");
        Ok(BatchResult {
            forecasts_generated: written,
            products_processed: 1,
            errors: Vec::new(),
        })
    }

    /// Removes rows dated more than `days` days before today.
    #[instrument(skip(self))]
    pub async fn cleanup_older_than(
        &self,
        days: u32,
        dry_run: bool,
    ) -> Result<CleanupResult, ServiceError> {
        let cutoff = Self::today() - Duration::days(i64::from(days));

        let matched = forecast::Entity::find()
            .filter(forecast::Column::ForecastDate.lt(cutoff))
            .count(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        let deleted = if dry_run || matched == 0 {
            0
        } else {
            forecast::Entity::delete_many()
                .filter(forecast::Column::ForecastDate.lt(cutoff))
                .exec(&*self.db)
                .await
                .map_err(ServiceError::db_error)?
                .rows_affected
        };

        info!(%cutoff, matched, deleted, dry_run, "Forecast cleanup");
        Ok(CleanupResult {
            cutoff,
            matched,
            deleted,
            dry_run,
        })
    }

    #[instrument(skip(self))]
    pub async fn list_forecasts(&self, query: ForecastQuery) -> Result<ForecastPage, ServiceError> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let from = query
            .from
            .unwrap_or_else(|| Self::today() - Duration::days(DEFAULT_LOOKBACK_DAYS));

        if let Some(to) = query.to {
            if to < from {
                return Err(ServiceError::InvalidInput(format!(
                    "`to` ({}) is before `from` ({})",
                    to, from
                )));
            }
        }

        let mut select = forecast::Entity::find().filter(forecast::Column::ForecastDate.gte(from));
        if let Some(to) = query.to {
            select = select.filter(forecast::Column::ForecastDate.lte(to));
        }
        if let Some(product_id) = query.product_id {
            select = select.filter(forecast::Column::ProductId.eq(product_id));
        }
        if let Some(algorithm) = query.algorithm {
            select = select.filter(forecast::Column::Algorithm.eq(algorithm));
        }

        let paginator = select
            .order_by_desc(forecast::Column::ForecastDate)
            .order_by_desc(forecast::Column::CreatedAt)
            .order_by_asc(forecast::Column::Id)
            .paginate(&*self.db, limit);

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let items = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(ForecastView::from)
            .collect();

        Ok(ForecastPage {
            items,
            total,
            page,
            limit,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_forecast(&self, id: i32) -> Result<ForecastDetail, ServiceError> {
        let (row, product) = forecast::Entity::find_by_id(id)
            .find_also_related(product::Entity)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Forecast {} not found", id)))?;

        let product = product.ok_or_else(|| {
            ServiceError::NotFound(format!("Product {} not found", row.product_id))
        })?;

        Ok(ForecastDetail {
            predicted_revenue: Decimal::from(row.predicted_quantity) * product.price,
            unit_price: product.price,
            product_name: product.name,
            forecast: row.into(),
        })
    }

    /// Actual daily units over the last 30 days and forecast totals over
    /// `[today, today + 30]`.
    #[instrument(skip(self))]
    pub async fn summary(&self) -> Result<ForecastSummary, ServiceError> {
        let today = Self::today();
        let since = (today - Duration::days(SUMMARY_WINDOW_DAYS))
            .and_time(NaiveTime::MIN)
            .and_utc();
        let until = today + Duration::days(SUMMARY_WINDOW_DAYS);

        let sales = sale::Entity::find()
            .filter(sale::Column::SaleDate.gte(since))
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut per_day: BTreeMap<NaiveDate, i64> = BTreeMap::new();
        for row in sales {
            *per_day.entry(row.sale_date.date_naive()).or_insert(0) += i64::from(row.quantity);
        }

        let upcoming = forecast::Entity::find()
            .filter(forecast::Column::ForecastDate.gte(today))
            .filter(forecast::Column::ForecastDate.lte(until))
            .find_also_related(product::Entity)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut per_algorithm: BTreeMap<(NaiveDate, &'static str), (ForecastAlgorithm, i64)> =
            BTreeMap::new();
        let mut total_units = 0i64;
        let mut total_revenue = Decimal::ZERO;
        for (row, product) in upcoming {
            let units = i64::from(row.predicted_quantity);
            per_algorithm
                .entry((row.forecast_date, row.algorithm.as_str()))
                .or_insert((row.algorithm, 0))
                .1 += units;
            total_units += units;
            if let Some(product) = product {
                total_revenue += Decimal::from(row.predicted_quantity) * product.price;
            }
        }

        Ok(ForecastSummary {
            as_of: today,
            historical_sales: per_day
                .into_iter()
                .map(|(date, units)| DailyUnits { date, units })
                .collect(),
            forecast_totals: per_algorithm
                .into_iter()
                .map(|((date, _), (algorithm, units))| AlgorithmDailyUnits {
                    date,
                    algorithm,
                    units,
                })
                .collect(),
            total_predicted_units: total_units,
            total_projected_revenue: total_revenue,
        })
    }

    /// History → estimates → rows, for one product inside a batch.
    async fn forecast_product(&self, product_id: Uuid, today: NaiveDate) -> Result<u64, ServiceError> {
        let sales = self.ledger.sales_for_product(product_id).await?;
        if sales.is_empty() {
            return Err(ServiceError::InsufficientData(
                "no sales data available".to_string(),
            ));
        }
        let series = DailySeries::from_sales(&sales)
            .map_err(|e| ServiceError::InsufficientData(e.to_string()))?;
        let estimates = estimate_off_thread(series).await?;
        self.replace_future(product_id, &estimates, today).await
    }

    async fn delete_past(&self, today: NaiveDate) -> Result<u64, ServiceError> {
        Ok(forecast::Entity::delete_many()
            .filter(forecast::Column::ForecastDate.lt(today))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .rows_affected)
    }

    /// Swaps the product's future rows for freshly distributed ones in one
    /// transaction.
    async fn replace_future(
        &self,
        product_id: Uuid,
        estimates: &ProductEstimates,
        today: NaiveDate,
    ) -> Result<u64, ServiceError> {
        let rows = forecast_rows(product_id, estimates, today, Utc::now());
        let count = rows.len() as u64;

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        forecast::Entity::delete_many()
            .filter(forecast::Column::ProductId.eq(product_id))
            .filter(forecast::Column::ForecastDate.gte(today))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        forecast::Entity::insert_many(rows)
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        Ok(count)
    }
}

#[async_trait]
impl BatchRunner for ForecastService {
    async fn run_batch(&self) -> Result<BatchResult, ServiceError> {
        self.generate_all().await
    }
}

/// Model fitting is CPU-bound; keep it off the async workers.
async fn estimate_off_thread(series: DailySeries) -> Result<ProductEstimates, ServiceError> {
    let estimates = tokio::task::spawn_blocking(move || estimate_product(&series)).await?;
    for estimate in [estimates.tree, estimates.seasonal] {
        if estimate.source.is_fallback() {
            FORECAST_METRICS.record_fallback();
        }
    }
    debug!(
        tree = estimates.tree.quantity,
        tree_source = ?estimates.tree.source,
        seasonal = estimates.seasonal.quantity,
        seasonal_source = ?estimates.seasonal.source,
        "Estimated 30-day demand"
    );
    Ok(estimates)
}

/// `FORECAST_DAYS` rows per algorithm, starting today.
fn forecast_rows(
    product_id: Uuid,
    estimates: &ProductEstimates,
    today: NaiveDate,
    created_at: DateTime<Utc>,
) -> Vec<forecast::ActiveModel> {
    let mut rows = Vec::with_capacity(2 * FORECAST_DAYS as usize);
    for algorithm in ForecastAlgorithm::ALL {
        let estimate = match algorithm {
            ForecastAlgorithm::Tree => estimates.tree,
            ForecastAlgorithm::Seasonal => estimates.seasonal,
        };
        rows.extend(
            distribute(estimate.quantity, algorithm, today)
                .into_iter()
                .map(|day| forecast::ActiveModel {
                    id: NotSet,
                    product_id: Set(product_id),
                    forecast_date: Set(day.date),
                    predicted_quantity: Set(i32::try_from(day.quantity).unwrap_or(i32::MAX)),
                    algorithm: Set(algorithm),
                    created_at: Set(created_at),
                }),
        );
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{Estimate, EstimateSource, SalePoint};
    use crate::services::forecasting::history::MockSalesLedger;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use sea_orm::{ActiveModelTrait, ConnectOptions, Database};
    use sea_orm_migration::MigratorTrait;

    fn catalog_entry(id: Uuid) -> product::Model {
        product::Model {
            id,
            name: "Drip coffee".to_string(),
            price: dec!(2.50),
            category: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn history(days: i64) -> Vec<SalePoint> {
        let today = Utc::now().date_naive();
        (1..=days)
            .map(|back| SalePoint::new(today - Duration::days(back), 5 + back % 4))
            .collect()
    }

    async fn memory_db() -> Arc<DatabaseConnection> {
        let mut opt = ConnectOptions::new("sqlite::memory:".to_string());
        opt.max_connections(1).min_connections(1);
        let db = Database::connect(opt).await.unwrap();
        crate::migrator::Migrator::up(&db, None).await.unwrap();
        Arc::new(db)
    }

    #[tokio::test]
    async fn single_product_requires_catalog_entry() {
        let mut ledger = MockSalesLedger::new();
        ledger.expect_product().returning(|_| Ok(None));
        ledger.expect_sales_for_product().never();

        let service = ForecastService::new(
            Arc::new(DatabaseConnection::Disconnected),
            Arc::new(ledger),
            ForecastingConfig::default(),
        );

        let result = service.generate_for_product(Uuid::new_v4()).await;
        assert_matches!(result, Err(ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn single_product_without_sales_is_insufficient() {
        let mut ledger = MockSalesLedger::new();
        ledger
            .expect_product()
            .returning(|id| Ok(Some(catalog_entry(id))));
        ledger.expect_sales_for_product().returning(|_| Ok(Vec::new()));

        let service = ForecastService::new(
            Arc::new(DatabaseConnection::Disconnected),
            Arc::new(ledger),
            ForecastingConfig::default(),
        );

        let result = service.generate_for_product(Uuid::new_v4()).await;
        assert_matches!(
            result,
            Err(ServiceError::InsufficientData(msg)) if msg == "no sales data available"
        );
    }

    #[tokio::test]
    async fn batch_records_per_product_failures_and_continues() {
        let db = memory_db().await;
        let good = Uuid::new_v4();
        let broken = Uuid::new_v4();
        for id in [good, broken] {
            product::ActiveModel {
                id: Set(id),
                name: Set(format!("Product {}", id)),
                price: Set(dec!(1)),
                category: Set(None),
                created_at: Set(Utc::now()),
                updated_at: Set(None),
            }
            .insert(&*db)
            .await
            .unwrap();
        }

        let mut ledger = MockSalesLedger::new();
        ledger
            .expect_top_products_by_sale_count()
            .withf(|limit| *limit == 50)
            .returning(move |_| Ok(vec![good, broken]));
        ledger.expect_sales_for_product().returning(move |id| {
            if id == good {
                Ok(history(40))
            } else {
                Err(ServiceError::InternalError("ledger offline".to_string()))
            }
        });

        let service = ForecastService::new(db, Arc::new(ledger), ForecastingConfig::default());
        let result = service.generate_all().await.unwrap();

        assert_eq!(result.products_processed, 2);
        assert_eq!(result.forecasts_generated, 60);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with(&format!("Product {}:", broken)));
        assert!(result.errors[0].contains("ledger offline"));
    }

    #[test]
    fn one_row_per_day_and_algorithm() {
        let estimates = ProductEstimates {
            tree: Estimate {
                quantity: 100,
                source: EstimateSource::TreeModel,
            },
            seasonal: Estimate {
                quantity: 40,
                source: EstimateSource::LinearTrend,
            },
        };
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let rows = forecast_rows(Uuid::new_v4(), &estimates, today, Utc::now());

        assert_eq!(rows.len(), 60);
        let tree_first = &rows[0];
        assert_eq!(tree_first.algorithm, Set(ForecastAlgorithm::Tree));
        assert_eq!(tree_first.forecast_date, Set(today));
        assert_eq!(tree_first.predicted_quantity, Set(85));

        let seasonal_first = &rows[30];
        assert_eq!(seasonal_first.algorithm, Set(ForecastAlgorithm::Seasonal));
        assert_eq!(seasonal_first.forecast_date, Set(today));
        // 40 * 100 / 100
        assert_eq!(seasonal_first.predicted_quantity, Set(40));
    }
}
