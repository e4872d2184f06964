use async_trait::async_trait;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::entities::{product, sale};
use crate::errors::ServiceError;
use crate::ml::SalePoint;

/// Read-only view of the sales ledger and product catalog.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SalesLedger: Send + Sync {
    /// Every sale line of the product, oldest first. Lines sharing a date are
    /// returned individually.
    async fn sales_for_product(&self, product_id: Uuid) -> Result<Vec<SalePoint>, ServiceError>;

    /// Up to `limit` catalog product ids ordered by number of sale lines, most
    /// first; ties broken by ascending id. Products without sales rank last.
    async fn top_products_by_sale_count(&self, limit: u64) -> Result<Vec<Uuid>, ServiceError>;

    async fn product(&self, product_id: Uuid) -> Result<Option<product::Model>, ServiceError>;
}

#[derive(Debug, Clone)]
pub struct DbSalesLedger {
    db: Arc<DatabaseConnection>,
}

impl DbSalesLedger {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SalesLedger for DbSalesLedger {
    #[instrument(skip(self))]
    async fn sales_for_product(&self, product_id: Uuid) -> Result<Vec<SalePoint>, ServiceError> {
        let rows = sale::Entity::find()
            .filter(sale::Column::ProductId.eq(product_id))
            .order_by_asc(sale::Column::SaleDate)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(rows
            .into_iter()
            .map(|row| SalePoint::new(row.sale_date.date_naive(), i64::from(row.quantity)))
            .collect())
    }

    #[instrument(skip(self))]
    async fn top_products_by_sale_count(&self, limit: u64) -> Result<Vec<Uuid>, ServiceError> {
        let ranked: Vec<(Uuid, i64)> = product::Entity::find()
            .select_only()
            .column(product::Column::Id)
            .column_as(sale::Column::Id.count(), "sale_count")
            .left_join(sale::Entity)
            .group_by(product::Column::Id)
            .order_by_desc(sale::Column::Id.count())
            .order_by_asc(product::Column::Id)
            .limit(limit)
            .into_tuple()
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(ranked.into_iter().map(|(id, _)| id).collect())
    }

    #[instrument(skip(self))]
    async fn product(&self, product_id: Uuid) -> Result<Option<product::Model>, ServiceError> {
        product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }
}
