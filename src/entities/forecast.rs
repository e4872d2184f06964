use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

/// Which estimator produced a forecast row.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum ForecastAlgorithm {
    /// Gradient-boosted regression trees over calendar/lag/rolling features
    #[sea_orm(string_value = "tree")]
    Tree,
    /// Additive trend + weekly/yearly Fourier seasonality
    #[sea_orm(string_value = "seasonal")]
    Seasonal,
}

impl ForecastAlgorithm {
    pub const ALL: [ForecastAlgorithm; 2] = [ForecastAlgorithm::Tree, ForecastAlgorithm::Seasonal];

    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastAlgorithm::Tree => "tree",
            ForecastAlgorithm::Seasonal => "seasonal",
        }
    }

    /// Day offset added before taking the weekly multiplier, so the two curves
    /// are out of phase with each other.
    pub fn weekly_phase(&self) -> u32 {
        match self {
            ForecastAlgorithm::Tree => 0,
            ForecastAlgorithm::Seasonal => 3,
        }
    }
}

impl fmt::Display for ForecastAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One predicted day for one product and one algorithm.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "forecasts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub product_id: Uuid,
    pub forecast_date: NaiveDate,
    /// Never negative; enforced by the distributor.
    pub predicted_quantity: i32,
    pub algorithm: ForecastAlgorithm,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Product,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_wire_names_are_stable() {
        assert_eq!(ForecastAlgorithm::Tree.to_value(), "tree");
        assert_eq!(ForecastAlgorithm::Seasonal.to_value(), "seasonal");
        assert_eq!(
            serde_json::to_string(&ForecastAlgorithm::Seasonal).unwrap(),
            "\"seasonal\""
        );
        assert_eq!(ForecastAlgorithm::Tree.to_string(), "tree");
    }

    #[test]
    fn seasonal_curve_is_phase_shifted() {
        assert_eq!(ForecastAlgorithm::Tree.weekly_phase(), 0);
        assert_eq!(ForecastAlgorithm::Seasonal.weekly_phase(), 3);
    }
}
