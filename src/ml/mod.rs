/*!
 * # Demand Forecasting Core
 *
 * Pure, synchronous building blocks of the per-product forecasting pipeline:
 *
 * - `series`: aggregates raw sale lines into a gap-free daily series
 * - `features`: calendar, lag and rolling features for the tree model
 * - `gbdt`: squared-loss gradient-boosted regression trees
 * - `seasonal`: additive trend plus weekly/yearly Fourier seasonality
 * - `estimators`: the two 30-day point estimators with their fallback chains
 * - `distribution`: expands a point estimate into 30 daily values
 *
 * Nothing in here touches the database or the async runtime; callers run
 * model fitting on a blocking thread.
 */

use thiserror::Error;

pub mod distribution;
pub mod estimators;
pub mod features;
pub mod gbdt;
mod linalg;
pub mod seasonal;
pub mod series;

pub use distribution::{distribute, DailyForecast, FORECAST_DAYS};
pub use estimators::{
    apply_floor, estimate_product, estimate_seasonal, estimate_tree, Estimate, EstimateSource,
    EstimationError, ProductEstimates, HORIZON_DAYS,
};
pub use series::{DailySeries, SalePoint};

/// Fewer than two distinct sale dates: neither estimator can fit a trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{distinct_dates} distinct sale date(s), at least 2 required")]
pub struct InsufficientDataError {
    pub distinct_dates: usize,
}

/// Fit or predict failure inside one of the models.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("training set is empty")]
    EmptyTrainingSet,

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("non-finite value in {0}")]
    NonFinite(&'static str),

    #[error("normal equations are not positive definite")]
    Singular,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}
