use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::features::FeatureFrame;
use super::gbdt::{GbdtParams, GradientBoostedTrees};
use super::linalg::LinearFit;
use super::seasonal::{SeasonalModel, SeasonalParams};
use super::series::DailySeries;
use super::{InsufficientDataError, ModelError};

/// Days between the last observation and the point being estimated.
pub const HORIZON_DAYS: i64 = 30;
/// No estimate is ever published below this.
pub const MIN_ESTIMATE: u32 = 5;
/// Estimates never drop below this share of the recent average.
pub const FLOOR_RATIO: f64 = 0.8;
/// Window, in days, of the "recent" average used by floors and fallbacks.
pub const RECENT_WINDOW: usize = 14;

/// Histories shorter than this skip the holdout accuracy check.
const HOLDOUT_MIN_DAYS: usize = 10;

/// Which stage of a fallback chain produced an estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateSource {
    TreeModel,
    WeightedRecentMean,
    SeasonalModel,
    LinearTrend,
    RecentMean,
}

impl EstimateSource {
    pub fn is_fallback(&self) -> bool {
        !matches!(self, Self::TreeModel | Self::SeasonalModel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Estimate {
    pub quantity: u32,
    pub source: EstimateSource,
}

impl Estimate {
    fn new(quantity: u32, source: EstimateSource) -> Self {
        Self { quantity, source }
    }
}

/// Both estimates for one product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductEstimates {
    pub tree: Estimate,
    pub seasonal: Estimate,
}

#[derive(Debug, Error, PartialEq)]
pub enum EstimationError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Insufficient(#[from] InsufficientDataError),

    #[error("{stage} produced a non-finite value")]
    NonFinite { stage: &'static str },
}

/// Raises a raw model output to the published floor:
/// `max(5, round(max(raw, 0.8 * mean of the last 14 days)))`.
pub fn apply_floor(raw: f64, series: &DailySeries) -> u32 {
    let recent_floor = FLOOR_RATIO * series.recent_mean(RECENT_WINDOW);
    let candidate = if raw.is_finite() {
        raw.max(recent_floor)
    } else {
        recent_floor
    };
    to_quantity(candidate).max(MIN_ESTIMATE)
}

fn to_quantity(value: f64) -> u32 {
    let rounded = value.round();
    if rounded <= 0.0 {
        0
    } else if rounded >= u32::MAX as f64 {
        u32::MAX
    } else {
        rounded as u32
    }
}

fn finite(value: f64, stage: &'static str) -> Result<f64, EstimationError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EstimationError::NonFinite { stage })
    }
}

/// Moves down a fallback chain, logging why the previous stage was skipped.
trait Degrade {
    fn or_degrade<F>(self, failed_stage: &str, next: F) -> Result<Estimate, EstimationError>
    where
        F: FnOnce() -> Result<Estimate, EstimationError>;

    fn or_settle<F>(self, failed_stage: &str, last_resort: F) -> Estimate
    where
        F: FnOnce() -> Estimate;
}

impl Degrade for Result<Estimate, EstimationError> {
    fn or_degrade<F>(self, failed_stage: &str, next: F) -> Result<Estimate, EstimationError>
    where
        F: FnOnce() -> Result<Estimate, EstimationError>,
    {
        self.or_else(|err| {
            warn!(stage = failed_stage, error = %err, "Estimator stage failed, falling back");
            next()
        })
    }

    fn or_settle<F>(self, failed_stage: &str, last_resort: F) -> Estimate
    where
        F: FnOnce() -> Estimate,
    {
        self.unwrap_or_else(|err| {
            warn!(stage = failed_stage, error = %err, "Estimator stage failed, using last resort");
            last_resort()
        })
    }
}

/// Tree-model estimate of demand [`HORIZON_DAYS`] after the last sale day.
///
/// Falls back to a linearly weighted mean of the last 14 days when the
/// model cannot be fitted.
pub fn estimate_tree(series: &DailySeries) -> Estimate {
    tree_stage(series, &GbdtParams::default())
        .or_settle("tree_model", || weighted_recent_mean(series))
}

/// Seasonal-model estimate of demand [`HORIZON_DAYS`] after the last sale day.
///
/// Falls back first to a least-squares linear trend, then to the plain
/// 14-day mean.
pub fn estimate_seasonal(series: &DailySeries) -> Estimate {
    seasonal_stage(series, &SeasonalParams::default())
        .or_degrade("seasonal_model", || linear_trend(series))
        .or_settle("linear_trend", || recent_mean(series))
}

pub fn estimate_product(series: &DailySeries) -> ProductEstimates {
    ProductEstimates {
        tree: estimate_tree(series),
        seasonal: estimate_seasonal(series),
    }
}

fn tree_stage(series: &DailySeries, params: &GbdtParams) -> Result<Estimate, EstimationError> {
    let frame = FeatureFrame::build(series);
    log_holdout_accuracy(&frame, params);

    let model = GradientBoostedTrees::fit(frame.rows(), frame.targets(), params)?;
    let raw = model.predict(&frame.future_row(series, HORIZON_DAYS))?;
    let raw = finite(raw, "tree_model")?;
    Ok(Estimate::new(apply_floor(raw, series), EstimateSource::TreeModel))
}

/// Time-ordered 80/20 split, reported at debug level only.
fn log_holdout_accuracy(frame: &FeatureFrame, params: &GbdtParams) {
    if frame.len() < HOLDOUT_MIN_DAYS {
        return;
    }
    let (train, test) = frame.split_at(frame.len() * 4 / 5);
    let Ok(model) = GradientBoostedTrees::fit(train.rows(), train.targets(), params) else {
        return;
    };

    let errors: Vec<f64> = test
        .rows()
        .iter()
        .zip(test.targets())
        .filter_map(|(row, actual)| model.predict(row).ok().map(|p| p - actual))
        .collect();
    if errors.is_empty() {
        return;
    }

    let n = errors.len() as f64;
    let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;
    let rmse = (errors.iter().map(|e| e * e).sum::<f64>() / n).sqrt();
    debug!(mae, rmse, holdout_days = errors.len(), "Tree model holdout accuracy");
}

fn weighted_recent_mean(series: &DailySeries) -> Estimate {
    let tail = series.tail(RECENT_WINDOW);
    let (weighted, weights) = tail
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(sum, wsum), (i, v)| {
            let w = (i + 1) as f64;
            (sum + w * v, wsum + w)
        });
    let raw = if weights > 0.0 { weighted / weights } else { 0.0 };
    Estimate::new(apply_floor(raw, series), EstimateSource::WeightedRecentMean)
}

fn seasonal_stage(
    series: &DailySeries,
    params: &SeasonalParams,
) -> Result<Estimate, EstimationError> {
    let model = SeasonalModel::fit(series, params)?;
    let target = series.last_date() + Duration::days(HORIZON_DAYS);
    let prediction = model.predict(target)?;
    let raw = finite(prediction.yhat, "seasonal_model")?;
    Ok(Estimate::new(
        apply_floor(raw, series),
        EstimateSource::SeasonalModel,
    ))
}

fn linear_trend(series: &DailySeries) -> Result<Estimate, EstimationError> {
    let fit = LinearFit::fit(series.values())?;
    let raw = finite(
        series.last_value() + fit.slope * HORIZON_DAYS as f64,
        "linear_trend",
    )?;
    Ok(Estimate::new(apply_floor(raw, series), EstimateSource::LinearTrend))
}

fn recent_mean(series: &DailySeries) -> Estimate {
    let mean = series.recent_mean(RECENT_WINDOW);
    Estimate::new(
        to_quantity(mean).max(MIN_ESTIMATE),
        EstimateSource::RecentMean,
    )
}
