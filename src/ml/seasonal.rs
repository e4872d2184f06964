use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::linalg::cholesky_solve;
use super::series::DailySeries;
use super::ModelError;

/// Ridge penalty on the intercept and trend slope.
const TREND_PENALTY: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalParams {
    pub weekly_order: usize,
    pub yearly_order: usize,
    pub weekly_period: f64,
    pub yearly_period: f64,
    /// Larger values let the Fourier terms move further from zero.
    pub seasonality_prior_scale: f64,
    /// Width of the uncertainty band in residual standard deviations.
    pub interval_z: f64,
}

impl Default for SeasonalParams {
    fn default() -> Self {
        Self {
            weekly_order: 3,
            yearly_order: 10,
            weekly_period: 7.0,
            yearly_period: 365.25,
            seasonality_prior_scale: 10.0,
            interval_z: 1.96,
        }
    }
}

impl SeasonalParams {
    fn width(&self) -> usize {
        2 + 2 * self.weekly_order + 2 * self.yearly_order
    }

    fn validate(&self) -> Result<(), ModelError> {
        if !(self.weekly_period > 0.0 && self.yearly_period > 0.0) {
            return Err(ModelError::InvalidParameter(
                "seasonal periods must be positive".into(),
            ));
        }
        if !(self.seasonality_prior_scale > 0.0 && self.seasonality_prior_scale.is_finite()) {
            return Err(ModelError::InvalidParameter(format!(
                "seasonality_prior_scale must be positive, got {}",
                self.seasonality_prior_scale
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeasonalPrediction {
    pub yhat: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Additive model `y(t) = trend(t) + weekly(t) + yearly(t)`, fitted by
/// ridge-regularised least squares on a max-abs scaled target.
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonalModel {
    params: SeasonalParams,
    start: NaiveDate,
    trend_span: f64,
    scale: f64,
    coefficients: Vec<f64>,
    residual_std: f64,
}

impl SeasonalModel {
    pub fn fit(series: &DailySeries, params: &SeasonalParams) -> Result<Self, ModelError> {
        params.validate()?;

        let y = series.values();
        if y.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite("seasonal input"));
        }

        let max_abs = y.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        let scale = if max_abs > 0.0 { max_abs } else { 1.0 };
        let trend_span = (y.len().saturating_sub(1)).max(1) as f64;

        let mut model = Self {
            params: params.clone(),
            start: series.start_date(),
            trend_span,
            scale,
            coefficients: Vec::new(),
            residual_std: 0.0,
        };

        let width = params.width();
        let seasonal_penalty = 1.0 / (params.seasonality_prior_scale * params.seasonality_prior_scale);

        let mut xtx = vec![vec![0.0; width]; width];
        let mut xty = vec![0.0; width];
        let design: Vec<Vec<f64>> = (0..y.len()).map(|i| model.design_row(i as f64)).collect();

        for (row, target) in design.iter().zip(y) {
            let target = target / scale;
            for a in 0..width {
                xty[a] += row[a] * target;
                for b in a..width {
                    xtx[a][b] += row[a] * row[b];
                }
            }
        }
        for a in 0..width {
            for b in 0..a {
                xtx[a][b] = xtx[b][a];
            }
            xtx[a][a] += if a < 2 { TREND_PENALTY } else { seasonal_penalty };
        }

        model.coefficients = cholesky_solve(&xtx, &xty).ok_or(ModelError::Singular)?;

        let sse: f64 = design
            .iter()
            .zip(y)
            .map(|(row, target)| (target - model.evaluate(row)).powi(2))
            .sum();
        model.residual_std = (sse / y.len() as f64).sqrt();

        if !model.residual_std.is_finite() {
            return Err(ModelError::NonFinite("seasonal residuals"));
        }
        Ok(model)
    }

    pub fn predict(&self, date: NaiveDate) -> Result<SeasonalPrediction, ModelError> {
        let t = (date - self.start).num_days() as f64;
        let yhat = self.evaluate(&self.design_row(t));
        if !yhat.is_finite() {
            return Err(ModelError::NonFinite("seasonal prediction"));
        }
        let half_width = self.params.interval_z * self.residual_std;
        Ok(SeasonalPrediction {
            yhat,
            lower: yhat - half_width,
            upper: yhat + half_width,
        })
    }

    /// `[1, trend, weekly sin/cos pairs.., yearly sin/cos pairs..]`
    fn design_row(&self, t: f64) -> Vec<f64> {
        let mut row = Vec::with_capacity(self.params.width());
        row.push(1.0);
        row.push(t / self.trend_span);
        push_fourier(&mut row, t, self.params.weekly_period, self.params.weekly_order);
        push_fourier(&mut row, t, self.params.yearly_period, self.params.yearly_order);
        row
    }

    fn evaluate(&self, row: &[f64]) -> f64 {
        let scaled: f64 = row
            .iter()
            .zip(&self.coefficients)
            .map(|(x, beta)| x * beta)
            .sum();
        scaled * self.scale
    }
}

fn push_fourier(row: &mut Vec<f64>, t: f64, period: f64, order: usize) {
    for k in 1..=order {
        let angle = 2.0 * PI * k as f64 * t / period;
        row.push(angle.sin());
        row.push(angle.cos());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::series::SalePoint;
    use chrono::Duration;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn series_of(values: impl IntoIterator<Item = i64>) -> DailySeries {
        let points: Vec<SalePoint> = values
            .into_iter()
            .enumerate()
            .map(|(i, q)| SalePoint::new(start() + Duration::days(i as i64), q))
            .collect();
        DailySeries::from_sales(&points).unwrap()
    }

    #[test]
    fn design_row_has_expected_width() {
        let model = SeasonalModel::fit(&series_of([1, 2, 3]), &SeasonalParams::default()).unwrap();
        assert_eq!(model.design_row(0.0).len(), 28);
    }

    #[test]
    fn picks_up_a_weekly_cycle() {
        let pattern = [10, 10, 10, 10, 10, 30, 30];
        let series = series_of((0..140).map(|i| pattern[i % 7]));
        let model = SeasonalModel::fit(&series, &SeasonalParams::default()).unwrap();

        let weekday = model.predict(start() + Duration::days(140)).unwrap();
        let weekend = model.predict(start() + Duration::days(145)).unwrap();
        assert!(weekend.yhat > weekday.yhat + 10.0);
    }

    #[test]
    fn extrapolates_a_rising_trend() {
        let series = series_of((0..60).map(|i| 10 + i));
        let model = SeasonalModel::fit(&series, &SeasonalParams::default()).unwrap();
        let ahead = model.predict(series.last_date() + Duration::days(30)).unwrap();
        assert!(ahead.yhat > 69.0);
    }

    #[test]
    fn interval_brackets_the_point_estimate() {
        let series = series_of([3, 9, 4, 8, 2, 7, 5, 6]);
        let model = SeasonalModel::fit(&series, &SeasonalParams::default()).unwrap();
        let p = model.predict(series.last_date() + Duration::days(30)).unwrap();
        assert!(p.lower <= p.yhat && p.yhat <= p.upper);
    }

    #[test]
    fn all_zero_history_predicts_zero() {
        let series = DailySeries::from_sales(&[
            SalePoint::new(start(), 0),
            SalePoint::new(start() + Duration::days(5), 0),
        ])
        .unwrap();
        let model = SeasonalModel::fit(&series, &SeasonalParams::default()).unwrap();
        let p = model.predict(start() + Duration::days(35)).unwrap();
        assert!(p.yhat.abs() < 1e-9);
    }

    #[test]
    fn rejects_non_positive_prior_scale() {
        let params = SeasonalParams {
            seasonality_prior_scale: 0.0,
            ..SeasonalParams::default()
        };
        assert!(matches!(
            SeasonalModel::fit(&series_of([1, 2]), &params),
            Err(ModelError::InvalidParameter(_))
        ));
    }
}
