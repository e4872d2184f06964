use chrono::{Datelike, Duration, NaiveDate};

use super::series::DailySeries;

/// Lag offsets, in days.
pub const LAGS: [usize; 4] = [1, 7, 14, 30];

/// Column order of every feature row.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "day_of_week",
    "month",
    "day_of_year",
    "quarter",
    "iso_week",
    "lag_1",
    "lag_7",
    "lag_14",
    "lag_30",
    "rolling_mean_7",
    "rolling_mean_30",
    "rolling_std_7",
];

pub const FEATURE_COUNT: usize = 12;

const CALENDAR_COLUMNS: usize = 5;
const LAG_START: usize = CALENDAR_COLUMNS;
const ROLLING_START: usize = LAG_START + LAGS.len();

/// Training matrix for the tree model: one row per day of the series.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    rows: Vec<Vec<f64>>,
    targets: Vec<f64>,
}

impl FeatureFrame {
    /// Derives calendar, lag and rolling features for every day.
    ///
    /// Lags reaching before the first day and the standard deviation of a
    /// single observation are undefined. Undefined cells are forward-filled,
    /// then backward-filled; a column with nothing defined at all takes the
    /// series mean. No row is dropped.
    pub fn build(series: &DailySeries) -> Self {
        let y = series.values();
        let n = y.len();

        let mut columns: Vec<Vec<Option<f64>>> = Vec::with_capacity(LAGS.len() + 3);
        for lag in LAGS {
            columns.push((0..n).map(|i| (i >= lag).then(|| y[i - lag])).collect());
        }
        columns.push((0..n).map(|i| Some(mean(window(y, i, 7)))).collect());
        columns.push((0..n).map(|i| Some(mean(window(y, i, 30)))).collect());
        columns.push((0..n).map(|i| sample_std(window(y, i, 7))).collect());

        let fallback = series.mean();
        let filled: Vec<Vec<f64>> = columns
            .into_iter()
            .map(|column| fill_column(column, fallback))
            .collect();

        let rows = (0..n)
            .map(|i| {
                let mut row = Vec::with_capacity(FEATURE_COUNT);
                row.extend_from_slice(&calendar_features(series.date_at(i)));
                row.extend(filled.iter().map(|column| column[i]));
                row
            })
            .collect();

        Self {
            rows,
            targets: y.to_vec(),
        }
    }

    /// Synthetic row dated `horizon_days` past the last observation.
    ///
    /// `lag_k` is the value `k` days before the end of history (the series
    /// mean when the history is shorter than `k`); rolling statistics are
    /// carried over from the last observed row.
    pub fn future_row(&self, series: &DailySeries, horizon_days: i64) -> Vec<f64> {
        let y = series.values();
        let n = y.len();
        let target_date = series.last_date() + Duration::days(horizon_days);

        let mut row = Vec::with_capacity(FEATURE_COUNT);
        row.extend_from_slice(&calendar_features(target_date));
        for lag in LAGS {
            row.push(if n >= lag { y[n - lag] } else { series.mean() });
        }
        match self.rows.last() {
            Some(last) => row.extend_from_slice(&last[ROLLING_START..]),
            None => row.extend(std::iter::repeat(series.mean()).take(FEATURE_COUNT - ROLLING_START)),
        }
        row
    }

    /// Splits rows in time order: the first `at` rows train, the rest test.
    pub fn split_at(&self, at: usize) -> (FeatureFrame, FeatureFrame) {
        let at = at.min(self.rows.len());
        (
            FeatureFrame {
                rows: self.rows[..at].to_vec(),
                targets: self.targets[..at].to_vec(),
            },
            FeatureFrame {
                rows: self.rows[at..].to_vec(),
                targets: self.targets[at..].to_vec(),
            },
        )
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn targets(&self) -> &[f64] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Day of week (Monday = 0), month, day of year, quarter, ISO week.
fn calendar_features(date: NaiveDate) -> [f64; CALENDAR_COLUMNS] {
    [
        date.weekday().num_days_from_monday() as f64,
        date.month() as f64,
        date.ordinal() as f64,
        ((date.month() - 1) / 3 + 1) as f64,
        date.iso_week().week() as f64,
    ]
}

/// Trailing window ending at `end` inclusive, truncated at the series start.
fn window(values: &[f64], end: usize, size: usize) -> &[f64] {
    let from = (end + 1).saturating_sub(size);
    &values[from..=end]
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator); undefined below two points.
fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

fn fill_column(column: Vec<Option<f64>>, fallback: f64) -> Vec<f64> {
    let mut filled = column;

    let mut carry = None;
    for cell in filled.iter_mut() {
        match cell {
            Some(v) => carry = Some(*v),
            None => *cell = carry,
        }
    }

    let mut carry = None;
    for cell in filled.iter_mut().rev() {
        match cell {
            Some(v) => carry = Some(*v),
            None => *cell = carry,
        }
    }

    filled.into_iter().map(|cell| cell.unwrap_or(fallback)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::series::SalePoint;

    fn series_from(values: &[i64]) -> DailySeries {
        // 2024-01-01 is a Monday.
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let points: Vec<SalePoint> = values
            .iter()
            .enumerate()
            .map(|(i, q)| SalePoint::new(start + Duration::days(i as i64), *q))
            .collect();
        DailySeries::from_sales(&points).unwrap()
    }

    fn column(frame: &FeatureFrame, name: &str) -> Vec<f64> {
        let idx = FEATURE_NAMES.iter().position(|n| *n == name).unwrap();
        frame.rows().iter().map(|row| row[idx]).collect()
    }

    #[test]
    fn every_day_gets_a_full_row() {
        let frame = FeatureFrame::build(&series_from(&[1, 2, 3, 4, 5]));
        assert_eq!(frame.len(), 5);
        assert!(frame.rows().iter().all(|row| row.len() == FEATURE_COUNT));
        assert!(frame.rows().iter().flatten().all(|v| v.is_finite()));
        assert_eq!(frame.targets(), &[1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn calendar_columns_follow_the_date() {
        let frame = FeatureFrame::build(&series_from(&[1, 1]));
        let first = &frame.rows()[0];
        assert_eq!(first[0], 0.0); // Monday
        assert_eq!(first[1], 1.0);
        assert_eq!(first[2], 1.0);
        assert_eq!(first[3], 1.0);
        assert_eq!(first[4], 1.0);
        assert_eq!(frame.rows()[1][0], 1.0);
    }

    #[test]
    fn leading_lags_are_backward_filled() {
        let frame = FeatureFrame::build(&series_from(&[4, 6, 8]));
        // lag_1 defined from row 1 on: [_, 4, 6] -> [4, 4, 6]
        assert_eq!(column(&frame, "lag_1"), vec![4.0, 4.0, 6.0]);
    }

    #[test]
    fn lag_without_any_defined_value_uses_series_mean() {
        let frame = FeatureFrame::build(&series_from(&[4, 6, 8]));
        assert_eq!(column(&frame, "lag_30"), vec![6.0, 6.0, 6.0]);
    }

    #[test]
    fn rolling_windows_use_min_periods_one() {
        let frame = FeatureFrame::build(&series_from(&[2, 4, 6]));
        assert_eq!(column(&frame, "rolling_mean_7"), vec![2.0, 3.0, 4.0]);
        let std = column(&frame, "rolling_std_7");
        // First value is undefined and backward-filled from the second.
        assert!((std[0] - 2f64.sqrt()).abs() < 1e-12);
        assert!((std[1] - 2f64.sqrt()).abs() < 1e-12);
        assert!((std[2] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn future_row_uses_tail_lags_and_last_rolling_values() {
        let values: Vec<i64> = (1..=10).collect();
        let series = series_from(&values);
        let frame = FeatureFrame::build(&series);
        let row = frame.future_row(&series, 30);

        let target = series.last_date() + Duration::days(30);
        assert_eq!(row[2], target.ordinal() as f64);
        assert_eq!(row[LAG_START], 10.0); // lag_1
        assert_eq!(row[LAG_START + 1], 4.0); // lag_7
        assert_eq!(row[LAG_START + 2], 5.5); // lag_14 -> mean
        assert_eq!(row[LAG_START + 3], 5.5); // lag_30 -> mean
        assert_eq!(&row[ROLLING_START..], &frame.rows()[9][ROLLING_START..]);
    }

    #[test]
    fn split_keeps_time_order() {
        let frame = FeatureFrame::build(&series_from(&[1, 2, 3, 4, 5]));
        let (train, test) = frame.split_at(4);
        assert_eq!(train.targets(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(test.targets(), &[5.0]);
    }
}
