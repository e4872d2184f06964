use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::InsufficientDataError;

/// One raw sale line: several may share a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalePoint {
    pub date: NaiveDate,
    pub quantity: i64,
}

impl SalePoint {
    pub fn new(date: NaiveDate, quantity: i64) -> Self {
        Self { date, quantity }
    }
}

/// Quantity sold per calendar day, first to last sale date inclusive, with
/// zero on days that had no sales. Always holds at least two days.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySeries {
    start: NaiveDate,
    values: Vec<f64>,
}

impl DailySeries {
    /// Sums quantities per date and zero-fills every missing day.
    pub fn from_sales(points: &[SalePoint]) -> Result<Self, InsufficientDataError> {
        let mut per_day: BTreeMap<NaiveDate, i64> = BTreeMap::new();
        for point in points {
            *per_day.entry(point.date).or_insert(0) += point.quantity;
        }

        if per_day.len() < 2 {
            return Err(InsufficientDataError {
                distinct_dates: per_day.len(),
            });
        }

        let (start, end) = match (per_day.keys().next(), per_day.keys().next_back()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => {
                return Err(InsufficientDataError {
                    distinct_dates: per_day.len(),
                })
            }
        };

        let span = (end - start).num_days() as usize + 1;
        let mut values = vec![0.0; span];
        for (date, quantity) in per_day {
            values[(date - start).num_days() as usize] = quantity as f64;
        }

        Ok(Self { start, values })
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start
    }

    pub fn last_date(&self) -> NaiveDate {
        self.date_at(self.values.len() - 1)
    }

    pub fn date_at(&self, index: usize) -> NaiveDate {
        self.start + Duration::days(index as i64)
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        (0..self.values.len()).map(move |i| self.date_at(i))
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn last_value(&self) -> f64 {
        self.values[self.values.len() - 1]
    }

    pub fn mean(&self) -> f64 {
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// The last `window` observed days (fewer if the series is shorter).
    pub fn tail(&self, window: usize) -> &[f64] {
        let from = self.values.len().saturating_sub(window);
        &self.values[from..]
    }

    /// Mean of the last `window` days.
    pub fn recent_mean(&self, window: usize) -> f64 {
        let tail = self.tail(window.max(1));
        tail.iter().sum::<f64>() / tail.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn sums_same_day_sales_and_zero_fills_gaps() {
        let series = DailySeries::from_sales(&[
            SalePoint::new(day(1), 3),
            SalePoint::new(day(1), 2),
            SalePoint::new(day(4), 7),
        ])
        .unwrap();

        assert_eq!(series.values(), &[5.0, 0.0, 0.0, 7.0]);
        assert_eq!(series.start_date(), day(1));
        assert_eq!(series.last_date(), day(4));
        assert_eq!(series.dates().collect::<Vec<_>>(), vec![day(1), day(2), day(3), day(4)]);
    }

    #[test]
    fn input_order_does_not_matter() {
        let forward = DailySeries::from_sales(&[
            SalePoint::new(day(2), 1),
            SalePoint::new(day(5), 4),
        ])
        .unwrap();
        let backward = DailySeries::from_sales(&[
            SalePoint::new(day(5), 4),
            SalePoint::new(day(2), 1),
        ])
        .unwrap();
        assert_eq!(forward, backward);
    }

    #[test]
    fn single_date_is_insufficient() {
        let err = DailySeries::from_sales(&[
            SalePoint::new(day(9), 4),
            SalePoint::new(day(9), 1),
        ])
        .unwrap_err();
        assert_eq!(err.distinct_dates, 1);
    }

    #[test]
    fn empty_history_is_insufficient() {
        assert_matches!(
            DailySeries::from_sales(&[]),
            Err(InsufficientDataError { distinct_dates: 0 })
        );
    }

    #[test]
    fn recent_mean_uses_available_tail() {
        let series = DailySeries::from_sales(&[
            SalePoint::new(day(1), 4),
            SalePoint::new(day(2), 8),
        ])
        .unwrap();
        assert_eq!(series.recent_mean(14), 6.0);
        assert_eq!(series.recent_mean(1), 8.0);
        assert_eq!(series.tail(14).len(), 2);
    }
}
