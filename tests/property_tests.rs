//! Property-based tests for the forecasting core.
//!
//! Sales histories are generated as (day offset, quantity) lines so that
//! gaps, same-day duplicates and flat or spiky shapes all show up.

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;

use pos_forecast_api::entities::forecast::ForecastAlgorithm;
use pos_forecast_api::ml::{
    apply_floor, distribute, estimate_product, DailySeries, SalePoint, FORECAST_DAYS,
};

fn origin() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn sale_lines_strategy() -> impl Strategy<Value = Vec<(i64, i64)>> {
    prop::collection::vec((0i64..90, 0i64..50), 2..60)
}

fn to_points(lines: &[(i64, i64)]) -> Vec<SalePoint> {
    lines
        .iter()
        .map(|(offset, quantity)| SalePoint::new(origin() + Duration::days(*offset), *quantity))
        .collect()
}

fn distinct_days(lines: &[(i64, i64)]) -> BTreeSet<i64> {
    lines.iter().map(|(offset, _)| *offset).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn series_spans_first_to_last_day_and_preserves_totals(lines in sale_lines_strategy()) {
        let days = distinct_days(&lines);
        prop_assume!(days.len() >= 2);

        let series = DailySeries::from_sales(&to_points(&lines)).unwrap();
        let first = *days.iter().next().unwrap();
        let last = *days.iter().next_back().unwrap();

        prop_assert_eq!(series.len() as i64, last - first + 1);
        prop_assert_eq!(series.start_date(), origin() + Duration::days(first));

        let total: i64 = lines.iter().map(|(_, q)| q).sum();
        prop_assert_eq!(series.values().iter().sum::<f64>(), total as f64);

        for (index, value) in series.values().iter().enumerate() {
            if !days.contains(&(first + index as i64)) {
                prop_assert_eq!(*value, 0.0);
            }
        }
    }

    #[test]
    fn single_sale_day_is_rejected(offset in 0i64..90, quantities in prop::collection::vec(0i64..50, 1..10)) {
        let points: Vec<SalePoint> = quantities
            .iter()
            .map(|q| SalePoint::new(origin() + Duration::days(offset), *q))
            .collect();
        prop_assert!(DailySeries::from_sales(&points).is_err());
    }

    #[test]
    fn floor_never_drops_below_minimum_or_recent_level(
        lines in sale_lines_strategy(),
        raw in prop_oneof![-1e6f64..1e6, Just(f64::NAN), Just(f64::INFINITY)],
    ) {
        prop_assume!(distinct_days(&lines).len() >= 2);
        let series = DailySeries::from_sales(&to_points(&lines)).unwrap();

        let floored = apply_floor(raw, &series);
        prop_assert!(floored >= 5);
        prop_assert!(f64::from(floored) >= (0.8 * series.recent_mean(14)).round());
    }

    #[test]
    fn distribution_is_thirty_consecutive_non_negative_days(estimate in 0u32..1_000_000) {
        for algorithm in ForecastAlgorithm::ALL {
            let days = distribute(estimate, algorithm, origin());
            prop_assert_eq!(days.len(), FORECAST_DAYS as usize);
            for (offset, day) in days.iter().enumerate() {
                prop_assert_eq!(day.date, origin() + Duration::days(offset as i64));
                prop_assert!(u64::from(day.quantity) * 100 + 99 >= u64::from(estimate) * 85);
                prop_assert!(u64::from(day.quantity) * 100 <= u64::from(estimate) * 115);
            }
        }
    }
}

proptest! {
    // Each case fits both models
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn both_estimators_respect_the_floor(lines in sale_lines_strategy()) {
        prop_assume!(distinct_days(&lines).len() >= 2);
        let series = DailySeries::from_sales(&to_points(&lines)).unwrap();
        let recent_floor = (0.8 * series.recent_mean(14)).round();

        let estimates = estimate_product(&series);
        for estimate in [estimates.tree, estimates.seasonal] {
            prop_assert!(estimate.quantity >= 5);
            prop_assert!(f64::from(estimate.quantity) >= recent_floor);
        }
    }
}
