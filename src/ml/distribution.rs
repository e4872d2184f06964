use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::entities::forecast::ForecastAlgorithm;

/// Number of consecutive daily rows written per product and algorithm.
pub const FORECAST_DAYS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyForecast {
    pub date: NaiveDate,
    pub quantity: u32,
}

/// Spreads a 30-day-ahead point estimate over the next [`FORECAST_DAYS`]
/// days starting at `start`.
///
/// Each day gets `estimate * (85 + 5 * ((offset + phase) % 7)) / 100`
/// (integer division), so values cycle through 85%..115% of the estimate
/// with a per-algorithm phase. This is a presentation pattern, not a
/// model output.
pub fn distribute(
    estimate: u32,
    algorithm: ForecastAlgorithm,
    start: NaiveDate,
) -> Vec<DailyForecast> {
    let phase = algorithm.weekly_phase();
    (0..FORECAST_DAYS)
        .map(|offset| {
            let percent = 85 + 5 * u64::from((offset + phase) % 7);
            DailyForecast {
                date: start + Duration::days(i64::from(offset)),
                quantity: u32::try_from(u64::from(estimate) * percent / 100)
                    .unwrap_or(u32::MAX),
            }
        })
        .collect()
}
