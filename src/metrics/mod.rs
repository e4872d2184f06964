/*!
 * # Metrics Module
 *
 * In-process metrics registry for the forecasting service.
 *
 * ## Metrics Formats
 *
 * - Prometheus text format at `/metrics`
 * - JSON format at `/metrics/json`
 */

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use serde_json::json;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Failed to export metrics: {0}")]
    ExportError(String),
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge holding an `f64` as its bit pattern.
#[derive(Debug, Clone, Default)]
pub struct Gauge {
    bits: Arc<AtomicU64>,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// Count and sum of observations; sum kept in microunits.
#[derive(Debug, Clone, Default)]
pub struct Histogram {
    sum_micros: Arc<AtomicU64>,
    count: Arc<AtomicU64>,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, value: f64) {
        let micros = (value.max(0.0) * 1_000_000.0).round() as u64;
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }
}

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: DashMap<String, Counter>,
    gauges: DashMap<String, Gauge>,
    histograms: DashMap<String, Histogram>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create_counter(&self, name: &str) -> Counter {
        self.counters
            .entry(name.to_string())
            .or_insert_with(Counter::new)
            .clone()
    }

    pub fn get_or_create_gauge(&self, name: &str) -> Gauge {
        self.gauges
            .entry(name.to_string())
            .or_insert_with(Gauge::new)
            .clone()
    }

    pub fn get_or_create_histogram(&self, name: &str) -> Histogram {
        self.histograms
            .entry(name.to_string())
            .or_insert_with(Histogram::new)
            .clone()
    }

    /// Prometheus text exposition, names sorted for stable output.
    pub fn export_metrics(&self) -> Result<String, MetricsError> {
        let mut output = String::new();
        let export_err = |e: std::fmt::Error| MetricsError::ExportError(e.to_string());

        let mut counters: Vec<(String, u64)> = self
            .counters
            .iter()
            .map(|e| (e.key().clone(), e.value().get()))
            .collect();
        counters.sort();
        for (name, value) in counters {
            writeln!(output, "# TYPE {} counter", name).map_err(export_err)?;
            writeln!(output, "{} {}", name, value).map_err(export_err)?;
        }

        let mut gauges: Vec<(String, f64)> = self
            .gauges
            .iter()
            .map(|e| (e.key().clone(), e.value().get()))
            .collect();
        gauges.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, value) in gauges {
            writeln!(output, "# TYPE {} gauge", name).map_err(export_err)?;
            writeln!(output, "{} {}", name, value).map_err(export_err)?;
        }

        let mut histograms: Vec<(String, Histogram)> = self
            .histograms
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        histograms.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, histogram) in histograms {
            writeln!(output, "# TYPE {} summary", name).map_err(export_err)?;
            writeln!(output, "{}_count {}", name, histogram.get_count()).map_err(export_err)?;
            writeln!(output, "{}_sum {}", name, histogram.get_sum()).map_err(export_err)?;
        }

        Ok(output)
    }

    pub fn export_metrics_json(&self) -> serde_json::Value {
        let counters: serde_json::Map<String, serde_json::Value> = self
            .counters
            .iter()
            .map(|e| (e.key().clone(), json!(e.value().get())))
            .collect();

        let gauges: serde_json::Map<String, serde_json::Value> = self
            .gauges
            .iter()
            .map(|e| (e.key().clone(), json!(e.value().get())))
            .collect();

        let histograms: serde_json::Map<String, serde_json::Value> = self
            .histograms
            .iter()
            .map(|e| {
                (
                    e.key().clone(),
                    json!({
                        "count": e.value().get_count(),
                        "sum": e.value().get_sum(),
                    }),
                )
            })
            .collect();

        json!({
            "counters": counters,
            "gauges": gauges,
            "histograms": histograms,
        })
    }
}

// Global metrics registry
lazy_static::lazy_static! {
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}

/// Counters and gauges describing forecast generation.
pub struct ForecastMetrics {
    pub batches_total: Counter,
    pub batch_failures: Counter,
    pub rows_written: Counter,
    pub product_errors: Counter,
    pub estimator_fallbacks: Counter,
    pub batch_duration: Histogram,
    pub in_flight: Gauge,
}

impl ForecastMetrics {
    pub fn new() -> Self {
        Self {
            batches_total: METRICS.get_or_create_counter("forecast_batches_total"),
            batch_failures: METRICS.get_or_create_counter("forecast_batch_failures_total"),
            rows_written: METRICS.get_or_create_counter("forecast_rows_written_total"),
            product_errors: METRICS.get_or_create_counter("forecast_product_errors_total"),
            estimator_fallbacks: METRICS
                .get_or_create_counter("forecast_estimator_fallbacks_total"),
            batch_duration: METRICS.get_or_create_histogram("forecast_batch_duration_seconds"),
            in_flight: METRICS.get_or_create_gauge("forecast_generation_in_flight"),
        }
    }

    pub fn record_batch(&self, duration: Duration, rows: u64, product_errors: u64) {
        self.batches_total.inc();
        self.batch_duration.observe(duration.as_secs_f64());
        self.rows_written.inc_by(rows);
        self.product_errors.inc_by(product_errors);
    }

    pub fn record_batch_failure(&self) {
        self.batch_failures.inc();
    }

    pub fn record_fallback(&self) {
        self.estimator_fallbacks.inc();
    }

    pub fn set_in_flight(&self, running: bool) {
        self.in_flight.set(if running { 1.0 } else { 0.0 });
    }
}

impl Default for ForecastMetrics {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    pub static ref FORECAST_METRICS: ForecastMetrics = ForecastMetrics::new();
}

/// `GET /metrics`
pub async fn metrics_handler() -> Result<Response, MetricsError> {
    let body = METRICS.export_metrics()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

/// `GET /metrics/json`
pub async fn metrics_json_handler() -> Json<serde_json::Value> {
    Json(METRICS.export_metrics_json())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge_keeps_fractional_values() {
        let gauge = Gauge::new();
        gauge.set(0.25);
        assert_eq!(gauge.get(), 0.25);
    }

    #[test]
    fn histogram_sums_sub_second_observations() {
        let histogram = Histogram::new();
        histogram.observe(0.5);
        histogram.observe(0.25);
        assert_eq!(histogram.get_count(), 2);
        assert!((histogram.get_sum() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn prometheus_export_lists_every_kind() {
        let registry = MetricsRegistry::new();
        registry.get_or_create_counter("a_total").inc_by(3);
        registry.get_or_create_gauge("b_gauge").set(1.0);
        registry.get_or_create_histogram("c_seconds").observe(2.0);

        let text = registry.export_metrics().unwrap();
        assert!(text.contains("# TYPE a_total counter\na_total 3\n"));
        assert!(text.contains("b_gauge 1\n"));
        assert!(text.contains("c_seconds_count 1\n"));

        let json = registry.export_metrics_json();
        assert_eq!(json["counters"]["a_total"], 3);
        assert_eq!(json["histograms"]["c_seconds"]["count"], 1);
    }
}
