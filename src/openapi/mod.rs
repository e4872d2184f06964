use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "POS Forecast API",
        version = "0.2.1",
        description = r#"
# Point-of-Sale Demand Forecasting

Per-product 30-day demand forecasts computed from sales history by two
estimators (`tree` and `seasonal`), stored as one row per product, day and
algorithm.

## Generation

Forecasts are regenerated for the top products by sale count:

- explicitly via `POST /api/v1/forecasts/generate`
- opportunistically, when a dashboard path is requested and the last run is
  older than the configured interval

Only one generation run is in flight per process; an explicit request made
while a run is in progress gets `409 Conflict`.

## Error Handling

Errors share one response format:

```json
{
  "error": "Bad Request",
  "message": "Insufficient data: no sales data available",
  "request_id": "0b6c7c4e-...",
  "timestamp": "2024-01-01T00:00:00Z"
}
```

## Pagination

`GET /api/v1/forecasts` takes `page` (default 1) and `limit` (default 60,
max 500).
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "forecasts", description = "Forecast listing, generation and schedule"),
    ),
    paths(
        crate::handlers::forecasts::list_forecasts,
        crate::handlers::forecasts::get_summary,
        crate::handlers::forecasts::get_status,
        crate::handlers::forecasts::get_forecast,
        crate::handlers::forecasts::generate_all,
        crate::handlers::forecasts::generate_for_product,
        crate::handlers::forecasts::cleanup_forecasts,
        crate::handlers::forecasts::update_config,
    ),
    components(
        schemas(
            // Common types
            crate::ApiResponse<serde_json::Value>,
            crate::ResponseMeta,

            // Forecast types
            crate::entities::forecast::ForecastAlgorithm,
            crate::services::forecasting::ForecastView,
            crate::services::forecasting::ForecastDetail,
            crate::services::forecasting::ForecastSummary,
            crate::services::forecasting::DailyUnits,
            crate::services::forecasting::AlgorithmDailyUnits,
            crate::services::forecasting::BatchResult,
            crate::services::forecasting::CleanupResult,
            crate::services::forecasting::ForecastSettings,
            crate::services::forecasting::ForecastStatus,
            crate::services::forecasting::LastRun,
            crate::handlers::forecasts::CleanupRequest,
            crate::handlers::forecasts::UpdateForecastConfigRequest,
            crate::handlers::forecasts::DashboardSummary,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
