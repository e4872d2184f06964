use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    errors::ServiceError,
    services::forecasting::{
        BatchResult, CleanupResult, ForecastDetail, ForecastQuery, ForecastSettings,
        ForecastStatus, ForecastSummary, ForecastView,
    },
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct CleanupRequest {
    /// Delete rows dated more than this many days ago (default from config)
    #[validate(range(min = 1, max = 3650))]
    pub days: Option<u32>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateForecastConfigRequest {
    pub enabled: Option<bool>,
    #[validate(range(min = 1, max = 365))]
    pub interval_days: Option<u32>,
}

/// Forecast totals alongside the regeneration schedule.
#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardSummary {
    #[serde(flatten)]
    pub forecasts: ForecastSummary,
    pub schedule: ForecastStatus,
}

#[utoipa::path(
    get,
    path = "/api/v1/forecasts",
    summary = "List forecasts",
    description = "Paginated forecast rows, newest forecast date first",
    params(ForecastQuery),
    responses(
        (status = 200, description = "Forecasts retrieved", body = ApiResponse<PaginatedResponse<ForecastView>>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid query parameters", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "forecasts"
)]
pub async fn list_forecasts(
    State(state): State<AppState>,
    Query(query): Query<ForecastQuery>,
) -> ApiResult<PaginatedResponse<ForecastView>> {
    let page = state.forecasts.list_forecasts(query).await?;
    let total_pages = page.total.div_ceil(page.limit);
    Ok(Json(ApiResponse::success(PaginatedResponse {
        items: page.items,
        total: page.total,
        page: page.page,
        limit: page.limit,
        total_pages,
    })))
}

#[utoipa::path(
    get,
    path = "/api/v1/forecasts/summary",
    summary = "Forecast dashboard",
    description = "Daily sales of the last 30 days, forecast totals for the next 30 days per algorithm, projected units and revenue",
    responses(
        (status = 200, description = "Summary computed", body = ApiResponse<DashboardSummary>),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "forecasts"
)]
pub async fn get_summary(State(state): State<AppState>) -> ApiResult<DashboardSummary> {
    let forecasts = state.forecasts.summary().await?;
    let schedule = state.scheduler.status(Utc::now()).await?;
    Ok(Json(ApiResponse::success(DashboardSummary {
        forecasts,
        schedule,
    })))
}

#[utoipa::path(
    get,
    path = "/api/v1/forecasts/status",
    summary = "Generation status",
    responses(
        (status = 200, description = "Schedule and last run", body = ApiResponse<ForecastStatus>),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "forecasts"
)]
pub async fn get_status(State(state): State<AppState>) -> ApiResult<ForecastStatus> {
    let status = state.scheduler.status(Utc::now()).await?;
    Ok(Json(ApiResponse::success(status)))
}

#[utoipa::path(
    get,
    path = "/api/v1/forecasts/{id}",
    summary = "Get forecast",
    description = "One forecast row with its product and predicted revenue",
    params(("id" = i32, Path, description = "Forecast ID")),
    responses(
        (status = 200, description = "Forecast retrieved", body = ApiResponse<ForecastDetail>),
        (status = 404, description = "Forecast not found", body = crate::errors::ErrorResponse),
    ),
    tag = "forecasts"
)]
pub async fn get_forecast(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<ForecastDetail> {
    let detail = state.forecasts.get_forecast(id).await?;
    Ok(Json(ApiResponse::success(detail)))
}

#[utoipa::path(
    post,
    path = "/api/v1/forecasts/generate",
    summary = "Generate forecasts",
    description = "Regenerates forecasts for the top products now, regardless of the schedule",
    responses(
        (status = 200, description = "Generation finished", body = ApiResponse<BatchResult>),
        (status = 409, description = "A generation run is already in progress", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "forecasts"
)]
pub async fn generate_all(State(state): State<AppState>) -> ApiResult<BatchResult> {
    let result = state.scheduler.run_now().await?;
    Ok(Json(ApiResponse::success(result)))
}

#[utoipa::path(
    post,
    path = "/api/v1/forecasts/generate/{product_id}",
    summary = "Generate forecasts for one product",
    params(("product_id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Forecasts replaced", body = ApiResponse<BatchResult>),
        (status = 400, description = "Not enough sales history", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    tag = "forecasts"
)]
pub async fn generate_for_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> ApiResult<BatchResult> {
    let result = state.forecasts.generate_for_product(product_id).await?;
    Ok(Json(ApiResponse::success(result)))
}

#[utoipa::path(
    post,
    path = "/api/v1/forecasts/cleanup",
    summary = "Delete old forecasts",
    request_body = CleanupRequest,
    responses(
        (status = 200, description = "Cleanup done (or counted, for a dry run)", body = ApiResponse<CleanupResult>),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
    ),
    tag = "forecasts"
)]
pub async fn cleanup_forecasts(
    State(state): State<AppState>,
    payload: Option<Json<CleanupRequest>>,
) -> ApiResult<CleanupResult> {
    let request = payload.map(|Json(body)| body).unwrap_or_default();
    request.validate()?;

    let days = request
        .days
        .unwrap_or(state.forecasts.config().cleanup_days);
    let result = state
        .forecasts
        .cleanup_older_than(days, request.dry_run)
        .await?;
    Ok(Json(ApiResponse::success(result)))
}

#[utoipa::path(
    put,
    path = "/api/v1/forecasts/config",
    summary = "Update the regeneration schedule",
    request_body = UpdateForecastConfigRequest,
    responses(
        (status = 200, description = "Schedule updated", body = ApiResponse<ForecastSettings>),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
    ),
    tag = "forecasts"
)]
pub async fn update_config(
    State(state): State<AppState>,
    Json(request): Json<UpdateForecastConfigRequest>,
) -> ApiResult<ForecastSettings> {
    request.validate()?;
    if request.enabled.is_none() && request.interval_days.is_none() {
        return Err(ServiceError::BadRequest(
            "provide `enabled` and/or `interval_days`".to_string(),
        ));
    }

    let settings = state
        .scheduler
        .update_settings(request.enabled, request.interval_days)
        .await?;
    info!(enabled = settings.enabled, interval_days = settings.interval_days, "Schedule changed via API");
    Ok(Json(ApiResponse::success(settings)))
}

pub fn forecast_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_forecasts))
        .route("/summary", get(get_summary))
        .route("/status", get(get_status))
        .route("/generate", post(generate_all))
        .route("/generate/:product_id", post(generate_for_product))
        .route("/cleanup", post(cleanup_forecasts))
        .route("/config", put(update_config))
        .route("/:id", get(get_forecast))
}
