mod common;

use axum::http::{Method, StatusCode};
use chrono::Duration;
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

use pos_forecast_api::entities::forecast::ForecastAlgorithm;

use common::{response_json, TestApp};

#[tokio::test]
async fn health_and_status_respond() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["checks"]["database"], "healthy");

    let response = app.request(Method::GET, "/api/v1/status", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["service"], "pos-forecast-api");
}

#[tokio::test]
async fn generate_then_list_and_fetch() {
    let app = TestApp::new().await;
    let product = app.seed_product("Flat white", dec!(4.50)).await;
    app.seed_daily_sales(product.id, 45, 11).await;

    let response = app
        .request(Method::POST, "/api/v1/forecasts/generate", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["forecasts_generated"], 60);
    assert_eq!(body["data"]["products_processed"], 1);
    assert_eq!(body["data"]["errors"], json!([]));

    let uri = format!(
        "/api/v1/forecasts?product_id={}&algorithm=tree&limit=5",
        product.id
    );
    let response = app.request(Method::GET, &uri, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["total"], 30);
    assert_eq!(body["data"]["total_pages"], 6);
    let items = body["data"]["items"].as_array().expect("items");
    assert_eq!(items.len(), 5);
    assert!(items.iter().all(|item| item["algorithm"] == "tree"));

    let id = items[0]["id"].as_i64().expect("forecast id");
    let response = app
        .request(Method::GET, &format!("/api/v1/forecasts/{}", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["id"], id);
    assert_eq!(body["data"]["product_name"], "Flat white");
    assert!(body["data"]["predicted_revenue"].is_string() || body["data"]["predicted_revenue"].is_number());
}

#[tokio::test]
async fn unknown_forecast_and_product_are_404() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/forecasts/4242", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response_json(response).await;
    assert_eq!(body["error"], "Not Found");

    let uri = format!("/api/v1/forecasts/generate/{}", Uuid::new_v4());
    let response = app.request(Method::POST, &uri, None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn product_without_history_is_400() {
    let app = TestApp::new().await;
    let product = app.seed_product("Umbrella", dec!(18)).await;

    let uri = format!("/api/v1/forecasts/generate/{}", product.id);
    let response = app.request(Method::POST, &uri, None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert!(body["message"]
        .as_str()
        .expect("message")
        .contains("no sales data"));
}

#[tokio::test]
async fn cleanup_honours_dry_run_and_validates_days() {
    let app = TestApp::new().await;
    let product = app.seed_product("Honey", dec!(8)).await;
    let old = TestApp::today() - Duration::days(100);
    app.insert_forecast(product.id, old, 3, ForecastAlgorithm::Tree)
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/forecasts/cleanup",
            Some(json!({ "dry_run": true })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["matched"], 1);
    assert_eq!(body["data"]["deleted"], 0);
    assert_eq!(app.all_forecasts().await.len(), 1);

    let response = app
        .request(Method::POST, "/api/v1/forecasts/cleanup", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["deleted"], 1);
    assert!(app.all_forecasts().await.is_empty());

    let response = app
        .request(
            Method::POST,
            "/api/v1/forecasts/cleanup",
            Some(json!({ "days": 0 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn schedule_can_be_read_and_changed() {
    let app = TestApp::new().await;

    let response = app
        .request(Method::GET, "/api/v1/forecasts/status", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["enabled"], false);
    assert_eq!(body["data"]["generation_in_progress"], false);
    assert!(body["data"]["days_until_next_generation"].is_null());

    let response = app
        .request(
            Method::PUT,
            "/api/v1/forecasts/config",
            Some(json!({ "enabled": true, "interval_days": 10 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["enabled"], true);
    assert_eq!(body["data"]["interval_days"], 10);

    let response = app
        .request(Method::PUT, "/api/v1/forecasts/config", Some(json!({})))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .request(
            Method::PUT,
            "/api/v1/forecasts/config",
            Some(json!({ "interval_days": 0 })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn summary_reports_history_and_schedule() {
    let app = TestApp::new().await;
    let product = app.seed_product("Brioche", dec!(3)).await;
    app.seed_daily_sales(product.id, 20, 4).await;
    app.service().generate_all().await.expect("batch run");

    let response = app
        .request(Method::GET, "/api/v1/forecasts/summary", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    let data = &body["data"];
    assert_eq!(data["historical_sales"].as_array().map(Vec::len), Some(20));
    assert_eq!(data["forecast_totals"].as_array().map(Vec::len), Some(60));
    assert!(data["total_predicted_units"].as_i64().expect("units") > 0);
    assert_eq!(data["schedule"]["enabled"], false);
}

#[tokio::test]
async fn dashboard_visit_triggers_background_generation() {
    let app = TestApp::with_config(|cfg| cfg.forecasting.auto_generate = true).await;
    let product = app.seed_product("Panettone", dec!(22)).await;
    app.seed_daily_sales(product.id, 30, 3).await;

    let response = app.request(Method::GET, "/api/v1/forecasts", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    // The trigger runs detached from the request; give it a moment to queue
    for _ in 0..200 {
        if !app.forecasts_for(product.id).await.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    app.wait_until_idle().await;

    assert_eq!(app.forecasts_for(product.id).await.len(), 60);
    let settings = app.state.scheduler.settings().await.expect("settings");
    assert!(settings.last_generated.is_some());
}

#[tokio::test]
async fn non_dashboard_paths_do_not_trigger() {
    let app = TestApp::with_config(|cfg| cfg.forecasting.auto_generate = true).await;
    let product = app.seed_product("Pretzel", dec!(2)).await;
    app.seed_daily_sales(product.id, 30, 3).await;

    let response = app.request(Method::GET, "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    assert!(!app.state.scheduler.is_running());
    assert!(app.forecasts_for(product.id).await.is_empty());
}
