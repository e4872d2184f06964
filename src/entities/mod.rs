pub mod forecast;
pub mod forecast_config;
pub mod product;
pub mod sale;
