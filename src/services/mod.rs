// Forecast generation, storage and scheduling
pub mod forecasting;
