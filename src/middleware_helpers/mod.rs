pub mod auto_forecast;
pub mod request_id;

pub use auto_forecast::auto_forecast_middleware;
pub use request_id::{request_id_middleware, REQUEST_ID_HEADER};
