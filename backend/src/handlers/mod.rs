//! HTTP handlers

pub mod accuracy;
pub mod forecast;
pub mod health;
pub mod triggers;

pub use accuracy::get_accuracy;
pub use forecast::{get_ensemble_forecast, get_method_forecasts};
pub use health::health_check;
pub use triggers::list_trigger_decisions;
