//! Domain models for the Stormcast forecasting engine

mod accuracy;
mod analysis;
mod forecast;
mod measurement;
mod trigger;
mod warning;

pub use accuracy::*;
pub use analysis::*;
pub use forecast::*;
pub use measurement::*;
pub use trigger::*;
pub use warning::*;

use thiserror::Error;

/// Errors raised while interpreting textual model values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Unknown severity: {0}")]
    UnknownSeverity(String),

    #[error("Unknown alert level: {0}")]
    UnknownAlertLevel(String),

    #[error("Unknown forecast method: {0}")]
    UnknownMethod(String),

    #[error("Unknown forecast field: {0}")]
    UnknownField(String),
}
