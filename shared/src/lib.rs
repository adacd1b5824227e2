//! Shared types and models for the Stormcast forecasting engine
//!
//! This crate contains the domain model shared by the engine, its storage
//! adapters and any client reading forecasts from the API.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
