//! Input seams for measurements and severity warnings

use async_trait::async_trait;
use shared::{Location, Measurement, SeverityWarning};

use crate::error::AppResult;

/// Anything that can deliver current observations for a location
#[async_trait]
pub trait MeasurementSource: Send + Sync {
    /// Latest readings; an empty vector means the source had nothing new
    async fn fetch_latest(&self, location: &Location) -> AppResult<Vec<Measurement>>;

    fn source_id(&self) -> &str;
}

/// Anything that can deliver active severity warnings for a location
#[async_trait]
pub trait WarningSource: Send + Sync {
    async fn active_warnings(&self, location: &Location) -> AppResult<Vec<SeverityWarning>>;
}

/// Warning source for deployments without a warning feed
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWarnings;

#[async_trait]
impl WarningSource for NoWarnings {
    async fn active_warnings(&self, _location: &Location) -> AppResult<Vec<SeverityWarning>> {
        Ok(Vec::new())
    }
}
