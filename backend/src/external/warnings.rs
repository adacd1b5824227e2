//! Severity warning feed client

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use shared::{Location, Severity, SeverityWarning};

use crate::config::WarningFeedConfig;
use crate::error::{AppError, AppResult};
use crate::services::sources::WarningSource;

/// Client for a JSON warning feed
///
/// The feed is expected to return an array of warnings; CAP-style field
/// names (`identifier`, `onset`, `expires`) are accepted as aliases.
#[derive(Clone)]
pub struct WarningFeedClient {
    client: Client,
    feed_url: String,
}

#[derive(Debug, Deserialize)]
struct FeedWarning {
    #[serde(alias = "identifier")]
    id: String,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(alias = "onset", alias = "start")]
    window_start: DateTime<Utc>,
    #[serde(default, alias = "expires", alias = "end")]
    window_end: Option<DateTime<Utc>>,
    #[serde(default)]
    description: Option<String>,
}

impl From<FeedWarning> for SeverityWarning {
    fn from(w: FeedWarning) -> Self {
        let severity = w
            .severity
            .as_deref()
            .and_then(|s| s.parse::<Severity>().ok())
            .unwrap_or_default();
        SeverityWarning {
            event: w.event.unwrap_or_else(|| w.id.clone()),
            id: w.id,
            severity,
            window_start: w.window_start,
            window_end: w.window_end,
            description: w.description,
        }
    }
}

impl WarningFeedClient {
    pub fn new(config: &WarningFeedConfig, feed_url: String) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, feed_url })
    }
}

#[async_trait]
impl WarningSource for WarningFeedClient {
    async fn active_warnings(&self, location: &Location) -> AppResult<Vec<SeverityWarning>> {
        let response = self
            .client
            .get(&self.feed_url)
            .query(&[
                ("lat", location.latitude.to_string()),
                ("lon", location.longitude.to_string()),
            ])
            .send()
            .await
            .map_err(|e| AppError::WarningSource(format!("Warning feed request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::WarningSource(format!(
                "Warning feed error: {}",
                response.status()
            )));
        }

        let feed: Vec<FeedWarning> = response
            .json()
            .await
            .map_err(|e| AppError::WarningSource(format!("Failed to parse warning feed: {}", e)))?;

        Ok(feed.into_iter().map(SeverityWarning::from).collect())
    }
}
