//! Webhook delivery of engine notifications

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::DeliveryConfig;
use crate::error::{AppError, AppResult};
use crate::services::notification::{Notification, Notifier};

/// POSTs every notification as JSON; failures are reported, never retried
#[derive(Clone)]
pub struct WebhookNotifier {
    url: String,
    http_client: Client,
}

impl WebhookNotifier {
    pub fn new(config: &DeliveryConfig, url: String) -> AppResult<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { url, http_client })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> AppResult<()> {
        let response = self
            .http_client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(notification)
            .send()
            .await
            .map_err(|e| AppError::Delivery(format!("Webhook request failed: {}", e)))?;

        if response.status().is_success() {
            tracing::debug!(kind = notification.kind(), "Notification delivered");
            Ok(())
        } else {
            Err(AppError::Delivery(format!(
                "Webhook returned {} for {}",
                response.status(),
                notification.kind()
            )))
        }
    }
}
