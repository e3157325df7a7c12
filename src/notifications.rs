use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to deliver booking notification: {0}")]
pub struct NotificationError(pub String);

/// Flat record handed to the dispatcher. Field names are part of the
/// contract with the mail/webhook side and must stay stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingNotification {
    pub reference: Uuid,
    pub client_name: String,
    pub client_email: String,
    pub client_phone: String,
    pub client_company: String,
    pub meeting_topic: String,
    pub meeting_message: String,
    pub slot_id: String,
    pub slot_date: NaiveDate,
    pub slot_start: NaiveTime,
    pub slot_end: NaiveTime,
    pub submitted_at: DateTime<Utc>,
    pub timezone: String,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait BookingNotifier: Send + Sync {
    async fn notify(&self, notification: &BookingNotification) -> Result<(), NotificationError>;
}

/// Only writes the booking to the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl BookingNotifier for LogNotifier {
    async fn notify(&self, notification: &BookingNotification) -> Result<(), NotificationError> {
        info!(
            reference = %notification.reference,
            slot_id = %notification.slot_id,
            client = %notification.client_name,
            "New booking"
        );
        Ok(())
    }
}

/// Posts the booking as JSON to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotificationError> {
        let url = url.into();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(NotificationError(format!(
                "Webhook URL must start with http:// or https://: {url}"
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| NotificationError(err.to_string()))?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl BookingNotifier for WebhookNotifier {
    async fn notify(&self, notification: &BookingNotification) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|err| NotificationError(err.to_string()))?;

        if !response.status().is_success() {
            return Err(NotificationError(format!(
                "Webhook answered with {}",
                response.status()
            )));
        }
        Ok(())
    }
}
