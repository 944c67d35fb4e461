use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::logging::{LogContext, MetricsLogger};
use crate::models::Notification;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification queue is closed")]
    QueueClosed,
    #[error("Webhook delivery failed: {0}")]
    Webhook(String),
}

/// Delivers one notification for a matched transaction. No acknowledgment is
/// expected by the pipeline; an error is only logged.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes each notification as a structured log line
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        LogContext::new("notifier", "notify")
            .with_transaction_hash(&notification.tx_hash)
            .with_address(&notification.address)
            .with_block_number(notification.block_number)
            .info(&format!(
                "Notification for address {}: transaction {}",
                notification.address, notification.tx_hash
            ));
        Ok(())
    }
}

/// POSTs each notification as JSON to a fixed URL
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout_seconds: u64) -> Result<Self, NotifyError> {
        if timeout_seconds == 0 {
            return Err(NotifyError::Webhook("Timeout must be at least one second".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| NotifyError::Webhook(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| NotifyError::Webhook(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Webhook(format!(
                "HTTP {} from {}",
                status.as_u16(),
                self.url
            )));
        }
        Ok(())
    }
}

/// Bounded queue between block processing and the notifier.
///
/// `dispatch` waits for queue capacity instead of dropping, so every match is
/// handed to the notifier at least once. A single worker task drains the
/// queue in order and exits once every dispatcher clone is dropped.
#[derive(Clone)]
pub struct NotificationDispatcher {
    sender: mpsc::Sender<Notification>,
}

impl NotificationDispatcher {
    pub fn spawn(notifier: Arc<dyn Notifier>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<Notification>(capacity.max(1));

        let worker = tokio::spawn(async move {
            let mut delivered: u64 = 0;
            while let Some(notification) = receiver.recv().await {
                let result = notifier.notify(&notification).await;
                MetricsLogger::log_notification(&notification.tx_hash, &notification.address, result.is_ok());
                if let Err(e) = result {
                    LogContext::new("notifier", "deliver")
                        .with_transaction_hash(&notification.tx_hash)
                        .with_address(&notification.address)
                        .warn(&format!("Notification delivery failed: {}", e));
                }
                delivered += 1;
            }
            log::info!("Notification worker stopped after {} deliveries", delivered);
        });

        (Self { sender }, worker)
    }

    pub async fn dispatch(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sender
            .send(notification)
            .await
            .map_err(|_| NotifyError::QueueClosed)
    }

    /// Notifications queued but not yet picked up by the worker
    pub fn pending(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}
