//! Notification channel
//!
//! Fire-and-forget delivery of short status texts. Delivery is retried a
//! fixed number of times with a fixed delay; a failure is logged and never
//! aborts the job that sent it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::config::NotifyConfig;
use crate::constants::USER_AGENT;
use crate::errors::{NotifyError, NotifyResult};

/// Receives human-readable status messages
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one message
    async fn send(&self, text: &str) -> NotifyResult<()>;
}

/// Discards every message
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, text: &str) -> NotifyResult<()> {
        debug!("Notification (no channel configured): {}", text);
        Ok(())
    }
}

/// Posts `{"content": text}` to a chat webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: Url,
    attempts: u32,
    backoff: Duration,
}

impl WebhookNotifier {
    /// Notifier for `url`
    pub fn new(url: Url, attempts: u32, backoff: Duration, timeout: Duration) -> NotifyResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            url,
            attempts: attempts.max(1),
            backoff,
        })
    }

    async fn post_once(&self, text: &str) -> NotifyResult<()> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&json!({ "content": text }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::ServerError {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, text: &str) -> NotifyResult<()> {
        for attempt in 1..=self.attempts {
            match self.post_once(text).await {
                Ok(()) => {
                    debug!("Notification delivered on attempt {}", attempt);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Notification attempt {}/{} failed: {}",
                        attempt, self.attempts, e
                    );
                    if attempt < self.attempts {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }

        Err(NotifyError::Exhausted {
            attempts: self.attempts,
        })
    }
}

/// Notifier from configuration; without a webhook, or if the client cannot
/// be built, messages are discarded
pub fn from_config(config: &NotifyConfig) -> Box<dyn Notifier> {
    let Some(url) = config.webhook_url.clone() else {
        return Box::new(NullNotifier);
    };

    match WebhookNotifier::new(url, config.attempts, config.backoff, config.timeout) {
        Ok(notifier) => Box::new(notifier),
        Err(e) => {
            warn!("Notifications disabled: {}", e);
            Box::new(NullNotifier)
        }
    }
}

/// Send and swallow the outcome
pub async fn notify(notifier: &dyn Notifier, text: &str) {
    if let Err(e) = notifier.send(text).await {
        warn!("Notification not delivered: {}", e);
    }
}
