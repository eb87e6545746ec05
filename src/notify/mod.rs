//! Notification sink. Delivery runs on its own task fed by an mpsc channel,
//! so a slow or failing webhook never holds the engine lock.

pub mod retry;

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Duration;
use url::Url;

use crate::engine::events::DomainEvent;
use crate::logging::{log, log_notify_failure, obj, v_str, Domain, Level};
use crate::render::render_event;
use retry::{is_retryable_delivery_error, retry_async, HttpStatusError, RetryConfig};

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Attempts this sink makes per message, for failure reporting.
    fn attempts(&self) -> u32 {
        1
    }

    async fn deliver(&self, text: &str) -> Result<()>;
}

/// Writes rendered messages to the structured log only.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, text: &str) -> Result<()> {
        log(
            Level::Info,
            Domain::Notify,
            "message",
            obj(&[("msg", v_str(text))]),
        );
        Ok(())
    }
}

/// Posts `{"content": text}` to a chat webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Url,
    retry: RetryConfig,
}

impl WebhookNotifier {
    pub fn new(url: &str, retry: RetryConfig) -> Result<Self> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("unsupported webhook scheme {}", url.scheme());
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, url, retry })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn attempts(&self) -> u32 {
        self.retry.attempts()
    }

    async fn deliver(&self, text: &str) -> Result<()> {
        let payload = json!({ "content": text });
        let body = &payload;
        let client = &self.client;
        let url = &self.url;
        retry_async(&self.retry, "webhook", is_retryable_delivery_error, || async move {
            let resp = client.post(url.clone()).json(body).send().await?;
            let status = resp.status();
            if status.is_success() {
                Ok::<(), anyhow::Error>(())
            } else {
                Err(HttpStatusError(status.as_u16()).into())
            }
        })
        .await
    }
}

/// Webhook sink when a valid URL is configured, log sink otherwise.
pub fn build(webhook_url: Option<&str>) -> Arc<dyn Notifier> {
    match webhook_url.map(|u| WebhookNotifier::new(u, RetryConfig::default())) {
        Some(Ok(webhook)) => Arc::new(webhook),
        Some(Err(err)) => {
            log(
                Level::Warn,
                Domain::Notify,
                "webhook_disabled",
                obj(&[("error", v_str(&err.to_string()))]),
            );
            Arc::new(LogNotifier)
        }
        None => Arc::new(LogNotifier),
    }
}

/// Drain `rx` until every sender is gone. Returns the number delivered.
pub async fn run_notifier(
    mut rx: mpsc::Receiver<DomainEvent>,
    notifier: Arc<dyn Notifier>,
) -> usize {
    let mut delivered = 0;
    while let Some(event) = rx.recv().await {
        let text = render_event(&event);
        match notifier.deliver(&text).await {
            Ok(()) => delivered += 1,
            Err(err) => log_notify_failure(event.name(), notifier.attempts(), &err.to_string()),
        }
    }
    delivered
}
