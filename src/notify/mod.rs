use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cli::config::NotifySettings;

/// Outbound notification sink.
///
/// Emissions are fire-and-forget: implementations return once the event is
/// handed off, and delivery failures are logged, never surfaced to the
/// caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn emit(&self, topic: &str, event: &str, payload: Value);
}

#[derive(Debug, Serialize)]
struct WebhookEvent<'a> {
    topic: &'a str,
    event: &'a str,
    payload: Value,
}

/// Webhook-backed notifier
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
}

impl WebhookNotifier {
    pub fn new(settings: &NotifySettings) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            webhook_url: settings.webhook_url.clone(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn emit(&self, topic: &str, event: &str, payload: Value) {
        let body = WebhookEvent { topic, event, payload };
        let request = self.client.post(&self.webhook_url).json(&body);
        let topic = topic.to_string();
        let event = event.to_string();

        // Hand off delivery; job flow never blocks on the webhook
        tokio::spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Delivered notification {}/{}", topic, event);
                }
                Ok(response) => {
                    warn!(
                        "Notification {}/{} rejected with status {}",
                        topic,
                        event,
                        response.status()
                    );
                }
                Err(e) => {
                    warn!("Failed to deliver notification {}/{}: {}", topic, event, e);
                }
            }
        });
    }
}

/// Notifier that only logs, used when the webhook is disabled
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn emit(&self, topic: &str, event: &str, payload: Value) {
        debug!("Notification {}/{}: {}", topic, event, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn webhook_notifier_posts_the_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/onch"))
            .and(body_partial_json(json!({
                "topic": "registration",
                "event": "daily-limit",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(&NotifySettings {
            enabled: true,
            webhook_url: format!("{}/hooks/onch", server.uri()),
        });

        notifier
            .emit("registration", "daily-limit", json!({ "page": 2 }))
            .await;

        // Delivery happens on a spawned task; give it a moment before the
        // mock server verifies expectations on drop
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
