//! Webhook delivery.

use std::time::Duration;

use super::payload::{AlertEvent, AlertPayload};
use super::retry::{retry_with_backoff, RetryPolicy};
use super::AlertError;
use crate::config::WebhookConfig;
use crate::guard::UrlGuard;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// A configured webhook receiver.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(config: WebhookConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    pub fn identity(&self) -> String {
        format!("webhook:{}", self.config.url)
    }

    /// Whether this receiver wants state-change events of this kind.
    pub fn subscribed(&self, event: AlertEvent) -> bool {
        match event {
            AlertEvent::UrlDown => self.config.on_failure,
            AlertEvent::UrlUp => self.config.on_recovery,
            AlertEvent::LatencyHigh | AlertEvent::LatencyNormal | AlertEvent::Test => true,
        }
    }

    /// POST the payload, retrying with backoff.
    ///
    /// The URL is validated once up front; a rejected URL is never retried.
    pub async fn send(
        &self,
        guard: &UrlGuard,
        retry: &RetryPolicy,
        payload: &AlertPayload,
    ) -> Result<(), AlertError> {
        let url = guard.validate(&self.config.url)?;
        let body = serde_json::to_vec(payload)?;
        let label = self.identity();

        retry_with_backoff(retry, &label, |_| {
            let request = self
                .client
                .post(url.clone())
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .timeout(WEBHOOK_TIMEOUT)
                .body(body.clone());
            async move {
                let response = request.send().await?;
                let status = response.status();
                if status.is_success() {
                    Ok(())
                } else {
                    Err(AlertError::Status(status.as_u16()))
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::payload::StatusPayload;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn channel(url: String) -> WebhookChannel {
        WebhookChannel::new(WebhookConfig::new(&url), reqwest::Client::new())
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_send_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let hook = channel(format!("{}/hook", server.uri()));
        let payload = AlertPayload::Status(StatusPayload::test());
        hook.send(&UrlGuard::new(true), &fast_retry(), &payload).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["event"], "test");
    }

    #[tokio::test]
    async fn test_send_gives_up_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let hook = channel(server.uri());
        let payload = AlertPayload::Status(StatusPayload::test());
        let err = hook
            .send(&UrlGuard::new(true), &fast_retry(), &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, AlertError::Status(502)));
    }

    #[tokio::test]
    async fn test_guard_rejection_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let hook = channel(server.uri());
        let payload = AlertPayload::Status(StatusPayload::test());
        let err = hook
            .send(&UrlGuard::default(), &fast_retry(), &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, AlertError::Guard(_)));
    }

    #[test]
    fn test_subscriptions() {
        let mut config = WebhookConfig::new("https://hooks.example.com");
        config.on_recovery = false;
        let hook = WebhookChannel::new(config, reqwest::Client::new());
        assert!(hook.subscribed(AlertEvent::UrlDown));
        assert!(!hook.subscribed(AlertEvent::UrlUp));
        assert!(hook.subscribed(AlertEvent::LatencyHigh));
    }
}
