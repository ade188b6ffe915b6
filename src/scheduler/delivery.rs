//! Per-target alert delivery queues.
//!
//! Each target gets one worker that delivers its dispatches in decision
//! order. Targets never wait on each other.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::alerts::{AlertEngine, Dispatch};

pub struct DeliveryQueues {
    alerts: Arc<AlertEngine>,
    senders: HashMap<String, mpsc::UnboundedSender<Dispatch>>,
    workers: JoinSet<()>,
}

impl DeliveryQueues {
    pub fn new(alerts: Arc<AlertEngine>) -> Self {
        Self {
            alerts,
            senders: HashMap::new(),
            workers: JoinSet::new(),
        }
    }

    /// Queue a dispatch behind any earlier ones for the same target.
    pub fn push(&mut self, dispatch: Dispatch) {
        let dispatch = match self.senders.get(&dispatch.target) {
            Some(tx) => match tx.send(dispatch) {
                Ok(()) => return,
                // Worker died; start a fresh one below
                Err(mpsc::error::SendError(dispatch)) => dispatch,
            },
            None => dispatch,
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<Dispatch>();
        let alerts = self.alerts.clone();
        self.workers.spawn(async move {
            while let Some(dispatch) = rx.recv().await {
                alerts.deliver(dispatch).await;
            }
        });

        let target = dispatch.target.clone();
        if tx.send(dispatch).is_ok() {
            self.senders.insert(target, tx);
        }
    }

    /// Collect workers that exited, logging panics.
    pub fn reap(&mut self) {
        while let Some(joined) = self.workers.try_join_next() {
            if let Err(e) = joined {
                tracing::error!("Scheduler: delivery worker failed: {}", e);
            }
        }
    }

    /// Close every queue and wait for queued dispatches to be delivered.
    pub async fn drain(mut self) {
        self.senders.clear();
        if !self.workers.is_empty() {
            tracing::info!("Scheduler: waiting for {} delivery queues", self.workers.len());
        }
        while self.workers.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::RetryPolicy;
    use crate::config::{AlertsConfig, WebhookConfig};
    use crate::db::ProbeResult;
    use chrono::Utc;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_dispatches_for_a_target_arrive_in_order() {
        let server = MockServer::start().await;
        // The failure alert is slow to acknowledge
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"event": "url_down"})))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut hook = WebhookConfig::new(&server.uri());
        hook.cooldown_seconds = 0;
        let config = AlertsConfig {
            webhooks: vec![hook],
            allow_private_webhooks: true,
            ..Default::default()
        };
        let alerts = Arc::new(
            AlertEngine::new(&config)
                .unwrap()
                .with_retry(RetryPolicy::new(1, Duration::ZERO)),
        );

        let url = "https://api.example.com";
        alerts.evaluate(&ProbeResult::up("api", url, 200, 10, Utc::now()));
        let down = ProbeResult::down("api", url, Some(503), "HTTP 503", 10, Utc::now());
        let failure = alerts.evaluate(&down);
        let recovery = alerts.evaluate(&ProbeResult::up("api", url, 200, 10, Utc::now()));

        let mut queues = DeliveryQueues::new(alerts.clone());
        for dispatch in failure.into_iter().chain(recovery) {
            queues.push(dispatch);
        }
        queues.drain().await;

        let events: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| {
                let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
                body["event"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(events, vec!["url_down", "url_up"]);
    }
}
