//! Dead-man's-switch heartbeat.
//!
//! Pings an external URL on a fixed interval. A missed ping is reported by
//! the receiving service through its absence, so failures are only logged.

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::HeartbeatConfig;

/// Background heartbeat pinger.
pub struct Heartbeat {
    config: HeartbeatConfig,
    client: reqwest::Client,
    stop: Mutex<Option<broadcast::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Heartbeat {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            stop: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Send one ping. Returns whether the receiver answered with 2xx.
    pub async fn ping_once(&self) -> bool {
        ping(&self.client, &self.config).await
    }

    /// Start the background task. No-op when disabled or already running.
    pub fn start(&self) {
        if !self.config.enabled {
            tracing::info!("Heartbeat: disabled");
            return;
        }

        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let (tx, mut rx) = broadcast::channel(1);
        *self.stop.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);

        let client = self.client.clone();
        let config = self.config.clone();
        tracing::info!(
            "Heartbeat: pinging {} every {}s",
            config.url,
            config.interval_seconds
        );

        *handle = Some(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(config.interval_seconds.max(1)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        ping(&client, &config).await;
                    }
                }
            }
            tracing::info!("Heartbeat: stopped");
        }));
    }

    /// Stop the background task and wait for it to exit.
    pub async fn stop(&self) {
        let tx = self.stop.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }

        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Heartbeat: task failed: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

async fn ping(client: &reqwest::Client, config: &HeartbeatConfig) -> bool {
    let result = client
        .get(&config.url)
        .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
        .send()
        .await;

    match result {
        Ok(response) if response.status().is_success() => {
            tracing::debug!("Heartbeat: ping ok ({})", response.status());
            true
        }
        Ok(response) => {
            tracing::warn!("Heartbeat: ping returned {}", response.status());
            false
        }
        Err(e) => {
            tracing::warn!("Heartbeat: ping failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: String) -> HeartbeatConfig {
        HeartbeatConfig {
            url,
            interval_seconds: 60,
            timeout_seconds: 2,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_ping_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let ok = Heartbeat::new(config(format!("{}/ping", server.uri())));
        assert!(ok.ping_once().await);

        let missing = Heartbeat::new(config(format!("{}/other", server.uri())));
        assert!(!missing.ping_once().await);
    }

    #[tokio::test]
    async fn test_failed_ping_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let heartbeat = Heartbeat::new(config(server.uri()));
        assert!(!heartbeat.ping_once().await);
    }

    #[tokio::test]
    async fn test_start_pings_and_stop_exits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let heartbeat = Heartbeat::new(config(server.uri()));
        heartbeat.start();
        heartbeat.start();
        assert!(heartbeat.is_running());

        tokio::time::sleep(Duration::from_millis(300)).await;
        heartbeat.stop().await;
        assert!(!heartbeat.is_running());

        // First tick fires immediately, the next one is a minute away
        assert_eq!(server.received_requests().await.unwrap().len(), 1);

        heartbeat.stop().await;
    }

    #[tokio::test]
    async fn test_disabled_does_not_start() {
        let mut cfg = config("https://hc.example.com/ping".to_string());
        cfg.enabled = false;
        let heartbeat = Heartbeat::new(cfg);
        heartbeat.start();
        assert!(!heartbeat.is_running());
        heartbeat.stop().await;
    }
}
