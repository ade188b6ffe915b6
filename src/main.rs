//! Uptrail - HTTP availability monitor.
//!
//! `uptrail` runs the monitor until Ctrl-C.
//! `uptrail test-alerts` sends a test payload to every enabled channel.

use uptrail::alerts::AlertEngine;
use uptrail::config::AppConfig;
use uptrail::db::Store;
use uptrail::heartbeat::Heartbeat;
use uptrail::probe::HttpProber;
use uptrail::scheduler::{Scheduler, SchedulerSettings};

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("uptrail=info".parse()?))
        .init();

    // Load configuration
    let cfg = AppConfig::load()?;
    let alerts = Arc::new(AlertEngine::new(&cfg.alerts)?);

    if std::env::args().nth(1).as_deref() == Some("test-alerts") {
        let results = alerts.test_all_channels().await;
        if results.is_empty() {
            println!("No alert channels enabled");
        }
        for (channel, ok) in &results {
            println!("{}: {}", channel, if *ok { "ok" } else { "FAILED" });
        }
        if results.values().any(|ok| !ok) {
            std::process::exit(1);
        }
        return Ok(());
    }

    tracing::info!("Starting Uptrail with {} targets...", cfg.targets.len());
    tracing::info!("Using database at {}", cfg.database.path);

    // Initialize database
    let store = Arc::new(Store::open(&cfg.database.path)?);
    let stats = store.stats()?;
    tracing::info!(
        "Database initialized successfully ({} results, {} bytes)",
        stats.row_count,
        stats.size_bytes
    );

    let prober = Arc::new(HttpProber::new(cfg.monitor.follow_redirects)?);
    let scheduler = Scheduler::new(
        cfg.targets.clone(),
        SchedulerSettings::from(&cfg.monitor),
        prober,
        store,
        alerts,
        None,
    );

    let heartbeat = cfg.heartbeat.clone().map(Heartbeat::new);
    if let Some(heartbeat) = &heartbeat {
        heartbeat.start();
    }

    scheduler.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    if let Some(heartbeat) = &heartbeat {
        heartbeat.stop().await;
    }
    scheduler.stop(SHUTDOWN_TIMEOUT).await;

    Ok(())
}
