//! Scheduler module for running probes on a fixed interval.
//!
//! A single tick loop collects the targets that are due and probes them on a
//! semaphore-capped set of tasks. Each completed probe is stored, evaluated
//! by the alert engine and rescheduled; the batch finishes before the next
//! tick is considered, so a target is never probed twice at once.

mod delivery;
mod retention;
mod schedule;

pub use delivery::*;
pub use retention::*;
pub use schedule::*;

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use crate::alerts::{AlertEngine, Dispatch};
use crate::config::{MonitorConfig, TargetConfig};
use crate::db::{ProbeResult, Store};
use crate::probe::Probe;

/// Callback invoked with every completed probe result.
pub type ResultObserver = Arc<dyn Fn(&ProbeResult) + Send + Sync>;

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub monitor_interval: Duration,
    /// How often due targets are collected.
    pub tick: Duration,
    /// Hard cap on concurrent probes.
    pub max_workers: usize,
    pub stagger: Duration,
    pub retention: RetentionPolicy,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(60),
            tick: Duration::from_secs(1),
            max_workers: 3,
            stagger: Duration::from_secs(2),
            retention: RetentionPolicy::default(),
        }
    }
}

impl From<&MonitorConfig> for SchedulerSettings {
    fn from(cfg: &MonitorConfig) -> Self {
        Self {
            monitor_interval: cfg.interval(),
            max_workers: cfg.max_workers.max(1),
            stagger: Duration::from_secs(cfg.stagger_seconds),
            retention: RetentionPolicy {
                retention_days: cfg.retention_days,
                every_cycles: cfg.prune_every_cycles,
            },
            ..Default::default()
        }
    }
}

struct Shared {
    targets: Vec<TargetConfig>,
    settings: SchedulerSettings,
    prober: Arc<dyn Probe>,
    store: Arc<Store>,
    alerts: Arc<AlertEngine>,
    observer: Option<ResultObserver>,
    schedule: Mutex<ScheduleState>,
    workers: Arc<Semaphore>,
}

impl Shared {
    fn schedule(&self) -> MutexGuard<'_, ScheduleState> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reschedule(&self, name: &str) {
        let at = Instant::now() + self.settings.monitor_interval;
        self.schedule().reschedule(name, at);
    }
}

/// The main scheduler that orchestrates probe execution.
pub struct Scheduler {
    shared: Arc<Shared>,
    stop: Mutex<Option<broadcast::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler. Initial due times are staggered from now.
    pub fn new(
        targets: Vec<TargetConfig>,
        settings: SchedulerSettings,
        prober: Arc<dyn Probe>,
        store: Arc<Store>,
        alerts: Arc<AlertEngine>,
        observer: Option<ResultObserver>,
    ) -> Self {
        let schedule = ScheduleState::staggered(
            targets.iter().map(|t| t.name.as_str()),
            Instant::now(),
            settings.stagger,
        );
        let workers = Arc::new(Semaphore::new(settings.max_workers.max(1)));

        Self {
            shared: Arc::new(Shared {
                targets,
                settings,
                prober,
                store,
                alerts,
                observer,
                schedule: Mutex::new(schedule),
                workers,
            }),
            stop: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Start the tick loop. Starting a running scheduler does nothing.
    pub fn start(&self) {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let (tx, rx) = broadcast::channel(1);
        *self.stop.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);

        tracing::info!(
            "Starting scheduler with {} targets (interval {:?}, {} workers)",
            self.shared.targets.len(),
            self.shared.settings.monitor_interval,
            self.shared.settings.max_workers
        );
        *handle = Some(tokio::spawn(run_loop(self.shared.clone(), rx)));
    }

    /// Signal the loop to stop and wait up to `timeout` for the current
    /// batch to finish. Returns true if the loop exited in time.
    ///
    /// On timeout the loop keeps running until its batch is done and the
    /// scheduler reports running until then, so `start` cannot overlap it.
    pub async fn stop(&self, timeout: Duration) -> bool {
        let tx = self.stop.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }

        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(mut handle) = handle else {
            return true;
        };

        let joined = tokio::time::timeout(timeout, &mut handle).await;
        if joined.is_err() {
            let mut slot = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(handle);
            }
        }

        match joined {
            Ok(Ok(())) => {
                tracing::info!("Scheduler stopped");
                true
            }
            Ok(Err(e)) => {
                tracing::error!("Scheduler: loop task failed: {}", e);
                false
            }
            Err(_) => {
                tracing::warn!("Scheduler: still finishing in-flight work after {:?}", timeout);
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// When the named target is next due.
    pub fn next_due(&self, name: &str) -> Option<Instant> {
        self.shared.schedule().next_due(name)
    }

    /// Due times in target order.
    pub fn due_times(&self) -> Vec<(String, Instant)> {
        let schedule = self.shared.schedule();
        self.shared
            .targets
            .iter()
            .filter_map(|t| schedule.next_due(&t.name).map(|at| (t.name.clone(), at)))
            .collect()
    }
}

async fn run_loop(shared: Arc<Shared>, mut stop_rx: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(shared.settings.tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut deliveries = DeliveryQueues::new(shared.alerts.clone());
    let mut cycles: u64 = 0;

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = interval.tick() => {
                deliveries.reap();

                let Some(dispatches) = run_cycle(&shared).await else {
                    continue;
                };

                for dispatch in dispatches {
                    deliveries.push(dispatch);
                }

                cycles += 1;
                if shared.settings.retention.is_due(cycles) {
                    process_retention(&shared.store, &shared.settings.retention);
                }
            }
        }
    }

    deliveries.drain().await;
}

/// Probe every due target. Returns `None` when nothing was due.
async fn run_cycle(shared: &Arc<Shared>) -> Option<Vec<Dispatch>> {
    let due = shared.schedule().due(Instant::now());
    if due.is_empty() {
        return None;
    }

    let due_targets: Vec<TargetConfig> = shared
        .targets
        .iter()
        .filter(|t| due.contains(&t.name))
        .cloned()
        .collect();
    tracing::debug!("Scheduler: dispatching {} due targets", due_targets.len());

    let mut batch = JoinSet::new();
    for target in due_targets {
        let shared = shared.clone();
        batch.spawn(async move {
            let _permit = shared.workers.clone().acquire_owned().await;
            run_check(&shared, &target).await
        });
    }

    let mut completed = HashSet::new();
    let mut dispatches = Vec::new();
    while let Some(joined) = batch.join_next().await {
        match joined {
            Ok((name, mut produced)) => {
                completed.insert(name);
                dispatches.append(&mut produced);
            }
            Err(e) => tracing::error!("Scheduler: probe task failed: {}", e),
        }
    }

    // A task that died never rescheduled its target
    for name in due.iter().filter(|name| !completed.contains(*name)) {
        shared.reschedule(name);
    }

    Some(dispatches)
}

/// Probe one target and handle its result.
async fn run_check(shared: &Shared, target: &TargetConfig) -> (String, Vec<Dispatch>) {
    let result = shared.prober.probe(target).await;

    if let Err(e) = shared.store.insert(&result) {
        tracing::error!("Scheduler: Failed to store result for {}: {}", target.name, e);
    }

    let mut dispatches = shared.alerts.evaluate(&result);
    if result.is_up {
        dispatches.extend(shared.alerts.evaluate_latency(target, result.response_time_ms));
    }

    if let Some(observer) = &shared.observer {
        if catch_unwind(AssertUnwindSafe(|| observer(&result))).is_err() {
            tracing::error!("Scheduler: result observer panicked for {}", target.name);
        }
    }

    shared.reschedule(&target.name);
    (target.name.clone(), dispatches)
}
